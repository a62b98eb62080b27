//! Telemetry initialization.
//!
//! Installs a `tracing-subscriber` filter + fmt layer. Controlled by the
//! standard `RUST_LOG` env filter syntax, plus `CENTRALDOGMA_LOG=json` to
//! switch the formatter to structured JSON output (useful when this crate
//! runs embedded in a service that ships logs to a collector). There is no
//! RPC surface in this storage core to export spans *to*, so unlike many
//! sibling services this module stops at the subscriber — no OTLP exporter.

use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

/// Opaque guard, held for the lifetime of the process. Telemetry here is a
/// local subscriber only, so there is nothing to flush on drop — the guard
/// exists for API symmetry with services that do have something to flush.
pub struct TelemetryGuard(());

/// Install the global `tracing` subscriber.
///
/// Reads `RUST_LOG` (falling back to `"info"`) for the filter, and
/// `CENTRALDOGMA_LOG=json` to select the JSON formatter over the default
/// human-readable one.
#[must_use]
pub fn init() -> TelemetryGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("CENTRALDOGMA_LOG").is_ok_and(|v| v == "json");

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    TelemetryGuard(())
}
