//! Error types for object-store operations.
//!
//! [`StoreError`] is the single error type returned by all [`ObjectStore`](crate::ObjectStore)
//! trait methods. It uses rich enum variants so callers can match on specific
//! failure modes (missing object, ref CAS mismatch, index corruption) without
//! parsing error messages.

use thiserror::Error;

/// Errors returned by [`ObjectStore`](crate::ObjectStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A requested object, ref, or revision was not found.
    #[error("not found: {message}")]
    NotFound {
        /// Human-readable description of what was missing.
        message: String,
    },

    /// A ref update failed because the ref's current value did not match the
    /// expected old value (compare-and-swap / optimistic concurrency failure).
    #[error("ref conflict on `{ref_name}`: {message}")]
    RefConflict {
        /// The ref that could not be updated.
        ref_name: String,
        /// Details about the mismatch.
        message: String,
    },

    /// An object id string could not be parsed or was otherwise invalid.
    #[error("invalid object id `{value}`: {reason}")]
    InvalidOid {
        /// The raw value that failed validation.
        value: String,
        /// Why validation failed.
        reason: String,
    },

    /// The on-disk commit-id index is corrupt (truncated record, length
    /// mismatch against the ref-reachable commit count) and must be rebuilt
    /// from the commit DAG.
    #[error("commit-id index corrupt: {message}")]
    IndexCorrupt {
        /// Details about what was inconsistent.
        message: String,
    },

    /// An I/O error occurred (file system, object read/write, etc.).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The underlying git backend (`gix`) returned an unclassified error.
    ///
    /// This is the catch-all for errors that don't fit other variants. The
    /// `message` should include enough context to diagnose the failure.
    #[error("backend error: {message}")]
    BackendError {
        /// Freeform error description from the backend.
        message: String,
    },
}
