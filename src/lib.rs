//! `centraldogma` — storage engine core for a versioned configuration
//! repository.
//!
//! This crate wires together a Git-compatible object store (`cd-git`), a
//! domain model and staging/diff layer (`cd-core`), and the ambient
//! concerns of a long-lived service: configuration, structured logging, a
//! bounded result cache, a watch/long-poll subsystem, rolling compaction,
//! and the public async [`Repository`] façade that dispatches onto a
//! blocking worker pool.

pub mod cache;
pub mod compaction;
pub mod config;
pub mod error;
pub mod repository;
pub mod telemetry;
pub mod watch;

pub use cd_core::{
    Change, Commit, CommitEnvelope, DiffChange, DiffChangeKind, EntityPath, EntityType, Entry,
    EntryContent, JsonPatchOp, Markup, PatchMode, PathPattern, Revision,
};
pub use config::RepositoryConfig;
pub use error::CentralDogmaError;
pub use repository::{DiffMode, FindOptions, Repository};
pub use telemetry::TelemetryGuard;
