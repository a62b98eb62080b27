//! Domain logic for Central Dogma: path matching, JSON/text patch engines,
//! tree diffing with rename synthesis, and staging/commit — everything above
//! the raw object store (`cd_git`) and below the repository façade.

pub mod differ;
pub mod error;
pub mod json_patch;
pub mod model;
pub mod pattern;
pub mod staging;
pub mod text_patch;

pub use differ::{Change as DiffChange, ChangeKind as DiffChangeKind, SnapshotEntry};
pub use error::CoreError;
pub use json_patch::PatchMode;
pub use model::{
    Change, Commit, CommitEnvelope, EntityPath, EntityType, Entry, EntryContent, JsonPatchOp,
    Markup, Revision,
};
pub use pattern::PathPattern;
pub use staging::{CommitMeta, CommitOutcome};
