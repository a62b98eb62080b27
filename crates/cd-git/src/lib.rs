//! Content-addressed, git-compatible object store for Central Dogma.
//!
//! This crate defines the [`ObjectStore`] trait — the single interface
//! through which `cd-core` and the root `centraldogma` crate touch storage.
//! No other crate in the workspace imports `gix` directly.
//!
//! # Crate layout
//!
//! - [`repo`] — the [`ObjectStore`] trait definition.
//! - [`types`] — value types used in trait signatures ([`ObjectId`],
//!   [`RefName`], [`TreeEntry`], [`DiffEntry`], etc.).
//! - [`error`] — the [`StoreError`] enum returned by all trait methods.
//! - [`gix_repo`] — the `gix`-backed [`GixRepo`] implementation of
//!   [`ObjectStore`].
//! - [`commit_index`] — the dense revision-to-commit-id index (C2), a
//!   fixed-width append-only file kept alongside the object store.

mod diff_impl;
mod objects_impl;
mod refs_impl;

pub mod commit_index;
pub mod error;
pub mod gix_repo;
pub mod repo;
pub mod types;

pub use commit_index::{CommitIndex, CommitIndexError};
pub use error::StoreError;
pub use gix_repo::GixRepo;
pub use repo::ObjectStore;
pub use types::{
    ChangeKind, CommitInfo, DiffEntry, EntryKind, ObjectId, OidParseError, RefEdit, RefName,
    RefNameError, TreeEdit, TreeEntry,
};
