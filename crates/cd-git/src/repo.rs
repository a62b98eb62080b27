//! The [`ObjectStore`] trait — the single abstraction boundary between
//! Central Dogma and git.
//!
//! Every crate above `cd-git` interacts with the object store exclusively
//! through this trait. It is object-safe so callers can use `dyn ObjectStore`
//! or `Box<dyn ObjectStore>`.
//!
//! | Group         | Methods                                                |
//! |---------------|---------------------------------------------------------|
//! | Head ref      | `read_head`, `cas_update_head`, `delete_ref`, `atomic_ref_update` |
//! | Object read   | `exists`, `read_blob`, `read_tree`, `read_commit`      |
//! | Object write  | `write_blob`, `write_tree`, `write_empty_tree`, `create_commit` |
//! | Tree editing  | `edit_tree`                                            |
//! | Diff          | `diff_trees`                                           |

use crate::error::StoreError;
use crate::types::{CommitInfo, DiffEntry, ObjectId, RefEdit, RefName, TreeEdit, TreeEntry};

/// The object-store abstraction used throughout Central Dogma.
///
/// Implementations may be backed by `gix` (the only one shipped here) or a
/// test double. There is deliberately no index, checkout, status, worktree,
/// stash, push, or git-config surface: this is a bare, server-side,
/// content-addressed store, not a working-copy client (§4.1).
///
/// # Object safety
///
/// No generic methods, no `Self` in return position outside of `Result`.
/// Callers may use `&dyn ObjectStore` or `Box<dyn ObjectStore>`.
pub trait ObjectStore {
    // -----------------------------------------------------------------------
    // Head ref
    // -----------------------------------------------------------------------

    /// Resolve a ref to its object id, returning `None` if the ref does not
    /// exist yet (an unborn repository).
    fn read_head(&self, name: &RefName) -> Result<Option<ObjectId>, StoreError>;

    /// Advance a ref to `new_id`, with compare-and-swap on its current value.
    ///
    /// Pass [`ObjectId::ZERO`] as `expected_old_id` to assert the ref must
    /// not already exist. Returns [`StoreError::RefConflict`] if the ref's
    /// current value doesn't match.
    fn cas_update_head(
        &self,
        name: &RefName,
        new_id: ObjectId,
        expected_old_id: ObjectId,
        log_message: &str,
    ) -> Result<(), StoreError>;

    /// Delete a ref. No-op if it does not exist.
    fn delete_ref(&self, name: &RefName) -> Result<(), StoreError>;

    /// Atomically apply a batch of ref updates; the whole batch fails
    /// together if any one [`RefEdit`]'s expected-old-id mismatches. Used by
    /// the rolling-compaction metadata swap (C11), which must flip two refs
    /// (primary/secondary) as one unit.
    fn atomic_ref_update(&self, edits: &[RefEdit]) -> Result<(), StoreError>;

    // -----------------------------------------------------------------------
    // Object read
    // -----------------------------------------------------------------------

    /// Return `true` if an object with this id exists in the store.
    fn exists(&self, id: ObjectId) -> bool;

    /// Read the contents of a blob object.
    fn read_blob(&self, id: ObjectId) -> Result<Vec<u8>, StoreError>;

    /// Read the entries of a tree object (one level deep, not recursive).
    fn read_tree(&self, id: ObjectId) -> Result<Vec<TreeEntry>, StoreError>;

    /// Read a commit object's metadata.
    fn read_commit(&self, id: ObjectId) -> Result<CommitInfo, StoreError>;

    // -----------------------------------------------------------------------
    // Object write
    // -----------------------------------------------------------------------

    /// Write a blob to the object store and return its id.
    fn write_blob(&self, data: &[u8]) -> Result<ObjectId, StoreError>;

    /// Write a tree object from a list of entries and return its id.
    fn write_tree(&self, entries: &[TreeEntry]) -> Result<ObjectId, StoreError>;

    /// Write the empty tree, used to seed the first commit of a repository
    /// and as the logical `old` side of a diff against an unborn head.
    fn write_empty_tree(&self) -> Result<ObjectId, StoreError>;

    /// Create a commit object. Does not move any ref — callers advance the
    /// head ref themselves via [`cas_update_head`](Self::cas_update_head)
    /// once the commit-id index record for it is durable (§7c).
    fn create_commit(
        &self,
        tree: ObjectId,
        parent: Option<ObjectId>,
        message: &str,
        author: &str,
        timestamp_ms: i64,
    ) -> Result<ObjectId, StoreError>;

    // -----------------------------------------------------------------------
    // Tree editing
    // -----------------------------------------------------------------------

    /// Apply a set of edits to an existing tree and return the id of the
    /// resulting tree. Edits may target arbitrary nested paths; intermediate
    /// trees are created, rewritten, or pruned as needed.
    fn edit_tree(&self, base: ObjectId, edits: &[TreeEdit]) -> Result<ObjectId, StoreError>;

    // -----------------------------------------------------------------------
    // Diff
    // -----------------------------------------------------------------------

    /// Diff two trees and return the flat, rename-blind list of changed
    /// blob paths in lexicographic order. If `old` is `None`, every blob in
    /// `new` is reported as an addition.
    fn diff_trees(&self, old: Option<ObjectId>, new: ObjectId) -> Result<Vec<DiffEntry>, StoreError>;
}
