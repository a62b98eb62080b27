//! The gix-backed implementation of [`ObjectStore`].

use std::path::Path;

use crate::error::StoreError;
use crate::repo::ObjectStore;
use crate::types::*;

/// An [`ObjectStore`](crate::ObjectStore) implementation backed by
/// [gix](https://github.com/GitoxideLabs/gitoxide).
///
/// Always bare: Central Dogma never checks files out into a working
/// directory, so there is no index, no worktree, and no `.gitignore`
/// machinery to reason about (§4.1).
///
/// Construct via [`GixRepo::open`] or [`GixRepo::init`].
pub struct GixRepo {
    pub(crate) repo: gix::Repository,
}

impl GixRepo {
    /// Open an existing bare repository at exactly `path` (no parent-directory
    /// discovery, no reading of global/system git config — isolated, so that
    /// this store behaves identically regardless of the host's git install).
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let repo =
            gix::open_opts(path, gix::open::Options::isolated()).map_err(|e| {
                StoreError::BackendError {
                    message: format!("opening store at {}: {e}", path.display()),
                }
            })?;
        Ok(Self { repo })
    }

    /// Initialize a new bare repository at `path`, creating the directory if
    /// needed. No-op (returns the existing store) if a repository is already
    /// initialized there — local recovery for the idempotent-init race (§7b).
    pub fn init(path: &Path) -> Result<Self, StoreError> {
        if let Ok(repo) = gix::open_opts(path, gix::open::Options::isolated()) {
            return Ok(Self { repo });
        }
        let repo = gix::init_bare(path).map_err(|e| StoreError::BackendError {
            message: format!("initializing store at {}: {e}", path.display()),
        })?;
        Ok(Self { repo })
    }
}

impl ObjectStore for GixRepo {
    // === Head ref ===
    fn read_head(&self, name: &RefName) -> Result<Option<ObjectId>, StoreError> {
        crate::refs_impl::read_ref(self, name)
    }

    fn cas_update_head(
        &self,
        name: &RefName,
        new_id: ObjectId,
        expected_old_id: ObjectId,
        log_message: &str,
    ) -> Result<(), StoreError> {
        crate::refs_impl::write_ref(self, name, new_id, expected_old_id, log_message)
    }

    fn delete_ref(&self, name: &RefName) -> Result<(), StoreError> {
        crate::refs_impl::delete_ref(self, name)
    }

    fn atomic_ref_update(&self, edits: &[RefEdit]) -> Result<(), StoreError> {
        crate::refs_impl::atomic_ref_update(self, edits)
    }

    // === Object read ===
    fn exists(&self, id: ObjectId) -> bool {
        crate::objects_impl::object_exists(self, id)
    }

    fn read_blob(&self, id: ObjectId) -> Result<Vec<u8>, StoreError> {
        crate::objects_impl::read_blob(self, id)
    }

    fn read_tree(&self, id: ObjectId) -> Result<Vec<TreeEntry>, StoreError> {
        crate::objects_impl::read_tree(self, id)
    }

    fn read_commit(&self, id: ObjectId) -> Result<CommitInfo, StoreError> {
        crate::objects_impl::read_commit(self, id)
    }

    // === Object write ===
    fn write_blob(&self, data: &[u8]) -> Result<ObjectId, StoreError> {
        crate::objects_impl::write_blob(self, data)
    }

    fn write_tree(&self, entries: &[TreeEntry]) -> Result<ObjectId, StoreError> {
        crate::objects_impl::write_tree(self, entries)
    }

    fn write_empty_tree(&self) -> Result<ObjectId, StoreError> {
        crate::objects_impl::write_empty_tree(self)
    }

    fn create_commit(
        &self,
        tree: ObjectId,
        parent: Option<ObjectId>,
        message: &str,
        author: &str,
        timestamp_ms: i64,
    ) -> Result<ObjectId, StoreError> {
        crate::objects_impl::create_commit(self, tree, parent, message, author, timestamp_ms)
    }

    // === Tree editing ===
    fn edit_tree(&self, base: ObjectId, edits: &[TreeEdit]) -> Result<ObjectId, StoreError> {
        crate::objects_impl::edit_tree(self, base, edits)
    }

    // === Diff ===
    fn diff_trees(
        &self,
        old: Option<ObjectId>,
        new: ObjectId,
    ) -> Result<Vec<DiffEntry>, StoreError> {
        crate::diff_impl::diff_trees(self, old, new)
    }
}
