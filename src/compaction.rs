//! Rolling/online compaction (C11): primary/secondary physical object
//! stores under one repository directory, swapped via an atomically
//! rewritten metadata file.

use std::fs;
use std::path::{Path, PathBuf};

use cd_core::differ;
use cd_git::commit_index::CommitIndex;
use cd_git::{GixRepo, ObjectId, ObjectStore, RefName, TreeEdit};

use crate::error::CentralDogmaError;

/// The head ref every physical store uses, matching the on-disk layout
/// (§6): `refs/heads/master`.
const HEAD_REF: &str = "refs/heads/master";
const SUFFIX_WIDTH: usize = 10;

/// One physical, bare object store plus its own commit-id index, addressed
/// by the absolute repository revision its local revision 1 corresponds to.
pub struct PhysicalStore {
    store: GixRepo,
    index: CommitIndex,
    suffix: String,
    /// The absolute repository revision this store's local revision 1 maps
    /// to. `1` for a repository's original (never-compacted) primary.
    first_revision: u64,
}

impl PhysicalStore {
    fn open(root: &Path, root_name: &str, suffix: &str, first_revision: u64) -> Result<Self, CentralDogmaError> {
        let dir = root.join(format!("{root_name}_{suffix}"));
        fs::create_dir_all(&dir)?;
        let store = GixRepo::init(&dir)?;
        let index = CommitIndex::open(&dir.join("commit_ids.dat"))?;
        fs::write(dir.join("first_revision.dat"), first_revision.to_string())?;
        Ok(Self {
            store,
            index,
            suffix: suffix.to_owned(),
            first_revision,
        })
    }

    fn reopen(root: &Path, root_name: &str, suffix: &str) -> Result<Self, CentralDogmaError> {
        let dir = root.join(format!("{root_name}_{suffix}"));
        let store = GixRepo::init(&dir)?;
        let index = CommitIndex::open(&dir.join("commit_ids.dat"))?;
        let first_revision = fs::read_to_string(dir.join("first_revision.dat"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(1);
        Ok(Self {
            store,
            index,
            suffix: suffix.to_owned(),
            first_revision,
        })
    }

    fn head_ref(&self) -> RefName {
        RefName::new(HEAD_REF).expect("HEAD_REF is a valid ref name")
    }

    fn local_revision(&self, absolute: u64) -> Option<u64> {
        absolute.checked_sub(self.first_revision).map(|n| n + 1)
    }

    fn absolute_revision(&self, local: u64) -> u64 {
        local + self.first_revision - 1
    }

    /// Current absolute head revision of this store, or its `first_revision
    /// - 1` (no commits recorded yet) if freshly seeded.
    fn head_revision(&self) -> u64 {
        self.index
            .head()
            .map_or(self.first_revision.saturating_sub(1), |local| {
                self.absolute_revision(local)
            })
    }
}

fn read_metadata(path: &Path) -> Option<String> {
    let raw = fs::read(path).ok()?;
    let text = String::from_utf8(raw).ok()?;
    let trimmed = text.trim().to_owned();
    (trimmed.len() == SUFFIX_WIDTH).then_some(trimmed)
}

fn write_metadata(path: &Path, suffix: &str) -> Result<(), CentralDogmaError> {
    assert_eq!(suffix.len(), SUFFIX_WIDTH, "suffix must be exactly 10 ASCII bytes");
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, suffix)?;
    let file = fs::File::open(&tmp)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn format_suffix(n: u64) -> String {
    format!("{n:0width$}", width = SUFFIX_WIDTH)
}

/// Owns the primary (and, during a rolling window, secondary) physical
/// store for one repository, and the metadata file that records which
/// suffix is active.
pub struct RollingStore {
    root: PathBuf,
    root_name: String,
    metadata_path: PathBuf,
    primary: PhysicalStore,
    secondary: Option<PhysicalStore>,
    commit_threshold: u64,
    next_suffix_ordinal: u64,
}

impl RollingStore {
    /// Open (or initialize) the rolling store rooted at `root`.
    ///
    /// # Errors
    /// Propagates any I/O or object-store failure opening the metadata file
    /// or the primary physical store.
    pub fn open(root: &Path, root_name: &str, commit_threshold: u64) -> Result<Self, CentralDogmaError> {
        fs::create_dir_all(root)?;
        let metadata_path = root.join("metadata.dat");

        let suffix = match read_metadata(&metadata_path) {
            Some(suffix) => suffix,
            None => {
                let suffix = format_suffix(1);
                write_metadata(&metadata_path, &suffix)?;
                suffix
            }
        };

        let primary = PhysicalStore::reopen(root, root_name, &suffix)?;
        let next_suffix_ordinal = suffix.parse::<u64>().unwrap_or(1) + 1;

        Ok(Self {
            root: root.to_owned(),
            root_name: root_name.to_owned(),
            metadata_path,
            primary,
            secondary: None,
            commit_threshold,
            next_suffix_ordinal,
        })
    }

    /// The object store commits should be written against.
    #[must_use]
    pub fn primary_object_store(&self) -> &dyn ObjectStore {
        &self.primary.store
    }

    /// Borrow the primary's object store and commit-id index together,
    /// split so a caller can pass both into `cd_core::staging::commit`
    /// without fighting the borrow checker over two accessors on `&mut self`.
    pub fn primary_parts_mut(&mut self) -> (&dyn ObjectStore, &mut CommitIndex) {
        (&self.primary.store, &mut self.primary.index)
    }

    /// The ref name commits advance on the primary store.
    #[must_use]
    pub fn primary_head_ref(&self) -> RefName {
        self.primary.head_ref()
    }

    /// Current absolute head revision.
    #[must_use]
    pub fn head_revision(&self) -> u64 {
        self.primary.head_revision()
    }

    /// The oldest revision this store can currently resolve.
    #[must_use]
    pub fn first_revision(&self) -> u64 {
        self.primary.first_revision
    }

    /// Resolve an absolute revision to its commit id, honoring the
    /// compaction window.
    ///
    /// # Errors
    /// Returns [`CentralDogmaError::RevisionNotFound`] if `revision` predates
    /// [`first_revision`](Self::first_revision), including the currently
    /// retained first revision in the message (§4.11).
    pub fn get_commit_id(&self, revision: u64) -> Result<ObjectId, CentralDogmaError> {
        let Some(local) = self.primary.local_revision(revision) else {
            return Err(CentralDogmaError::RevisionNotFound {
                requested: revision.try_into().unwrap_or(i64::MAX),
                first_retained: Some(self.primary.first_revision),
            });
        };
        Ok(self.primary.index.get(local)?)
    }

    /// `true` once the primary has accumulated `commit_threshold` commits
    /// since its own first revision and no secondary is active yet.
    #[must_use]
    pub fn should_start_secondary(&self) -> bool {
        self.secondary.is_none()
            && self.head_revision().saturating_sub(self.primary.first_revision) + 1
                >= self.commit_threshold
    }

    /// Create a secondary physical store seeded with a full copy of the
    /// tree at the current head, so it is independently resolvable starting
    /// at the current head revision onward.
    ///
    /// # Errors
    /// Propagates any I/O or object-store failure while seeding the
    /// secondary.
    pub fn start_secondary(&mut self) -> Result<(), CentralDogmaError> {
        let head_revision = self.head_revision();
        let head_commit_id = self.get_commit_id(head_revision)?;
        let head_tree = self.primary.store.read_commit(head_commit_id)?.tree_id;

        let suffix = format_suffix(self.next_suffix_ordinal);
        self.next_suffix_ordinal += 1;
        let mut secondary = PhysicalStore::open(&self.root, &self.root_name, &suffix, head_revision)?;

        let seeded_tree = copy_tree(&self.primary.store, &secondary.store, head_tree)?;
        let commit_id = secondary.store.create_commit(
            seeded_tree,
            None,
            "{\"summary\":\"compaction checkpoint\",\"detail\":\"\",\"markup\":\"PLAINTEXT\",\"revision\":0}",
            "centraldogma-compaction <compaction@centraldogma>",
            0,
        )?;
        secondary.index.put(1, commit_id)?;
        secondary
            .store
            .cas_update_head(&secondary.head_ref(), commit_id, ObjectId::ZERO, "compaction checkpoint")?;

        tracing::info!(
            suffix = secondary.suffix,
            first_revision = head_revision,
            "started secondary compaction store"
        );
        self.secondary = Some(secondary);
        Ok(())
    }

    /// Mirror a just-landed primary commit into the active secondary, if
    /// any, then promote the secondary to primary once it has accumulated
    /// its own minimum retention window.
    ///
    /// # Errors
    /// Propagates any I/O or object-store failure while mirroring.
    pub fn mirror_commit(
        &mut self,
        absolute_revision: u64,
        new_tree: ObjectId,
        message: &str,
        author: &str,
        timestamp_ms: i64,
    ) -> Result<(), CentralDogmaError> {
        let Some(secondary) = &mut self.secondary else {
            return Ok(());
        };

        let mirrored_tree = copy_tree(&self.primary.store, &secondary.store, new_tree)?;
        let parent = secondary.store.read_head(&secondary.head_ref())?;
        let commit_id =
            secondary
                .store
                .create_commit(mirrored_tree, parent, message, author, timestamp_ms)?;
        let local_revision = secondary
            .local_revision(absolute_revision)
            .expect("mirror_commit only runs for revisions at or after the secondary's start");
        secondary.index.put(local_revision, commit_id)?;
        secondary
            .store
            .cas_update_head(&secondary.head_ref(), commit_id, parent.unwrap_or(ObjectId::ZERO), "mirror")?;

        if local_revision >= self.commit_threshold {
            self.promote()?;
        }
        Ok(())
    }

    /// Swap the secondary in as primary, renaming the old primary's
    /// directory with a `.removed` suffix. Preserves the invariant that
    /// every revision in `[new_first_revision, head]` remains resolvable.
    ///
    /// # Errors
    /// Propagates any I/O failure renaming the old primary directory or
    /// rewriting the metadata file.
    pub fn promote(&mut self) -> Result<(), CentralDogmaError> {
        let Some(new_primary) = self.secondary.take() else {
            return Ok(());
        };

        let old_dir = self.root.join(format!("{}_{}", self.root_name, self.primary.suffix));
        let removed_dir = self
            .root
            .join(format!("{}_{}.removed", self.root_name, self.primary.suffix));
        fs::rename(&old_dir, &removed_dir)?;

        write_metadata(&self.metadata_path, &new_primary.suffix)?;

        tracing::info!(
            old_first = self.primary.first_revision,
            new_first = new_primary.first_revision,
            "promoted secondary compaction store to primary"
        );
        self.primary = new_primary;
        Ok(())
    }
}

/// Recursively copy every blob under `tree` from `source` into `dest`,
/// rebuilding an equivalent tree there, and return the new tree's id.
fn copy_tree(source: &dyn ObjectStore, dest: &dyn ObjectStore, tree: ObjectId) -> Result<ObjectId, CentralDogmaError> {
    let entries = differ::snapshot(source, tree, None)?;
    let base = dest.write_empty_tree()?;
    let edits: Vec<TreeEdit> = entries
        .into_iter()
        .filter_map(|entry| entry.blob_id.map(|blob_id| (entry.path, blob_id)))
        .map(|(path, blob_id)| -> Result<TreeEdit, CentralDogmaError> {
            let bytes = source.read_blob(blob_id)?;
            let id = dest.write_blob(&bytes)?;
            Ok(TreeEdit::Upsert { path, id })
        })
        .collect::<Result<_, _>>()?;
    Ok(dest.edit_tree(base, &edits)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_initializes_metadata_and_primary() {
        let dir = tempfile::tempdir().unwrap();
        let rolling = RollingStore::open(dir.path(), "repo", 100).unwrap();
        assert_eq!(rolling.first_revision(), 1);
        assert!(dir.path().join("metadata.dat").exists());
    }

    #[test]
    fn reopen_resumes_from_existing_metadata() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut rolling = RollingStore::open(dir.path(), "repo", 100).unwrap();
            let tree = rolling.primary.store.write_empty_tree().unwrap();
            let commit = rolling
                .primary
                .store
                .create_commit(tree, None, "{}", "a <a@example.com>", 0)
                .unwrap();
            rolling.primary.index.put(1, commit).unwrap();
            rolling
                .primary
                .store
                .cas_update_head(&rolling.primary_head_ref(), commit, ObjectId::ZERO, "init")
                .unwrap();
        }

        let reopened = RollingStore::open(dir.path(), "repo", 100).unwrap();
        assert_eq!(reopened.head_revision(), 1);
    }

    #[test]
    fn revision_before_first_retained_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut rolling = RollingStore::open(dir.path(), "repo", 100).unwrap();
        rolling.primary.first_revision = 50;
        let err = rolling.get_commit_id(10).unwrap_err();
        assert!(matches!(
            err,
            CentralDogmaError::RevisionNotFound {
                first_retained: Some(50),
                ..
            }
        ));
    }

    #[test]
    fn start_secondary_seeds_from_current_head() {
        let dir = tempfile::tempdir().unwrap();
        let mut rolling = RollingStore::open(dir.path(), "repo", 100).unwrap();
        let blob = rolling.primary.store.write_blob(b"hi").unwrap();
        let base = rolling.primary.store.write_empty_tree().unwrap();
        let tree = rolling
            .primary
            .store
            .edit_tree(base, &[TreeEdit::Upsert { path: "a.json".to_owned(), id: blob }])
            .unwrap();
        let commit = rolling
            .primary
            .store
            .create_commit(tree, None, "{}", "a <a@example.com>", 0)
            .unwrap();
        rolling.primary.index.put(1, commit).unwrap();
        rolling
            .primary
            .store
            .cas_update_head(&rolling.primary_head_ref(), commit, ObjectId::ZERO, "init")
            .unwrap();

        rolling.start_secondary().unwrap();
        let secondary = rolling.secondary.as_ref().unwrap();
        assert_eq!(secondary.first_revision, 1);
        let entries = differ::snapshot(&secondary.store, secondary.store.read_commit(
            secondary.store.read_head(&secondary.head_ref()).unwrap().unwrap()
        ).unwrap().tree_id, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "a.json");
    }
}
