//! Dense `revision -> commit id` index (C2).
//!
//! Constant-time lookup without walking parent links. The on-disk format is
//! fixed-width records of `(revision: u32 BE, hash: 20 bytes)`, appended in
//! strict revision order starting at revision 1. File length must always
//! equal `RECORD_SIZE * head_revision`; on open, a mismatch triggers a
//! rebuild from the commit DAG (walking from the current head back to the
//! root) rather than a hard failure.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::repo::ObjectStore;
use crate::types::ObjectId;

const REVISION_BYTES: usize = 4;
const HASH_BYTES: usize = 20;
const RECORD_SIZE: u64 = (REVISION_BYTES + HASH_BYTES) as u64;

/// Errors specific to the commit-id index, distinct from the general
/// [`StoreError`] taxonomy because a corrupt index is always locally
/// recoverable (rebuild from the DAG) rather than fatal.
#[derive(Debug, thiserror::Error)]
pub enum CommitIndexError {
    /// The revision requested is outside `[first(), head()]`.
    #[error("revision {0} is outside the indexed range")]
    RevisionNotFound(u64),

    /// `put` was called with a revision that does not immediately follow
    /// the current head (the index only ever appends contiguously).
    #[error("non-contiguous put: index head is {head:?}, attempted revision {attempted}")]
    NonContiguous {
        /// Current head revision, or `None` if the index is empty.
        head: Option<u64>,
        /// The revision that was rejected.
        attempted: u64,
    },

    /// I/O failure reading or writing the index file.
    #[error("commit-id index I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The index was corrupt and could not be rebuilt from the DAG either.
    #[error("commit-id index unrecoverable: {0}")]
    Unrecoverable(String),
}

/// The on-disk, append-only commit-id index for one repository.
pub struct CommitIndex {
    path: PathBuf,
    /// Cached record count (== head revision, since revisions start at 1).
    len: u64,
}

impl CommitIndex {
    /// Open the index at `path`, creating an empty one if it does not exist.
    /// Does not validate against the DAG — call
    /// [`verify_or_rebuild`](Self::verify_or_rebuild) for that.
    pub fn open(path: &Path) -> Result<Self, CommitIndexError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        let file_len = file.metadata()?.len();
        let len = file_len / RECORD_SIZE;
        Ok(Self {
            path: path.to_owned(),
            len,
        })
    }

    /// Revision of the most recent entry, or `None` if the index is empty.
    #[must_use]
    pub fn head(&self) -> Option<u64> {
        (self.len > 0).then_some(self.len)
    }

    /// Revision of the oldest entry, or `None` if the index is empty.
    /// Revisions are always contiguous starting at 1, so this is `1` for any
    /// non-empty index — a rolling store with a truncated prefix (C11) tracks
    /// its own window separately rather than rewriting this index.
    #[must_use]
    pub fn first(&self) -> Option<u64> {
        (self.len > 0).then_some(1)
    }

    /// Look up the commit id stored for `revision`.
    ///
    /// # Errors
    /// Returns [`CommitIndexError::RevisionNotFound`] if `revision` is 0 or
    /// greater than [`head`](Self::head).
    pub fn get(&self, revision: u64) -> Result<ObjectId, CommitIndexError> {
        if revision == 0 || revision > self.len {
            return Err(CommitIndexError::RevisionNotFound(revision));
        }
        let mut file = File::open(&self.path)?;
        let offset = (revision - 1) * RECORD_SIZE;
        file.seek(SeekFrom::Start(offset))?;
        let mut record = [0u8; RECORD_SIZE as usize];
        file.read_exact(&mut record)?;
        let stored_revision = u32::from_be_bytes(record[..REVISION_BYTES].try_into().unwrap());
        if u64::from(stored_revision) != revision {
            return Err(CommitIndexError::Unrecoverable(format!(
                "record at offset {offset} claims revision {stored_revision}, expected {revision}"
            )));
        }
        let mut hash = [0u8; HASH_BYTES];
        hash.copy_from_slice(&record[REVISION_BYTES..]);
        Ok(ObjectId::from_bytes(hash))
    }

    /// Append exactly one record for `revision`, fsyncing before returning.
    ///
    /// Callers must advance the head ref only *after* this call returns
    /// successfully (§7c / §4.2): the index append is the durability point,
    /// and the ref is the visibility point.
    ///
    /// # Errors
    /// Returns [`CommitIndexError::NonContiguous`] if `revision` does not
    /// immediately follow the current head.
    pub fn put(&mut self, revision: u64, id: ObjectId) -> Result<(), CommitIndexError> {
        let expected = self.len + 1;
        if revision != expected {
            return Err(CommitIndexError::NonContiguous {
                head: self.head(),
                attempted: revision,
            });
        }
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        let mut record = [0u8; RECORD_SIZE as usize];
        record[..REVISION_BYTES]
            .copy_from_slice(&u32::try_from(revision).unwrap_or(u32::MAX).to_be_bytes());
        record[REVISION_BYTES..].copy_from_slice(id.as_bytes());
        file.write_all(&record)?;
        file.sync_data()?;
        self.len = revision;
        Ok(())
    }

    /// Rebuild the index from scratch by walking the commit DAG backward from
    /// `head_id`, overwriting any existing file. Used when the on-disk length
    /// doesn't equal `RECORD_SIZE * head_revision` on open (§4.2).
    pub fn rebuild_from_dag(
        &mut self,
        store: &dyn ObjectStore,
        head_id: ObjectId,
    ) -> Result<(), StoreError> {
        let mut chain = Vec::new();
        let mut cursor = Some(head_id);
        while let Some(id) = cursor {
            let commit = store.read_commit(id)?;
            chain.push(id);
            cursor = commit.parent;
        }
        chain.reverse();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(StoreError::IoError)?;
        for (i, id) in chain.iter().enumerate() {
            let revision = u32::try_from(i + 1).unwrap_or(u32::MAX);
            let mut record = [0u8; RECORD_SIZE as usize];
            record[..REVISION_BYTES].copy_from_slice(&revision.to_be_bytes());
            record[REVISION_BYTES..].copy_from_slice(id.as_bytes());
            file.write_all(&record).map_err(StoreError::IoError)?;
        }
        file.sync_data().map_err(StoreError::IoError)?;
        self.len = chain.len() as u64;
        Ok(())
    }

    /// Validate the index length against `head_revision` and rebuild from the
    /// DAG if it does not match (§4.2). `head_id` is the commit the head ref
    /// currently points to.
    pub fn verify_or_rebuild(
        &mut self,
        store: &dyn ObjectStore,
        head_revision: u64,
        head_id: ObjectId,
    ) -> Result<(), StoreError> {
        if self.len == head_revision {
            return Ok(());
        }
        tracing::warn!(
            indexed = self.len,
            expected = head_revision,
            "commit-id index length mismatch, rebuilding from commit DAG"
        );
        self.rebuild_from_dag(store, head_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(byte: u8) -> ObjectId {
        ObjectId::from_bytes([byte; 20])
    }

    #[test]
    fn empty_index_has_no_head() {
        let dir = tempfile::tempdir().unwrap();
        let index = CommitIndex::open(&dir.path().join("commits.idx")).unwrap();
        assert_eq!(index.head(), None);
        assert_eq!(index.first(), None);
    }

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CommitIndex::open(&dir.path().join("commits.idx")).unwrap();
        index.put(1, oid(0xaa)).unwrap();
        index.put(2, oid(0xbb)).unwrap();
        assert_eq!(index.head(), Some(2));
        assert_eq!(index.first(), Some(1));
        assert_eq!(index.get(1).unwrap(), oid(0xaa));
        assert_eq!(index.get(2).unwrap(), oid(0xbb));
    }

    #[test]
    fn get_out_of_range_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CommitIndex::open(&dir.path().join("commits.idx")).unwrap();
        index.put(1, oid(0xaa)).unwrap();
        assert!(matches!(
            index.get(0),
            Err(CommitIndexError::RevisionNotFound(0))
        ));
        assert!(matches!(
            index.get(2),
            Err(CommitIndexError::RevisionNotFound(2))
        ));
    }

    #[test]
    fn put_rejects_non_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CommitIndex::open(&dir.path().join("commits.idx")).unwrap();
        index.put(1, oid(0xaa)).unwrap();
        assert!(matches!(
            index.put(3, oid(0xcc)),
            Err(CommitIndexError::NonContiguous { attempted: 3, .. })
        ));
    }

    #[test]
    fn reopen_reads_persisted_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commits.idx");
        {
            let mut index = CommitIndex::open(&path).unwrap();
            index.put(1, oid(0xaa)).unwrap();
            index.put(2, oid(0xbb)).unwrap();
        }
        let index = CommitIndex::open(&path).unwrap();
        assert_eq!(index.head(), Some(2));
    }
}
