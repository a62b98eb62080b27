//! The wire-level error taxonomy (§6/§7): every kind a caller of the
//! repository façade can observe, regardless of which lower crate detected
//! it.

use std::fmt;

/// Errors surfaced by the public `Repository` façade.
#[derive(Debug)]
pub enum CentralDogmaError {
    /// A requested revision does not exist. Carries the first retained
    /// revision when raised after a rolling-compaction boundary (§4.11).
    RevisionNotFound {
        /// The revision that was requested.
        requested: i64,
        /// The oldest revision currently retained, if known.
        first_retained: Option<u64>,
    },

    /// A `find`/`get` lookup found nothing at the given path and revision.
    EntryNotFound {
        /// The path that was not found.
        path: String,
    },

    /// Repository creation was attempted but one already exists at that
    /// location.
    RepositoryExists,

    /// An operation targeted a repository that does not exist.
    RepositoryNotFound,

    /// Reserved passthrough for an external project-metadata collaborator
    /// (§1 Out of scope) — never constructed by this crate, but carried so a
    /// higher layer embedding this core can reuse this enum.
    ProjectExists,

    /// See [`Self::ProjectExists`].
    ProjectNotFound,

    /// A staged change conflicts with repository state (e.g. rename
    /// destination already exists, text patch hunk mismatch upstream).
    ChangeConflict {
        /// Human-readable reason.
        reason: String,
    },

    /// A change-list produced zero net edits and `allow_empty` was false.
    RedundantChange,

    /// The repository is in read-only mode and rejected a write.
    ReadOnly,

    /// An RFC-6902 JSON patch operation failed to apply.
    JsonPatchError {
        /// Index of the offending operation.
        op_index: usize,
        /// Human-readable reason.
        reason: String,
    },

    /// A unified-diff text patch failed to apply.
    PatchConflict {
        /// Human-readable reason.
        reason: String,
    },

    /// The object store or commit-id index reported unrecoverable
    /// corruption (e.g. a missing object during a read, §4.1).
    StorageCorruption {
        /// Human-readable reason.
        reason: String,
    },

    /// An operation's deadline expired before it completed.
    Timeout,

    /// The repository has been, or is being, closed (§4.8/§9); no further
    /// operations are accepted.
    ShuttingDown,

    /// Filesystem I/O failure not otherwise classified.
    Io(std::io::Error),

    /// Configuration file failed to parse.
    Config {
        /// Human-readable reason.
        reason: String,
    },
}

impl fmt::Display for CentralDogmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RevisionNotFound {
                requested,
                first_retained,
            } => match first_retained {
                Some(first) => write!(
                    f,
                    "revision {requested} not found: the oldest retained revision is {first}. \
                     To fix: query at or after revision {first}, or retain a wider compaction \
                     window."
                ),
                None => write!(
                    f,
                    "revision {requested} not found. To fix: query a revision in [1, head]."
                ),
            },
            Self::EntryNotFound { path } => {
                write!(
                    f,
                    "no entry at '{path}'. To fix: check the path exists at this revision \
                     before reading it."
                )
            }
            Self::RepositoryExists => {
                write!(
                    f,
                    "repository already exists. To fix: open the existing repository instead \
                     of creating a new one."
                )
            }
            Self::RepositoryNotFound => {
                write!(
                    f,
                    "repository not found. To fix: create it first, or check the configured \
                     path."
                )
            }
            Self::ProjectExists => write!(f, "project already exists."),
            Self::ProjectNotFound => write!(f, "project not found."),
            Self::ChangeConflict { reason } => {
                write!(
                    f,
                    "change conflicts with repository state: {reason}. To fix: resolve the \
                     conflict and resubmit."
                )
            }
            Self::RedundantChange => {
                write!(
                    f,
                    "change list produced no net edits. To fix: pass allow_empty if an empty \
                     commit is intentional."
                )
            }
            Self::ReadOnly => {
                write!(
                    f,
                    "repository is read-only. To fix: disable read_only in the repository \
                     configuration before writing."
                )
            }
            Self::JsonPatchError { op_index, reason } => {
                write!(f, "JSON patch operation #{op_index} failed: {reason}.")
            }
            Self::PatchConflict { reason } => {
                write!(f, "text patch could not be applied: {reason}.")
            }
            Self::StorageCorruption { reason } => {
                write!(
                    f,
                    "storage corruption detected: {reason}. To fix: restore from a backup or \
                     rebuild the affected index."
                )
            }
            Self::Timeout => write!(f, "operation deadline expired."),
            Self::ShuttingDown => {
                write!(f, "repository is closing; no further operations are accepted.")
            }
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Config { reason } => write!(f, "invalid configuration: {reason}."),
        }
    }
}

impl std::error::Error for CentralDogmaError {}

impl From<std::io::Error> for CentralDogmaError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<cd_git::StoreError> for CentralDogmaError {
    fn from(err: cd_git::StoreError) -> Self {
        match err {
            cd_git::StoreError::NotFound { message } => Self::StorageCorruption { reason: message },
            cd_git::StoreError::IndexCorrupt { message } => {
                Self::StorageCorruption { reason: message }
            }
            cd_git::StoreError::RefConflict { ref_name, message } => Self::ChangeConflict {
                reason: format!("ref '{ref_name}' conflict: {message}"),
            },
            cd_git::StoreError::InvalidOid { value, reason } => {
                Self::StorageCorruption {
                    reason: format!("invalid object id '{value}': {reason}"),
                }
            }
            cd_git::StoreError::IoError(err) => Self::Io(err),
            cd_git::StoreError::BackendError { message } => {
                Self::StorageCorruption { reason: message }
            }
        }
    }
}

impl From<cd_git::commit_index::CommitIndexError> for CentralDogmaError {
    fn from(err: cd_git::commit_index::CommitIndexError) -> Self {
        use cd_git::commit_index::CommitIndexError;
        match err {
            CommitIndexError::RevisionNotFound(r) => Self::RevisionNotFound {
                requested: r.try_into().unwrap_or(i64::MAX),
                first_retained: None,
            },
            CommitIndexError::Io(err) => Self::Io(err),
            CommitIndexError::NonContiguous { .. } | CommitIndexError::Unrecoverable(_) => {
                Self::StorageCorruption {
                    reason: err.to_string(),
                }
            }
        }
    }
}

impl From<cd_core::CoreError> for CentralDogmaError {
    fn from(err: cd_core::CoreError) -> Self {
        match err {
            cd_core::CoreError::EntryNotFound { path } => Self::EntryNotFound { path },
            cd_core::CoreError::JsonPatchError { op_index, reason } => {
                Self::JsonPatchError { op_index, reason }
            }
            cd_core::CoreError::PatchConflict { reason } => Self::PatchConflict { reason },
            cd_core::CoreError::ChangeConflict { reason } => Self::ChangeConflict { reason },
            cd_core::CoreError::InvalidPattern { pattern, reason } => Self::ChangeConflict {
                reason: format!("invalid path pattern '{pattern}': {reason}"),
            },
            cd_core::CoreError::InvalidPath { path, reason } => Self::ChangeConflict {
                reason: format!("invalid entity path '{path}': {reason}"),
            },
            cd_core::CoreError::Backend { reason } => Self::StorageCorruption { reason },
            cd_core::CoreError::RedundantChange => Self::RedundantChange,
        }
    }
}
