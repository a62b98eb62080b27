//! Domain-level errors for path matching, JSON/text patching, and staging.
//!
//! Mirrors the wire-level error kinds named in spec §6 that originate above
//! the object store. Hand-rolled `Display` (rather than `thiserror`) so every
//! message can carry an actionable "To fix:" line, the same convention the
//! root crate's [`centraldogma::error::CentralDogmaError`] uses — `cd-core`
//! is the layer where most user-facing mistakes (bad patch, bad pattern,
//! conflicting rename) are first detected.

use std::fmt;

/// Errors raised by `cd-core`'s matching, patch, diff, and staging engines.
#[derive(Debug)]
pub enum CoreError {
    /// A `find`/`get`-style lookup found nothing at the given path.
    EntryNotFound {
        /// The path that was not found.
        path: String,
    },

    /// A JSON patch operation failed to apply.
    JsonPatchError {
        /// Index of the offending operation within the patch.
        op_index: usize,
        /// Human-readable reason.
        reason: String,
    },

    /// A unified-diff text patch failed to apply (hunk context mismatch).
    PatchConflict {
        /// Human-readable reason, including the hunk that failed.
        reason: String,
    },

    /// A staged change conflicts with another (e.g. rename destination
    /// already exists).
    ChangeConflict {
        /// Human-readable reason.
        reason: String,
    },

    /// A glob path pattern was syntactically invalid.
    InvalidPattern {
        /// The pattern that failed to compile.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A path string violated the Entity Path invariants (§3).
    InvalidPath {
        /// The path that failed validation.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The underlying object store reported a failure while this layer was
    /// diffing, staging, or walking a tree.
    Backend {
        /// Human-readable reason, from the object store's own error.
        reason: String,
    },

    /// A staged change-list produced zero net edits and `allow_empty` was
    /// false (§4.7 step 4).
    RedundantChange,
}

impl From<cd_git::StoreError> for CoreError {
    fn from(err: cd_git::StoreError) -> Self {
        Self::Backend {
            reason: err.to_string(),
        }
    }
}

impl From<cd_git::commit_index::CommitIndexError> for CoreError {
    fn from(err: cd_git::commit_index::CommitIndexError) -> Self {
        Self::Backend {
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntryNotFound { path } => {
                write!(
                    f,
                    "no entry at '{path}'. To fix: check the path exists at this revision \
                     before reading it, or catch this error if absence is expected."
                )
            }
            Self::JsonPatchError { op_index, reason } => {
                write!(
                    f,
                    "JSON patch operation #{op_index} failed: {reason}. To fix: verify the \
                     patch was generated against the same base document, or retry against a \
                     fresh read."
                )
            }
            Self::PatchConflict { reason } => {
                write!(
                    f,
                    "text patch could not be applied: {reason}. To fix: regenerate the diff \
                     against the entry's current content and retry."
                )
            }
            Self::ChangeConflict { reason } => {
                write!(
                    f,
                    "change conflicts with repository state: {reason}. To fix: resolve the \
                     conflict and resubmit the change list."
                )
            }
            Self::InvalidPattern { pattern, reason } => {
                write!(
                    f,
                    "invalid path pattern '{pattern}': {reason}. To fix: use '?' for a single \
                     character, '*' for a path segment, and '**' to cross segments."
                )
            }
            Self::InvalidPath { path, reason } => {
                write!(
                    f,
                    "invalid entity path '{path}': {reason}. To fix: paths must start with '/', \
                     contain no carriage returns, and not end with '/' (except the root)."
                )
            }
            Self::Backend { reason } => {
                write!(
                    f,
                    "object store operation failed: {reason}. To fix: check the repository's \
                     on-disk storage is healthy and retry."
                )
            }
            Self::RedundantChange => {
                write!(
                    f,
                    "change list produced no net edits. To fix: pass allow_empty if an empty \
                     commit is intentional, or drop the redundant change."
                )
            }
        }
    }
}

impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_include_fix_guidance() {
        let err = CoreError::EntryNotFound {
            path: "/a.json".to_owned(),
        };
        assert!(err.to_string().contains("To fix:"));
    }
}
