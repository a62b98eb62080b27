//! The Central Dogma data model (§3): paths, entries, revisions, commits,
//! and the write-side change vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// EntityPath
// ---------------------------------------------------------------------------

/// A validated entity path: starts with `/`, UTF-8, no `\r`, and does not
/// end with `/` unless it names the root.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityPath(String);

impl EntityPath {
    /// The root directory path.
    pub const ROOT: &'static str = "/";

    /// Validate and wrap a path string.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidPath`] if the string doesn't start with
    /// `/`, contains a carriage return, or ends with `/` while not being the
    /// literal root.
    pub fn new(path: impl Into<String>) -> Result<Self, CoreError> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(CoreError::InvalidPath {
                path,
                reason: "must start with '/'".to_owned(),
            });
        }
        if path.contains('\r') {
            return Err(CoreError::InvalidPath {
                path,
                reason: "must not contain a carriage return".to_owned(),
            });
        }
        if path != Self::ROOT && path.ends_with('/') {
            return Err(CoreError::InvalidPath {
                path,
                reason: "must not end with '/' unless it is the root".to_owned(),
            });
        }
        Ok(Self(path))
    }

    /// Borrow the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` if this is the root path `/`.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    /// Strip the leading `/` and return the remainder, used as the
    /// slash-separated tree path passed to `cd_git::ObjectStore`.
    #[must_use]
    pub fn tree_path(&self) -> &str {
        self.0.trim_start_matches('/')
    }

    /// `true` if `other` names a path inside the subtree rooted at `self`
    /// (i.e. `other` starts with `self` followed by `/`).
    #[must_use]
    pub fn is_prefix_of(&self, other: &str) -> bool {
        if self.is_root() {
            return true;
        }
        other
            .strip_prefix(self.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// EntityType / content
// ---------------------------------------------------------------------------

/// The kind of content an entry holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    /// Content is a JSON value.
    Json,
    /// Content is sanitized UTF-8 text.
    Text,
    /// No content; the path names a directory.
    Directory,
}

/// The content carried by an [`Entry`].
#[derive(Clone, Debug, PartialEq)]
pub enum EntryContent {
    /// A JSON document.
    Json(Value),
    /// Sanitized text (no `\r`; trailing `\n` if non-empty).
    Text(String),
    /// Directories carry no content.
    None,
}

/// A single read result: `(revision, path, type, content)` (§3).
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    /// The revision this entry was read at.
    pub revision: u64,
    /// The entry's path.
    pub path: EntityPath,
    /// The entry's type.
    pub entry_type: EntityType,
    /// The entry's content.
    pub content: EntryContent,
}

// ---------------------------------------------------------------------------
// Revision
// ---------------------------------------------------------------------------

/// A possibly-relative revision reference (§3).
///
/// Positive values are absolute, starting at 1. Non-positive values are
/// relative to head: `0` and `-1` both mean head; `-n` means `head - (n-1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Revision(i64);

impl Revision {
    /// Wrap a raw revision value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// The raw value, before normalization.
    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Resolve this revision against `head`, producing an absolute revision
    /// in `[1, head]`.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidPath`]-shaped... actually returns a
    /// dedicated not-found style error via the caller; here we just report
    /// out-of-range via `Err(())`-like semantics through `Option`, deferring
    /// the wire-level `RevisionNotFound` kind to the root crate, which owns
    /// the full error enum (§3 SUPPLEMENT).
    #[must_use]
    pub fn normalize(self, head: u64) -> Option<u64> {
        if self.0 > 0 {
            let abs = u64::try_from(self.0).ok()?;
            (abs <= head).then_some(abs)
        } else {
            // 0 and -1 both mean head; -n means head - (n - 1) for n >= 1.
            let n = (-self.0) as u64;
            let back = n.saturating_sub(1);
            head.checked_sub(back).filter(|&abs| abs >= 1)
        }
    }
}

// ---------------------------------------------------------------------------
// Commit envelope
// ---------------------------------------------------------------------------

/// Commit message markup hint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Markup {
    /// Plain text summary/detail.
    #[serde(rename = "PLAINTEXT")]
    Plaintext,
    /// Markdown-formatted summary/detail.
    #[serde(rename = "MARKDOWN")]
    Markdown,
}

/// The JSON envelope stored verbatim as a commit object's message (§6), so a
/// foreign Git tool can recover the commit's human-readable metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommitEnvelope {
    /// One-line summary.
    pub summary: String,
    /// Extended description.
    pub detail: String,
    /// Markup hint for `summary`/`detail`.
    pub markup: Markup,
    /// The revision this commit produced.
    pub revision: u64,
}

impl CommitEnvelope {
    /// Serialize to the literal commit-message JSON form.
    ///
    /// # Errors
    /// Never fails in practice (the type is always representable as JSON);
    /// propagates `serde_json::Error` for callers that want to surface it.
    pub fn to_message(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a commit message back into an envelope.
    ///
    /// # Errors
    /// Returns `serde_json::Error` if the message is not the expected JSON
    /// shape (e.g. a commit written by something other than this crate).
    pub fn from_message(message: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(message)
    }
}

/// A full commit record, as reconstructed from the object store plus its
/// envelope (`Entity Commit`, §3).
#[derive(Clone, Debug, PartialEq)]
pub struct Commit {
    /// The revision this commit represents.
    pub revision: u64,
    /// Author identity string.
    pub author: String,
    /// Commit timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// One-line summary.
    pub summary: String,
    /// Extended description.
    pub detail: String,
    /// Markup hint.
    pub markup: Markup,
    /// The parent revision, or `None` for the initial commit.
    pub parent_revision: Option<u64>,
}

// ---------------------------------------------------------------------------
// JSON patch operations
// ---------------------------------------------------------------------------

/// A single RFC-6902 JSON Patch operation, plus Central Dogma's extensions
/// (§3 Entity JSON Patch).
#[derive(Clone, Debug, PartialEq)]
pub enum JsonPatchOp {
    /// Insert or replace a value at `path`.
    Add { path: String, value: Value },
    /// Remove the value at `path`; errors if absent.
    Remove { path: String },
    /// Remove the value at `path` if present; no-op otherwise.
    RemoveIfExists { path: String },
    /// Replace the value at `path`; errors if absent.
    Replace { path: String, value: Value },
    /// Move the value at `from` to `path`.
    Move { from: String, path: String },
    /// Copy the value at `from` to `path`.
    Copy { from: String, path: String },
    /// Assert the value at `path` is equivalent to `value`.
    Test { path: String, value: Value },
    /// Replace at `path` only if the current value is equivalent to `old`.
    SafeReplace {
        path: String,
        old: Value,
        new: Value,
    },
}

// ---------------------------------------------------------------------------
// Write-side changes
// ---------------------------------------------------------------------------

/// A single requested mutation (`Entity Change`, §3).
#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    /// Insert or replace a JSON entry.
    UpsertJson { path: EntityPath, json: Value },
    /// Insert or replace a text entry.
    UpsertText { path: EntityPath, text: String },
    /// Remove a file, or recursively remove a directory subtree.
    Remove { path: EntityPath },
    /// Rename a file, or recursively rename a directory subtree.
    Rename {
        old_path: EntityPath,
        new_path: EntityPath,
    },
    /// Apply a JSON patch to an existing (or absent-as-null) JSON entry.
    ApplyJsonPatch {
        path: EntityPath,
        patch: Vec<JsonPatchOp>,
    },
    /// Apply a unified-diff text patch to an existing text entry.
    ApplyTextPatch { path: EntityPath, diff: String },
}

impl Change {
    /// The primary path this change targets (the destination path for a
    /// rename).
    #[must_use]
    pub fn path(&self) -> &EntityPath {
        match self {
            Self::UpsertJson { path, .. }
            | Self::UpsertText { path, .. }
            | Self::Remove { path }
            | Self::ApplyJsonPatch { path, .. }
            | Self::ApplyTextPatch { path, .. } => path,
            Self::Rename { new_path, .. } => new_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_path_rejects_missing_leading_slash() {
        assert!(EntityPath::new("a.json").is_err());
    }

    #[test]
    fn entity_path_rejects_trailing_slash_except_root() {
        assert!(EntityPath::new("/a/").is_err());
        assert!(EntityPath::new("/").is_ok());
    }

    #[test]
    fn entity_path_rejects_carriage_return() {
        assert!(EntityPath::new("/a\r.json").is_err());
    }

    #[test]
    fn entity_path_tree_path_strips_leading_slash() {
        let path = EntityPath::new("/a/b.json").unwrap();
        assert_eq!(path.tree_path(), "a/b.json");
    }

    #[test]
    fn entity_path_is_prefix_of() {
        let dir = EntityPath::new("/d").unwrap();
        assert!(dir.is_prefix_of("/d/x.txt"));
        assert!(!dir.is_prefix_of("/dd/x.txt"));
        assert!(!dir.is_prefix_of("/d"));
    }

    #[test]
    fn revision_normalizes_absolute() {
        assert_eq!(Revision::new(3).normalize(5), Some(3));
        assert_eq!(Revision::new(6).normalize(5), None);
    }

    #[test]
    fn revision_normalizes_head_aliases() {
        assert_eq!(Revision::new(0).normalize(5), Some(5));
        assert_eq!(Revision::new(-1).normalize(5), Some(5));
    }

    #[test]
    fn revision_normalizes_relative() {
        assert_eq!(Revision::new(-2).normalize(5), Some(4));
        assert_eq!(Revision::new(-4).normalize(5), Some(2));
    }

    #[test]
    fn revision_relative_underflow_is_none() {
        assert_eq!(Revision::new(-10).normalize(5), None);
    }

    #[test]
    fn commit_envelope_roundtrips_through_json() {
        let envelope = CommitEnvelope {
            summary: "init".to_owned(),
            detail: String::new(),
            markup: Markup::Plaintext,
            revision: 1,
        };
        let message = envelope.to_message().unwrap();
        assert_eq!(
            message,
            "{\"summary\":\"init\",\"detail\":\"\",\"markup\":\"PLAINTEXT\",\"revision\":1}"
        );
        assert_eq!(CommitEnvelope::from_message(&message).unwrap(), envelope);
    }
}
