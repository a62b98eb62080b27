//! Tree diffing above the raw object store (C6): full-tree snapshot walks,
//! pair diffs with rename synthesis, and path-pattern filtering.

use cd_git::{ChangeKind as StoreChangeKind, EntryKind, ObjectId, ObjectStore};

use crate::error::CoreError;
use crate::pattern::PathPattern;

/// The kind of change a higher-layer diff reports, after rename synthesis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// Entry exists in the new tree only.
    Added,
    /// Entry's content differs between the old and new tree.
    Modified,
    /// Entry exists in the old tree only (and was not matched to an add).
    Removed,
    /// A delete and an add with the identical blob id, synthesized as a move.
    Renamed,
}

/// A single path-level change, surfaced to callers of [`diff`] and
/// [`preview`], and to the watch subsystem after a commit lands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    /// Path of the changed entry (the destination path for a rename).
    pub path: String,
    /// What kind of change occurred.
    pub kind: ChangeKind,
    /// The change's previous path, set only for [`ChangeKind::Renamed`].
    pub old_path: Option<String>,
    /// Id of the old blob (`None` for additions).
    pub old_id: Option<ObjectId>,
    /// Id of the new blob (`None` for removals).
    pub new_id: Option<ObjectId>,
}

/// One entry surfaced by [`snapshot`]: a blob, or a directory explicitly
/// listed by the walk's pattern (§3 "DIRECTORY emitted when explicitly
/// matched").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Slash-separated path relative to the tree root.
    pub path: String,
    /// Id of the blob at this path, or `None` if this entry is a directory.
    pub blob_id: Option<ObjectId>,
}

/// Recursively enumerate every blob under `tree`, in lexicographic path
/// order, optionally filtered by `pattern`. A directory also appears in the
/// output if `pattern` lists its path explicitly (see
/// [`PathPattern::matches_directory`]).
///
/// # Errors
/// Returns [`CoreError::Backend`] if the object store fails to read a tree
/// or blob entry.
pub fn snapshot(
    store: &dyn ObjectStore,
    tree: ObjectId,
    pattern: Option<&PathPattern>,
) -> Result<Vec<SnapshotEntry>, CoreError> {
    let mut out = Vec::new();
    walk(store, tree, "", pattern, &mut out)?;
    Ok(out)
}

fn walk(
    store: &dyn ObjectStore,
    tree: ObjectId,
    prefix: &str,
    pattern: Option<&PathPattern>,
    out: &mut Vec<SnapshotEntry>,
) -> Result<(), CoreError> {
    let entries = store.read_tree(tree)?;
    for entry in entries {
        let path = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{prefix}/{}", entry.name)
        };
        match entry.kind {
            EntryKind::Blob => {
                if pattern.is_none_or(|p| p.matches(&format!("/{path}"))) {
                    out.push(SnapshotEntry {
                        path,
                        blob_id: Some(entry.id),
                    });
                }
            }
            EntryKind::Tree => {
                if pattern.is_some_and(|p| p.matches_directory(&format!("/{path}"))) {
                    out.push(SnapshotEntry {
                        path: path.clone(),
                        blob_id: None,
                    });
                }
                walk(store, entry.id, &path, pattern, out)?;
            }
        }
    }
    Ok(())
}

/// Diff two trees (`old` may be `None`, treated as the empty tree), apply
/// rename synthesis, and filter by `pattern`.
///
/// Rename synthesis is deliberately simple (§4.6/SPEC_FULL): a delete and an
/// add are paired into a rename only if they carry the *identical* blob id.
/// Content changes alongside a move are never recognized as a rename — they
/// surface as a separate remove/add pair.
///
/// # Errors
/// Returns [`CoreError::Backend`] if the underlying object-store diff fails.
pub fn diff(
    store: &dyn ObjectStore,
    old: Option<ObjectId>,
    new: ObjectId,
    pattern: Option<&PathPattern>,
) -> Result<Vec<Change>, CoreError> {
    let raw = store.diff_trees(old, new)?;

    let mut added: Vec<(String, ObjectId)> = Vec::new();
    let mut removed: Vec<(String, ObjectId)> = Vec::new();
    let mut modified = Vec::new();

    for entry in raw {
        match entry.kind {
            StoreChangeKind::Added => {
                added.push((entry.path, entry.new_id.expect("added entries carry new_id")));
            }
            StoreChangeKind::Deleted => {
                removed.push((entry.path, entry.old_id.expect("deleted entries carry old_id")));
            }
            StoreChangeKind::Modified => modified.push(Change {
                path: entry.path,
                kind: ChangeKind::Modified,
                old_path: None,
                old_id: entry.old_id,
                new_id: entry.new_id,
            }),
        }
    }

    let mut changes = modified;
    let mut used_adds = vec![false; added.len()];

    for (old_path, old_id) in removed {
        let synthesized = added
            .iter()
            .enumerate()
            .find(|(i, (_, id))| !used_adds[*i] && *id == old_id);

        if let Some((idx, (new_path, new_id))) = synthesized {
            used_adds[idx] = true;
            changes.push(Change {
                path: new_path.clone(),
                kind: ChangeKind::Renamed,
                old_path: Some(old_path),
                old_id: Some(old_id),
                new_id: Some(*new_id),
            });
        } else {
            changes.push(Change {
                path: old_path,
                kind: ChangeKind::Removed,
                old_path: None,
                old_id: Some(old_id),
                new_id: None,
            });
        }
    }

    for (idx, (path, id)) in added.into_iter().enumerate() {
        if used_adds[idx] {
            continue;
        }
        changes.push(Change {
            path,
            kind: ChangeKind::Added,
            old_path: None,
            old_id: None,
            new_id: Some(id),
        });
    }

    changes.sort_by(|a, b| a.path.cmp(&b.path));

    if let Some(pattern) = pattern {
        changes.retain(|c| pattern.matches(&format!("/{}", c.path)));
    }

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cd_git::{GixRepo, TreeEdit};

    fn store() -> GixRepo {
        let dir = tempfile::tempdir().unwrap();
        GixRepo::init(dir.path()).unwrap()
    }

    #[test]
    fn snapshot_walks_nested_trees_in_order() {
        let store = store();
        let base = store.write_empty_tree().unwrap();
        let blob = store.write_blob(b"x").unwrap();
        let tree = store
            .edit_tree(
                base,
                &[
                    TreeEdit::Upsert {
                        path: "b.json".to_owned(),
                        id: blob,
                    },
                    TreeEdit::Upsert {
                        path: "a/c.json".to_owned(),
                        id: blob,
                    },
                ],
            )
            .unwrap();

        let entries = snapshot(&store, tree, None).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a/c.json", "b.json"]);
    }

    #[test]
    fn snapshot_surfaces_an_explicitly_listed_directory() {
        let store = store();
        let base = store.write_empty_tree().unwrap();
        let blob = store.write_blob(b"x").unwrap();
        let tree = store
            .edit_tree(
                base,
                &[TreeEdit::Upsert {
                    path: "a/b.json".to_owned(),
                    id: blob,
                }],
            )
            .unwrap();

        let pattern = PathPattern::new("/a").unwrap();
        let entries = snapshot(&store, tree, Some(&pattern)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "a");
        assert_eq!(entries[0].blob_id, None);
    }

    #[test]
    fn snapshot_does_not_surface_a_directory_matched_only_by_a_wildcard() {
        let store = store();
        let base = store.write_empty_tree().unwrap();
        let blob = store.write_blob(b"x").unwrap();
        let tree = store
            .edit_tree(
                base,
                &[TreeEdit::Upsert {
                    path: "a/b.json".to_owned(),
                    id: blob,
                }],
            )
            .unwrap();

        let pattern = PathPattern::new("/a/**").unwrap();
        let entries = snapshot(&store, tree, Some(&pattern)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "a/b.json");
    }

    #[test]
    fn diff_synthesizes_rename_on_identical_blob() {
        let store = store();
        let base = store.write_empty_tree().unwrap();
        let blob = store.write_blob(b"content").unwrap();

        let old_tree = store
            .edit_tree(
                base,
                &[TreeEdit::Upsert {
                    path: "old.json".to_owned(),
                    id: blob,
                }],
            )
            .unwrap();
        let new_tree = store
            .edit_tree(
                old_tree,
                &[
                    TreeEdit::Remove {
                        path: "old.json".to_owned(),
                    },
                    TreeEdit::Upsert {
                        path: "new.json".to_owned(),
                        id: blob,
                    },
                ],
            )
            .unwrap();

        let changes = diff(&store, Some(old_tree), new_tree, None).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Renamed);
        assert_eq!(changes[0].path, "new.json");
        assert_eq!(changes[0].old_path.as_deref(), Some("old.json"));
    }

    #[test]
    fn diff_does_not_synthesize_rename_with_content_change() {
        let store = store();
        let base = store.write_empty_tree().unwrap();
        let blob_a = store.write_blob(b"a").unwrap();
        let blob_b = store.write_blob(b"b").unwrap();

        let old_tree = store
            .edit_tree(
                base,
                &[TreeEdit::Upsert {
                    path: "old.json".to_owned(),
                    id: blob_a,
                }],
            )
            .unwrap();
        let new_tree = store
            .edit_tree(
                old_tree,
                &[
                    TreeEdit::Remove {
                        path: "old.json".to_owned(),
                    },
                    TreeEdit::Upsert {
                        path: "new.json".to_owned(),
                        id: blob_b,
                    },
                ],
            )
            .unwrap();

        let changes = diff(&store, Some(old_tree), new_tree, None).unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().any(|c| c.kind == ChangeKind::Removed));
        assert!(changes.iter().any(|c| c.kind == ChangeKind::Added));
    }

    #[test]
    fn diff_respects_pattern_filter() {
        let store = store();
        let base = store.write_empty_tree().unwrap();
        let blob = store.write_blob(b"x").unwrap();
        let new_tree = store
            .edit_tree(
                base,
                &[
                    TreeEdit::Upsert {
                        path: "a.json".to_owned(),
                        id: blob,
                    },
                    TreeEdit::Upsert {
                        path: "b.txt".to_owned(),
                        id: blob,
                    },
                ],
            )
            .unwrap();

        let pattern = PathPattern::new("/*.json").unwrap();
        let changes = diff(&store, None, new_tree, Some(&pattern)).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "a.json");
    }
}
