//! Staging & commit (C7): apply a change-list to a copy-on-write staging
//! tree, then durably persist the resulting commit.

use std::collections::BTreeMap;

use cd_git::commit_index::CommitIndex;
use cd_git::{ObjectId, ObjectStore, RefName, TreeEdit};

use crate::differ;
use crate::error::CoreError;
use crate::json_patch;
use crate::model::{Change, CommitEnvelope, JsonPatchOp, Markup};
use crate::text_patch;

/// Author/summary metadata for a new commit, independent of its content.
#[derive(Clone, Debug)]
pub struct CommitMeta {
    /// Author identity string (`"name <email>"`).
    pub author: String,
    /// Commit timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// One-line summary.
    pub summary: String,
    /// Extended description.
    pub detail: String,
    /// Markup hint for `summary`/`detail`.
    pub markup: Markup,
}

/// The result of a successful commit: the new revision, its commit object
/// id, and the ordered change map for watchers (§4.7 step 6).
#[derive(Debug)]
pub struct CommitOutcome {
    /// The revision the new commit landed at.
    pub revision: u64,
    /// Id of the new commit object.
    pub commit_id: ObjectId,
    /// Id of the new tree.
    pub tree_id: ObjectId,
    /// The pair-diff between the base and new tree, rename-synthesized.
    pub changes: Vec<differ::Change>,
}

/// Stage `changes` against `base_tree` and return `(new_tree, edit_count)`
/// without touching the head ref or commit-id index. Exposed directly so
/// `preview_diff` (§4.8) can run the same staging step without persisting.
///
/// # Errors
/// Returns [`CoreError::EntryNotFound`] if a `REMOVE`/`RENAME` source does
/// not exist, [`CoreError::ChangeConflict`] if a rename's destination
/// already exists, or any JSON/text patch error from an underlying
/// `ApplyJsonPatch`/`ApplyTextPatch` change.
pub fn stage(
    store: &dyn ObjectStore,
    base_tree: ObjectId,
    changes: &[Change],
) -> Result<(ObjectId, usize), CoreError> {
    let snapshot = differ::snapshot(store, base_tree, None)?;
    let mut staged: BTreeMap<String, ObjectId> = snapshot
        .into_iter()
        .filter_map(|e| e.blob_id.map(|id| (e.path, id)))
        .collect();
    let mut edits: Vec<TreeEdit> = Vec::new();

    for change in changes {
        apply_change(store, change, &mut staged, &mut edits)?;
    }

    if edits.is_empty() {
        return Ok((base_tree, 0));
    }
    let new_tree = store.edit_tree(base_tree, &edits)?;
    Ok((new_tree, edits.len()))
}

fn apply_change(
    store: &dyn ObjectStore,
    change: &Change,
    staged: &mut BTreeMap<String, ObjectId>,
    edits: &mut Vec<TreeEdit>,
) -> Result<(), CoreError> {
    match change {
        Change::UpsertJson { path, json } => {
            let key = path.tree_path().to_owned();
            let current = read_json(store, staged.get(&key).copied())?;
            if current.as_ref().is_some_and(|c| json_patch::equivalent(c, json)) {
                return Ok(());
            }
            upsert_blob(store, &key, serde_json::to_vec(json).map_err(to_backend)?, staged, edits)
        }
        Change::UpsertText { path, text } => {
            let key = path.tree_path().to_owned();
            let sanitized = text_patch::sanitize(text);
            let current = read_text(store, staged.get(&key).copied())?;
            if current.as_deref() == Some(sanitized.as_str()) {
                return Ok(());
            }
            upsert_blob(store, &key, sanitized.into_bytes(), staged, edits)
        }
        Change::Remove { path } => remove(path.tree_path(), staged, edits),
        Change::Rename { old_path, new_path } => {
            rename(old_path.tree_path(), new_path.tree_path(), staged, edits)
        }
        Change::ApplyJsonPatch { path, patch } => {
            let key = path.tree_path().to_owned();
            let base = read_json(store, staged.get(&key).copied())?.unwrap_or(serde_json::Value::Null);
            let patched = json_patch::apply(patch, base.clone())?;
            if json_patch::equivalent(&base, &patched) {
                return Ok(());
            }
            upsert_blob(store, &key, serde_json::to_vec(&patched).map_err(to_backend)?, staged, edits)
        }
        Change::ApplyTextPatch { path, diff } => {
            let key = path.tree_path().to_owned();
            let base = read_text(store, staged.get(&key).copied())?.unwrap_or_default();
            let patched = text_patch::apply(&base, diff)?;
            if base == patched {
                return Ok(());
            }
            upsert_blob(store, &key, patched.into_bytes(), staged, edits)
        }
    }
}

fn upsert_blob(
    store: &dyn ObjectStore,
    key: &str,
    bytes: Vec<u8>,
    staged: &mut BTreeMap<String, ObjectId>,
    edits: &mut Vec<TreeEdit>,
) -> Result<(), CoreError> {
    let id = store.write_blob(&bytes)?;
    staged.insert(key.to_owned(), id);
    edits.push(TreeEdit::Upsert {
        path: key.to_owned(),
        id,
    });
    Ok(())
}

fn remove(
    key: &str,
    staged: &mut BTreeMap<String, ObjectId>,
    edits: &mut Vec<TreeEdit>,
) -> Result<(), CoreError> {
    if staged.remove(key).is_some() {
        edits.push(TreeEdit::Remove {
            path: key.to_owned(),
        });
        return Ok(());
    }

    let prefix = format!("{key}/");
    let under_prefix: Vec<String> = staged
        .range(prefix.clone()..)
        .take_while(|(p, _)| p.starts_with(&prefix))
        .map(|(p, _)| p.clone())
        .collect();
    if under_prefix.is_empty() {
        return Err(CoreError::EntryNotFound {
            path: format!("/{key}"),
        });
    }
    for path in under_prefix {
        staged.remove(&path);
    }
    edits.push(TreeEdit::Remove {
        path: key.to_owned(),
    });
    Ok(())
}

fn rename(
    old_key: &str,
    new_key: &str,
    staged: &mut BTreeMap<String, ObjectId>,
    edits: &mut Vec<TreeEdit>,
) -> Result<(), CoreError> {
    let dest_prefix = format!("{new_key}/");
    let destination_exists =
        staged.contains_key(new_key) || staged.keys().any(|p| p.starts_with(&dest_prefix));
    if destination_exists {
        return Err(CoreError::ChangeConflict {
            reason: format!("rename destination '/{new_key}' already exists"),
        });
    }

    if let Some(id) = staged.remove(old_key) {
        edits.push(TreeEdit::Remove {
            path: old_key.to_owned(),
        });
        edits.push(TreeEdit::Upsert {
            path: new_key.to_owned(),
            id,
        });
        staged.insert(new_key.to_owned(), id);
        return Ok(());
    }

    let old_prefix = format!("{old_key}/");
    let under_prefix: Vec<(String, ObjectId)> = staged
        .range(old_prefix.clone()..)
        .take_while(|(p, _)| p.starts_with(&old_prefix))
        .map(|(p, id)| (p.clone(), *id))
        .collect();
    if under_prefix.is_empty() {
        return Err(CoreError::EntryNotFound {
            path: format!("/{old_key}"),
        });
    }

    edits.push(TreeEdit::Remove {
        path: old_key.to_owned(),
    });
    for (old_sub, id) in under_prefix {
        staged.remove(&old_sub);
        let suffix = &old_sub[old_prefix.len()..];
        let new_sub = format!("{new_key}/{suffix}");
        edits.push(TreeEdit::Upsert {
            path: new_sub.clone(),
            id,
        });
        staged.insert(new_sub, id);
    }
    Ok(())
}

fn read_json(
    store: &dyn ObjectStore,
    blob_id: Option<ObjectId>,
) -> Result<Option<serde_json::Value>, CoreError> {
    let Some(id) = blob_id else { return Ok(None) };
    let bytes = store.read_blob(id)?;
    let value = serde_json::from_slice(&bytes).map_err(to_backend)?;
    Ok(Some(value))
}

fn read_text(store: &dyn ObjectStore, blob_id: Option<ObjectId>) -> Result<Option<String>, CoreError> {
    let Some(id) = blob_id else { return Ok(None) };
    let bytes = store.read_blob(id)?;
    let text = String::from_utf8(bytes).map_err(to_backend)?;
    Ok(Some(text_patch::sanitize(&text)))
}

fn to_backend<E: std::fmt::Display>(err: E) -> CoreError {
    CoreError::Backend {
        reason: err.to_string(),
    }
}

/// Run the full commit procedure (§4.7): stage, then — unless the
/// change-list was redundant — write the commit object, append the
/// commit-id index record, and advance the head ref.
///
/// The commit-id append is fsynced before the ref is swapped (§7c); callers
/// must hold the repository's exclusive write lock (§5) for the duration of
/// this call.
///
/// # Errors
/// Returns [`CoreError::RedundantChange`] if staging produced zero edits and
/// `allow_empty` is false; otherwise propagates any staging or backend
/// error.
#[allow(clippy::too_many_arguments)]
pub fn commit(
    store: &dyn ObjectStore,
    index: &mut CommitIndex,
    head_ref: &RefName,
    base_revision: u64,
    base_commit_id: ObjectId,
    base_tree: ObjectId,
    changes: &[Change],
    meta: CommitMeta,
    allow_empty: bool,
) -> Result<CommitOutcome, CoreError> {
    let (new_tree, edit_count) = stage(store, base_tree, changes)?;
    if edit_count == 0 && !allow_empty {
        return Err(CoreError::RedundantChange);
    }

    let new_revision = base_revision + 1;
    let envelope = CommitEnvelope {
        summary: meta.summary,
        detail: meta.detail,
        markup: meta.markup,
        revision: new_revision,
    };
    let message = envelope.to_message().map_err(to_backend)?;
    let parent = (!base_commit_id.is_zero()).then_some(base_commit_id);

    let commit_id = store.create_commit(new_tree, parent, &message, &meta.author, meta.timestamp_ms)?;
    index.put(new_revision, commit_id)?;
    store.cas_update_head(
        head_ref,
        commit_id,
        base_commit_id,
        &format!("commit: {}", envelope.summary),
    )?;

    let changes = differ::diff(store, Some(base_tree), new_tree, None)?;
    tracing::debug!(revision = new_revision, changes = changes.len(), "committed");

    Ok(CommitOutcome {
        revision: new_revision,
        commit_id,
        tree_id: new_tree,
        changes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityPath;
    use cd_git::GixRepo;
    use serde_json::json;

    fn store() -> GixRepo {
        let dir = tempfile::tempdir().unwrap();
        GixRepo::init(dir.path()).unwrap()
    }

    fn meta() -> CommitMeta {
        CommitMeta {
            author: "Foo <foo@example.com>".to_owned(),
            timestamp_ms: 0,
            summary: "test".to_owned(),
            detail: String::new(),
            markup: Markup::Plaintext,
        }
    }

    #[test]
    fn upsert_json_is_skipped_when_equivalent() {
        let store = store();
        let base = store.write_empty_tree().unwrap();
        let path = EntityPath::new("/a.json").unwrap();
        let changes = vec![Change::UpsertJson {
            path: path.clone(),
            json: json!({"x": 1}),
        }];
        let (tree1, n1) = stage(&store, base, &changes).unwrap();
        assert_eq!(n1, 1);

        let changes2 = vec![Change::UpsertJson {
            path,
            json: json!({"x": 1.0}),
        }];
        let (tree2, n2) = stage(&store, tree1, &changes2).unwrap();
        assert_eq!(n2, 0);
        assert_eq!(tree1, tree2);
    }

    #[test]
    fn remove_missing_path_errors() {
        let store = store();
        let base = store.write_empty_tree().unwrap();
        let changes = vec![Change::Remove {
            path: EntityPath::new("/missing").unwrap(),
        }];
        assert!(stage(&store, base, &changes).is_err());
    }

    #[test]
    fn rename_directory_moves_all_entries() {
        let store = store();
        let base = store.write_empty_tree().unwrap();
        let changes = vec![
            Change::UpsertJson {
                path: EntityPath::new("/dir/a.json").unwrap(),
                json: json!(1),
            },
            Change::UpsertJson {
                path: EntityPath::new("/dir/b.json").unwrap(),
                json: json!(2),
            },
        ];
        let (tree, _) = stage(&store, base, &changes).unwrap();

        let rename = vec![Change::Rename {
            old_path: EntityPath::new("/dir").unwrap(),
            new_path: EntityPath::new("/moved").unwrap(),
        }];
        let (new_tree, n) = stage(&store, tree, &rename).unwrap();
        assert!(n > 0);

        let entries = differ::snapshot(&store, new_tree, None).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["moved/a.json", "moved/b.json"]);
    }

    #[test]
    fn rename_onto_existing_destination_conflicts() {
        let store = store();
        let base = store.write_empty_tree().unwrap();
        let setup = vec![
            Change::UpsertJson {
                path: EntityPath::new("/a.json").unwrap(),
                json: json!(1),
            },
            Change::UpsertJson {
                path: EntityPath::new("/b.json").unwrap(),
                json: json!(2),
            },
        ];
        let (tree, _) = stage(&store, base, &setup).unwrap();

        let rename = vec![Change::Rename {
            old_path: EntityPath::new("/a.json").unwrap(),
            new_path: EntityPath::new("/b.json").unwrap(),
        }];
        assert!(stage(&store, tree, &rename).is_err());
    }

    #[test]
    fn full_commit_advances_revision_and_head() {
        let store = store();
        let base_tree = store.write_empty_tree().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut index = CommitIndex::open(&dir.path().join("commits.idx")).unwrap();
        let head_ref = RefName::new("refs/centraldogma/main").unwrap();

        let changes = vec![Change::UpsertJson {
            path: EntityPath::new("/a.json").unwrap(),
            json: json!({"x": 1}),
        }];

        let outcome = commit(
            &store,
            &mut index,
            &head_ref,
            0,
            ObjectId::ZERO,
            base_tree,
            &changes,
            meta(),
            false,
        )
        .unwrap();

        assert_eq!(outcome.revision, 1);
        assert_eq!(index.head(), Some(1));
        assert_eq!(store.read_head(&head_ref).unwrap(), Some(outcome.commit_id));
        assert_eq!(outcome.changes.len(), 1);
    }

    #[test]
    fn redundant_commit_is_rejected_unless_allowed() {
        let store = store();
        let base_tree = store.write_empty_tree().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut index = CommitIndex::open(&dir.path().join("commits.idx")).unwrap();
        let head_ref = RefName::new("refs/centraldogma/main").unwrap();

        let err = commit(
            &store,
            &mut index,
            &head_ref,
            0,
            ObjectId::ZERO,
            base_tree,
            &[],
            meta(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::RedundantChange));

        let outcome = commit(
            &store,
            &mut index,
            &head_ref,
            0,
            ObjectId::ZERO,
            base_tree,
            &[],
            meta(),
            true,
        )
        .unwrap();
        assert_eq!(outcome.revision, 1);
    }
}
