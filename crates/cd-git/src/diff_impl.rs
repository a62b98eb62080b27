//! Rename-blind, recursive tree-to-tree diff.
//!
//! Central Dogma's object store is opened with rename detection off (§4.1):
//! this differ only ever reports added/modified/deleted paths. Rename
//! synthesis from exact object-id matches lives one layer up, in
//! `cd_core::differ`, which consumes the flat list this produces.

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::gix_repo::GixRepo;
use crate::types::*;

/// A flattened, path-qualified tree entry used internally while walking.
struct FlatEntry {
    kind: EntryKind,
    id: ObjectId,
}

fn flatten(
    repo: &GixRepo,
    tree_id: ObjectId,
    prefix: &str,
    out: &mut BTreeMap<String, FlatEntry>,
) -> Result<(), StoreError> {
    for entry in crate::objects_impl::read_tree(repo, tree_id)? {
        let path = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{prefix}/{}", entry.name)
        };
        match entry.kind {
            EntryKind::Blob => {
                out.insert(
                    path,
                    FlatEntry {
                        kind: EntryKind::Blob,
                        id: entry.id,
                    },
                );
            }
            EntryKind::Tree => {
                flatten(repo, entry.id, &path, out)?;
            }
        }
    }
    Ok(())
}

/// Diff two trees and return the flat list of changed blob paths, in
/// lexicographic order. If `old` is `None`, every blob reachable from `new`
/// is reported as an addition.
pub fn diff_trees(
    repo: &GixRepo,
    old: Option<ObjectId>,
    new: ObjectId,
) -> Result<Vec<DiffEntry>, StoreError> {
    let mut old_entries = BTreeMap::new();
    if let Some(old_id) = old {
        flatten(repo, old_id, "", &mut old_entries)?;
    }

    let mut new_entries = BTreeMap::new();
    flatten(repo, new, "", &mut new_entries)?;

    let mut all_paths: Vec<&String> = old_entries.keys().chain(new_entries.keys()).collect();
    all_paths.sort_unstable();
    all_paths.dedup();

    let mut diffs = Vec::new();
    for path in all_paths {
        match (old_entries.get(path), new_entries.get(path)) {
            (None, Some(n)) => diffs.push(DiffEntry {
                path: path.clone(),
                kind: ChangeKind::Added,
                old_id: None,
                new_id: Some(n.id),
            }),
            (Some(o), None) => diffs.push(DiffEntry {
                path: path.clone(),
                kind: ChangeKind::Deleted,
                old_id: Some(o.id),
                new_id: None,
            }),
            (Some(o), Some(n)) if o.id != n.id => diffs.push(DiffEntry {
                path: path.clone(),
                kind: ChangeKind::Modified,
                old_id: Some(o.id),
                new_id: Some(n.id),
            }),
            _ => {}
        }
    }
    Ok(diffs)
}
