//! gix-backed object read/write and tree editing operations.

use crate::error::StoreError;
use crate::gix_repo::GixRepo;
use crate::types::*;

fn to_gix_oid(id: ObjectId) -> gix::ObjectId {
    gix::ObjectId::from_bytes_or_panic(id.as_bytes())
}

fn from_gix_oid(id: gix::ObjectId) -> ObjectId {
    let bytes: [u8; 20] = id.as_bytes().try_into().expect("SHA-1 is 20 bytes");
    ObjectId::from_bytes(bytes)
}

fn from_gix_entry_kind(kind: gix::objs::tree::EntryKind) -> Option<EntryKind> {
    match kind {
        gix::objs::tree::EntryKind::Tree => Some(EntryKind::Tree),
        gix::objs::tree::EntryKind::Blob => Some(EntryKind::Blob),
        // Central Dogma never writes these kinds (§4.1); if one is ever
        // encountered on read (e.g. a foreign tool wrote it), we surface it
        // as a blob rather than fail the whole tree read.
        gix::objs::tree::EntryKind::BlobExecutable | gix::objs::tree::EntryKind::Link => {
            Some(EntryKind::Blob)
        }
        gix::objs::tree::EntryKind::Commit => None,
    }
}

fn to_gix_entry_kind(kind: EntryKind) -> gix::objs::tree::EntryKind {
    match kind {
        EntryKind::Blob => gix::objs::tree::EntryKind::Blob,
        EntryKind::Tree => gix::objs::tree::EntryKind::Tree,
    }
}

/// Parse an `"name <email>"` identity string into a gix signature at the
/// given commit timestamp. Central Dogma sources identity directly from the
/// commit's own author field (§6), never from repository-level git config.
fn parse_signature(identity: &str, timestamp_ms: i64) -> gix::actor::Signature {
    let (name, email) = identity
        .split_once('<')
        .map(|(n, rest)| (n.trim(), rest.trim_end_matches('>').trim()))
        .unwrap_or((identity.trim(), ""));
    gix::actor::Signature {
        name: name.into(),
        email: email.into(),
        time: gix::date::Time::new(timestamp_ms.div_euclid(1000), 0),
    }
}

pub fn object_exists(repo: &GixRepo, id: ObjectId) -> bool {
    repo.repo.find_object(to_gix_oid(id)).is_ok()
}

pub fn read_blob(repo: &GixRepo, id: ObjectId) -> Result<Vec<u8>, StoreError> {
    let mut blob = repo
        .repo
        .find_blob(to_gix_oid(id))
        .map_err(|e| StoreError::NotFound {
            message: format!("blob {id}: {e}"),
        })?;
    Ok(blob.take_data())
}

pub fn read_tree(repo: &GixRepo, id: ObjectId) -> Result<Vec<TreeEntry>, StoreError> {
    let tree = repo
        .repo
        .find_tree(to_gix_oid(id))
        .map_err(|e| StoreError::NotFound {
            message: format!("tree {id}: {e}"),
        })?;

    let mut entries = Vec::new();
    for result in tree.iter() {
        let entry = result.map_err(|e| StoreError::BackendError {
            message: format!("failed to decode tree entry: {e}"),
        })?;
        let Some(kind) = from_gix_entry_kind(entry.inner.mode.kind()) else {
            continue;
        };
        let oid_bytes: [u8; 20] = entry
            .inner
            .oid
            .as_bytes()
            .try_into()
            .expect("SHA-1 is 20 bytes");
        entries.push(TreeEntry {
            name: entry.inner.filename.to_string(),
            kind,
            id: ObjectId::from_bytes(oid_bytes),
        });
    }
    Ok(entries)
}

pub fn read_commit(repo: &GixRepo, id: ObjectId) -> Result<CommitInfo, StoreError> {
    let commit = repo
        .repo
        .find_commit(to_gix_oid(id))
        .map_err(|e| StoreError::NotFound {
            message: format!("commit {id}: {e}"),
        })?;

    let decoded = commit.decode().map_err(|e| StoreError::BackendError {
        message: format!("failed to decode commit {id}: {e}"),
    })?;

    let tree_id = from_gix_oid(decoded.tree());
    let parent = decoded.parents().next().map(from_gix_oid);
    let message = decoded.message.to_string();

    let author_sig = decoded.author();
    let author = format!("{} <{}>", author_sig.name, author_sig.email);
    let timestamp_ms = author_sig
        .time()
        .map_err(|e| StoreError::BackendError {
            message: format!("failed to decode commit {id} author time: {e}"),
        })?
        .seconds
        * 1000;

    Ok(CommitInfo {
        tree_id,
        parent,
        message,
        author,
        timestamp_ms,
    })
}

pub fn write_blob(repo: &GixRepo, data: &[u8]) -> Result<ObjectId, StoreError> {
    let id = repo
        .repo
        .write_blob(data)
        .map_err(|e| StoreError::BackendError {
            message: format!("failed to write blob: {e}"),
        })?;
    Ok(from_gix_oid(id.detach()))
}

pub fn write_tree(repo: &GixRepo, entries: &[TreeEntry]) -> Result<ObjectId, StoreError> {
    let tree = gix::objs::Tree {
        entries: entries
            .iter()
            .map(|e| gix::objs::tree::Entry {
                mode: to_gix_entry_kind(e.kind).into(),
                filename: e.name.as_str().into(),
                oid: to_gix_oid(e.id),
            })
            .collect(),
    };
    let id = repo
        .repo
        .write_object(&tree)
        .map_err(|e| StoreError::BackendError {
            message: format!("failed to write tree: {e}"),
        })?;
    Ok(from_gix_oid(id.detach()))
}

/// Write a commit object directly (no ref update — the caller is responsible
/// for advancing the head ref via [`crate::ObjectStore::cas_update_head`]
/// once the commit-id index record is durable, per the fsync ordering in
/// §7c / C2).
pub fn create_commit(
    repo: &GixRepo,
    tree: ObjectId,
    parent: Option<ObjectId>,
    message: &str,
    author: &str,
    timestamp_ms: i64,
) -> Result<ObjectId, StoreError> {
    let signature = parse_signature(author, timestamp_ms);
    let commit = gix::objs::Commit {
        message: message.into(),
        tree: to_gix_oid(tree),
        author: signature.clone(),
        committer: signature,
        encoding: None,
        parents: parent.map(to_gix_oid).into_iter().collect(),
        extra_headers: Vec::new(),
    };
    let id = repo
        .repo
        .write_object(&commit)
        .map_err(|e| StoreError::BackendError {
            message: format!("failed to write commit object: {e}"),
        })?;
    Ok(from_gix_oid(id.detach()))
}

pub fn edit_tree(repo: &GixRepo, base: ObjectId, edits: &[TreeEdit]) -> Result<ObjectId, StoreError> {
    let tree = repo
        .repo
        .find_tree(to_gix_oid(base))
        .map_err(|e| StoreError::NotFound {
            message: format!("base tree {base}: {e}"),
        })?;

    let mut editor = tree.edit().map_err(|e| StoreError::BackendError {
        message: format!("failed to create tree editor: {e}"),
    })?;

    for edit in edits {
        match edit {
            TreeEdit::Upsert { path, id } => {
                editor
                    .upsert(path.as_str(), gix::objs::tree::EntryKind::Blob, to_gix_oid(*id))
                    .map_err(|e| StoreError::BackendError {
                        message: format!("tree edit upsert '{path}': {e}"),
                    })?;
            }
            TreeEdit::Remove { path } => {
                editor
                    .remove(path.as_str())
                    .map_err(|e| StoreError::BackendError {
                        message: format!("tree edit remove '{path}': {e}"),
                    })?;
            }
        }
    }

    let new_id = editor.write().map_err(|e| StoreError::BackendError {
        message: format!("failed to write edited tree: {e}"),
    })?;
    Ok(from_gix_oid(new_id.detach()))
}

/// Write a fresh, empty tree object (used to seed a repository's first
/// commit and as the `old` side of a diff against an unborn head).
pub fn write_empty_tree(repo: &GixRepo) -> Result<ObjectId, StoreError> {
    write_tree(repo, &[])
}
