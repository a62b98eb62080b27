//! gix-backed head-ref read/write with compare-and-swap semantics.
//!
//! A Central Dogma repository keeps exactly one ref per physical store —
//! the pointer to the latest commit. There are no branches, tags, or
//! remotes, so this module is intentionally much smaller than a general
//! git ref database would need.

use gix::refs::transaction::{Change, LogChange, PreviousValue, RefEdit as GixRefEdit};
use gix::refs::{Target, transaction::RefLog};

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

pub fn read_ref(repo: &GixRepo, name: &RefName) -> Result<Option<ObjectId>, StoreError> {
    let found = repo
        .repo
        .try_find_reference(name.as_str())
        .map_err(|e| StoreError::BackendError {
            message: format!("reading ref '{name}': {e}"),
        })?;
    let Some(mut reference) = found else {
        return Ok(None);
    };
    let id = reference
        .peel_to_id_in_place()
        .map_err(|e| StoreError::BackendError {
            message: format!("peeling ref '{name}': {e}"),
        })?;
    Ok(Some(from_gix_oid(id.detach())))
}

/// Update `name` to point at `new_id`, with compare-and-swap on the ref's
/// current value. Pass [`ObjectId::ZERO`] as `expected_old_id` to assert the
/// ref must not already exist.
pub fn write_ref(
    repo: &GixRepo,
    name: &RefName,
    new_id: ObjectId,
    expected_old_id: ObjectId,
    log_message: &str,
) -> Result<(), StoreError> {
    let full_name = name
        .as_str()
        .try_into()
        .map_err(|e| StoreError::BackendError {
            message: format!("invalid ref name '{name}': {e}"),
        })?;

    let expected = if expected_old_id.is_zero() {
        PreviousValue::MustNotExist
    } else {
        PreviousValue::MustExistAndMatch(Target::Object(to_gix_oid(expected_old_id)))
    };

    let edit = GixRefEdit {
        change: Change::Update {
            log: LogChange {
                mode: RefLog::AndReference,
                force_create_reflog: false,
                message: log_message.into(),
            },
            expected,
            new: Target::Object(to_gix_oid(new_id)),
        },
        name: full_name,
        deref: false,
    };

    repo.repo
        .edit_reference(edit)
        .map_err(|e| StoreError::RefConflict {
            ref_name: name.as_str().to_owned(),
            message: e.to_string(),
        })?;
    Ok(())
}

pub fn delete_ref(repo: &GixRepo, name: &RefName) -> Result<(), StoreError> {
    let Some(reference) = repo
        .repo
        .try_find_reference(name.as_str())
        .map_err(|e| StoreError::BackendError {
            message: format!("reading ref '{name}' before delete: {e}"),
        })?
    else {
        return Ok(());
    };
    reference.delete().map_err(|e| StoreError::BackendError {
        message: format!("deleting ref '{name}': {e}"),
    })?;
    Ok(())
}

/// Apply a batch of ref updates atomically; each [`RefEdit`] carries its own
/// expected-old-id, so the whole batch fails together if any one mismatches.
pub fn atomic_ref_update(repo: &GixRepo, edits: &[RefEdit]) -> Result<(), StoreError> {
    let mut gix_edits = Vec::with_capacity(edits.len());
    for edit in edits {
        let full_name =
            edit.name
                .as_str()
                .try_into()
                .map_err(|e| StoreError::BackendError {
                    message: format!("invalid ref name '{}': {e}", edit.name),
                })?;
        let expected = if edit.expected_old_id.is_zero() {
            PreviousValue::MustNotExist
        } else {
            PreviousValue::MustExistAndMatch(Target::Object(to_gix_oid(edit.expected_old_id)))
        };
        gix_edits.push(GixRefEdit {
            change: Change::Update {
                log: LogChange {
                    mode: RefLog::AndReference,
                    force_create_reflog: false,
                    message: "atomic ref update".into(),
                },
                expected,
                new: Target::Object(to_gix_oid(edit.new_id)),
            },
            name: full_name,
            deref: false,
        });
    }

    repo.repo
        .edit_references(gix_edits)
        .map_err(|e| StoreError::RefConflict {
            ref_name: edits
                .first()
                .map(|e| e.name.as_str().to_owned())
                .unwrap_or_default(),
            message: e.to_string(),
        })?;
    Ok(())
}
