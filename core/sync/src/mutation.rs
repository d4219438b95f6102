//! Version-bumping writes shared by the coordinator and the resolver.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use notevault_common::{
    ConflictId, DeviceId, Error, Note, NoteId, NotePatch, Result, SyncCursor, UserId,
};
use notevault_storage::Stores;

use crate::config::SyncConfig;

/// How many times a write is retried against a note other writers keep moving.
pub(crate) const MAX_WRITE_ATTEMPTS: usize = 8;

/// Result of one conditional write.
pub(crate) enum Commit {
    Written(Note),
    /// Another writer moved the note first. Carries the note as now stored.
    Stale(Note),
}

/// Snapshot `note`, apply `patch`, bump the version and persist, provided
/// the stored note is still at `note.version`.
///
/// The snapshot of the pre-mutation state is appended before the note is
/// written. Retention pruning runs afterwards and only logs on failure.
pub(crate) async fn commit(
    stores: &Stores,
    config: &SyncConfig,
    note: Note,
    patch: &NotePatch,
    device: &DeviceId,
    now: DateTime<Utc>,
) -> Result<Commit> {
    let base_version = note.version;
    stores.versions.save_version(&note.snapshot(now)).await?;

    let mut updated = note;
    updated.apply(patch, device, now);
    if !stores.notes.update_note(&updated, base_version).await? {
        let current = stores.notes.get_note(&updated.id).await?;
        debug!(
            note = %updated.id,
            base_version,
            stored_version = current.version,
            "Note moved on before write"
        );
        return Ok(Commit::Stale(current));
    }

    if let Some(keep) = config.version_retention {
        match stores.versions.prune_versions(&updated.id, keep).await {
            Ok(0) => {}
            Ok(removed) => debug!(note = %updated.id, removed, "Pruned old versions"),
            Err(e) => warn!(note = %updated.id, error = %e, "Version pruning failed"),
        }
    }

    Ok(Commit::Written(updated))
}

/// Apply `patch` on top of whatever is stored, re-reading the note each
/// time another writer gets in first.
pub(crate) async fn commit_latest(
    stores: &Stores,
    config: &SyncConfig,
    id: &NoteId,
    patch: &NotePatch,
    device: &DeviceId,
    now: DateTime<Utc>,
) -> Result<Note> {
    let mut note = stores.notes.get_note(id).await?;
    for _ in 0..MAX_WRITE_ATTEMPTS {
        match commit(stores, config, note, patch, device, now).await? {
            Commit::Written(updated) => return Ok(updated),
            Commit::Stale(current) => note = current,
        }
    }
    Err(contended(id))
}

pub(crate) fn contended(id: &NoteId) -> Error {
    Error::Storage(format!(
        "note {} changed on each of {} write attempts",
        id, MAX_WRITE_ATTEMPTS
    ))
}

/// Add or remove a conflict from a device's pending set.
///
/// Cursor bookkeeping never fails the operation that triggered it.
pub(crate) async fn track_pending_conflict(
    stores: &Stores,
    user: &UserId,
    device: &DeviceId,
    conflict: &ConflictId,
    pending: bool,
) {
    let result: Result<()> = async {
        let mut cursor = match stores.cursors.get_cursor(user, device).await? {
            Some(cursor) => cursor,
            None if pending => SyncCursor::new(user.clone(), device.clone()),
            None => return Ok(()),
        };

        let changed = if pending {
            cursor.add_pending_conflict(conflict.clone())
        } else {
            cursor.remove_pending_conflict(conflict)
        };
        if changed {
            cursor.updated_at = Utc::now();
            stores.cursors.put_cursor(&cursor).await?;
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        warn!(
            user = %user,
            device = %device,
            conflict = %conflict,
            error = %e,
            "Failed to update pending conflicts"
        );
    }
}
