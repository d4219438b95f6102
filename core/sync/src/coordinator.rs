//! Delta computation and optimistic-concurrency mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use notevault_common::{
    Conflict, DeviceId, Error, ManifestEntry, NewNote, Note, NoteChange, NoteId, NotePatch,
    NoteVersion, Result, SyncCursor, UserId, WorkspaceId,
};
use notevault_realtime::{ConnectionRegistry, SyncResponsePayload};
use notevault_storage::Stores;

use crate::config::SyncConfig;
use crate::diff::{self, BatchDiffRequest, BatchDiffResponse};
use crate::mutation::{commit, contended, track_pending_conflict, Commit, MAX_WRITE_ATTEMPTS};
use crate::notify::Notifier;

/// Compact projection of every note in scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub notes: Vec<ManifestEntry>,
    pub sync_time: DateTime<Utc>,
}

/// Reconciles device state with server state and performs every note
/// mutation.
pub struct SyncCoordinator {
    stores: Stores,
    notifier: Notifier,
    config: SyncConfig,
}

impl SyncCoordinator {
    /// Create a coordinator without real-time fan-out.
    pub fn new(stores: Stores, config: SyncConfig) -> Self {
        Self {
            stores,
            notifier: Notifier::default(),
            config,
        }
    }

    /// Fan changes out through `registry`.
    pub fn with_registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.notifier = Notifier::new(Some(registry));
        self
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Load a note and check it belongs to `owner`.
    async fn owned_note(&self, owner: &UserId, id: &NoteId) -> Result<Note> {
        let note = self.stores.notes.get_note(id).await?;
        if !note.is_owned_by(owner) {
            return Err(Error::AccessDenied(format!("note {} is not owned by {}", id, owner)));
        }
        Ok(note)
    }

    /// Notes of `owner`, optionally narrowed to one workspace.
    async fn scoped_notes(&self, owner: &UserId, workspace: Option<&WorkspaceId>) -> Result<Vec<Note>> {
        match workspace {
            Some(workspace) => {
                let mut notes = self.stores.notes.list_workspace_notes(workspace).await?;
                notes.retain(|note| note.is_owned_by(owner));
                Ok(notes)
            }
            None => self.stores.notes.list_notes(owner).await,
        }
    }

    /// Cursor-based delta sync.
    ///
    /// Every note the device has not declared, or declared at an older
    /// version, is returned as a change. The device's cursor is then stamped
    /// with the sync time and the declared versions are merged into it.
    pub async fn process_cursor_sync(
        &self,
        owner: &UserId,
        device: &DeviceId,
        declared: &HashMap<NoteId, i64>,
    ) -> Result<SyncResponsePayload> {
        let notes = self.stores.notes.list_notes(owner).await?;
        let changes: Vec<NoteChange> = notes
            .iter()
            .filter(|note| {
                declared
                    .get(&note.id)
                    .map_or(true, |known| *known < note.version)
            })
            .map(NoteChange::from_note)
            .collect();

        let sync_time = Utc::now();
        let mut cursor = self
            .stores
            .cursors
            .get_cursor(owner, device)
            .await?
            .unwrap_or_else(|| SyncCursor::new(owner.clone(), device.clone()));
        cursor.last_sync_time = sync_time;
        cursor.merge_versions(declared);
        cursor.updated_at = sync_time;
        self.stores.cursors.put_cursor(&cursor).await?;

        info!(
            user = %owner,
            device = %device,
            changes = changes.len(),
            "Cursor sync complete"
        );

        Ok(SyncResponsePayload {
            changes,
            has_more: false,
            sync_time,
        })
    }

    /// Notes updated strictly after `since`. Reads and writes no cursor.
    pub async fn get_changes_since(
        &self,
        owner: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<NoteChange>> {
        let notes = self.stores.notes.list_notes(owner).await?;
        Ok(notes
            .iter()
            .filter(|note| note.updated_at > since)
            .map(NoteChange::from_note)
            .collect())
    }

    pub async fn get_manifest(
        &self,
        owner: &UserId,
        workspace: Option<&WorkspaceId>,
    ) -> Result<Manifest> {
        let notes = self.scoped_notes(owner, workspace).await?;
        Ok(Manifest {
            notes: notes.iter().map(Note::manifest_entry).collect(),
            sync_time: Utc::now(),
        })
    }

    pub async fn process_batch_diff(
        &self,
        owner: &UserId,
        request: &BatchDiffRequest,
    ) -> Result<BatchDiffResponse> {
        let notes = self
            .scoped_notes(owner, request.workspace_id.as_ref())
            .await?;
        let response = diff::classify(&notes, &request.local_notes, Utc::now());

        debug!(
            user = %owner,
            download = response.to_download.len(),
            upload = response.to_upload.len(),
            delete = response.to_delete.len(),
            conflicts = response.conflicts.len(),
            "Batch diff complete"
        );
        Ok(response)
    }

    /// Create a note at version 1 and announce it to the owner's other
    /// devices.
    pub async fn create_note(&self, owner: &UserId, request: NewNote) -> Result<Note> {
        let device = request.device_id.clone();
        let note = Note::create(owner.clone(), request, Utc::now());
        self.stores.notes.create_note(&note).await?;

        info!(user = %owner, note = %note.id, "Note created");
        self.notifier.note_changed(owner, &device, &note);
        Ok(note)
    }

    pub async fn get_note(&self, owner: &UserId, id: &NoteId) -> Result<Note> {
        self.owned_note(owner, id).await
    }

    /// Every note of `owner` in full, tombstones included, oldest first.
    pub async fn list_notes(&self, owner: &UserId) -> Result<Vec<Note>> {
        let mut notes = self.stores.notes.list_notes(owner).await?;
        notes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(notes)
    }

    /// Apply a partial update under the optimistic version check.
    ///
    /// When `patch.expected_version` is present and differs from the stored
    /// version, a conflict is persisted and returned as
    /// `Error::VersionConflict`; the note is left untouched. The check holds
    /// against concurrent writers too: the store only accepts the write if
    /// the note is still at the version that was read, and a writer that
    /// loses that race goes through the same check again.
    pub async fn mutate(
        &self,
        owner: &UserId,
        id: &NoteId,
        device: &DeviceId,
        patch: NotePatch,
    ) -> Result<Note> {
        let now = Utc::now();
        let mut note = self.owned_note(owner, id).await?;
        let mut attempts = 0;

        let updated = loop {
            if let Some(expected) = patch.expected_version {
                if expected != note.version {
                    return Err(self.reject(&note, patch, expected, device, now).await?);
                }
            }

            match commit(&self.stores, &self.config, note, &patch, device, now).await? {
                Commit::Written(updated) => break updated,
                Commit::Stale(current) => {
                    attempts += 1;
                    if attempts == MAX_WRITE_ATTEMPTS {
                        return Err(contended(id));
                    }
                    note = current;
                }
            }
        };
        debug!(note = %updated.id, version = updated.version, device = %device, "Note mutated");
        self.broadcast_note_change(owner, device, &updated);
        Ok(updated)
    }

    async fn reject(
        &self,
        note: &Note,
        patch: NotePatch,
        expected: i64,
        device: &DeviceId,
        now: DateTime<Utc>,
    ) -> Result<Error> {
        let conflict = Conflict::detect(note, patch, expected, device.clone(), now);
        self.stores.conflicts.create_conflict(&conflict).await?;

        info!(
            conflict = %conflict.id,
            note = %note.id,
            base_version = conflict.base_version,
            server_version = conflict.server_version,
            device = %device,
            "Version conflict"
        );

        track_pending_conflict(&self.stores, &note.owner_id, device, &conflict.id, true).await;
        self.notifier.conflict_detected(&conflict);
        Ok(Error::VersionConflict(Box::new(conflict)))
    }

    /// Same as [`mutate`](Self::mutate).
    pub async fn update_note(
        &self,
        owner: &UserId,
        id: &NoteId,
        device: &DeviceId,
        patch: NotePatch,
    ) -> Result<Note> {
        self.mutate(owner, id, device, patch).await
    }

    /// Tombstone a note through the regular version-bumping path.
    pub async fn delete_note(
        &self,
        owner: &UserId,
        id: &NoteId,
        device: &DeviceId,
        expected_version: Option<i64>,
    ) -> Result<Note> {
        self.mutate(owner, id, device, NotePatch::tombstone(expected_version))
            .await
    }

    /// Most recent snapshots of a note, newest first.
    pub async fn list_versions(
        &self,
        owner: &UserId,
        id: &NoteId,
        limit: usize,
    ) -> Result<Vec<NoteVersion>> {
        self.owned_note(owner, id).await?;
        self.stores.versions.list_versions(id, limit).await
    }

    /// Keep only the newest `keep_last` snapshots of a note.
    pub async fn prune_versions(&self, owner: &UserId, id: &NoteId, keep_last: usize) -> Result<usize> {
        self.owned_note(owner, id).await?;
        let removed = self.stores.versions.prune_versions(id, keep_last).await?;
        info!(note = %id, removed, keep_last, "Versions pruned");
        Ok(removed)
    }

    /// Fan `note` out to every live connection of `owner` except those of
    /// `device`. Never fails; delivery problems are logged.
    pub fn broadcast_note_change(&self, owner: &UserId, device: &DeviceId, note: &Note) {
        self.notifier.note_changed(owner, device, note);
    }
}
