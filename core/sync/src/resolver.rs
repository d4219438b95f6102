//! Conflict queries and resolution.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

use notevault_common::{
    Conflict, ConflictId, DeviceId, Error, Note, NoteId, NotePatch, ResolutionStrategy, Result,
    UserId,
};
use notevault_realtime::ConnectionRegistry;
use notevault_storage::Stores;

use crate::config::SyncConfig;
use crate::mutation::{commit_latest, track_pending_conflict};
use crate::notify::Notifier;

/// What a strategy decided to do with the note.
enum Outcome {
    /// Keep this note as it is.
    Keep(Note),
    /// Apply `patch` to the current note on behalf of `editor`.
    Apply { patch: NotePatch, editor: DeviceId },
}

/// Applies resolution strategies to recorded conflicts.
pub struct ConflictResolver {
    stores: Stores,
    notifier: Notifier,
    config: SyncConfig,
}

impl ConflictResolver {
    pub fn new(stores: Stores, config: SyncConfig) -> Self {
        Self {
            stores,
            notifier: Notifier::default(),
            config,
        }
    }

    /// Fan resolved notes out through `registry`.
    pub fn with_registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.notifier = Notifier::new(Some(registry));
        self
    }

    pub async fn list_conflicts(&self, owner: &UserId) -> Result<Vec<Conflict>> {
        self.stores.conflicts.list_user_conflicts(owner).await
    }

    pub async fn list_note_conflicts(&self, owner: &UserId, note: &NoteId) -> Result<Vec<Conflict>> {
        let stored = self.stores.notes.get_note(note).await?;
        if !stored.is_owned_by(owner) {
            return Err(Error::AccessDenied(format!("note {} is not owned by {}", note, owner)));
        }
        self.stores.conflicts.list_note_conflicts(note).await
    }

    pub async fn get_conflict(&self, owner: &UserId, id: &ConflictId) -> Result<Conflict> {
        let conflict = self.stores.conflicts.get_conflict(id).await?;
        if &conflict.owner_id != owner {
            return Err(Error::AccessDenied(format!(
                "conflict {} is not owned by {}",
                id, owner
            )));
        }
        Ok(conflict)
    }

    /// Resolve a conflict with `strategy`.
    ///
    /// `manual` carries the replacement fields for the manual strategy and is
    /// ignored otherwise. `device` is the device issuing the resolution; it
    /// does not receive the resulting change notice.
    ///
    /// Returns the note as it stands after resolution.
    ///
    /// # Errors
    /// - `AccessDenied` if the conflict belongs to another user
    /// - `InvalidResolution` if the conflict was already resolved, or if the
    ///   manual strategy is used without data
    /// - Storage failures leave the conflict unresolved
    pub async fn apply_resolution(
        &self,
        owner: &UserId,
        conflict_id: &ConflictId,
        strategy: ResolutionStrategy,
        manual: Option<NotePatch>,
        device: &DeviceId,
    ) -> Result<Note> {
        let conflict = self.get_conflict(owner, conflict_id).await?;
        if let Some(previous) = conflict.resolution {
            return Err(Error::InvalidResolution(format!(
                "conflict {} already resolved with strategy {}",
                conflict.id, previous
            )));
        }

        let now = Utc::now();
        let outcome = self.decide(&conflict, strategy, manual, device, now).await?;

        // Claim the conflict before touching the note; a concurrent
        // resolution of the same conflict fails here.
        self.stores
            .conflicts
            .mark_resolved(&conflict.id, strategy, now)
            .await?;

        let (note, mutated) = match outcome {
            Outcome::Keep(note) => (note, false),
            Outcome::Apply { patch, editor } => {
                match commit_latest(&self.stores, &self.config, &conflict.note_id, &patch, &editor, now)
                    .await
                {
                    Ok(note) => (note, true),
                    Err(e) => {
                        self.release(&conflict.id).await;
                        return Err(e);
                    }
                }
            }
        };

        info!(
            conflict = %conflict.id,
            note = %conflict.note_id,
            strategy = %strategy,
            version = note.version,
            "Conflict resolved"
        );

        track_pending_conflict(
            &self.stores,
            &conflict.owner_id,
            &conflict.device_id,
            &conflict.id,
            false,
        )
        .await;

        if mutated {
            self.notifier.note_changed(owner, device, &note);
        }
        Ok(note)
    }

    /// Hand back a claimed conflict whose note write failed.
    async fn release(&self, id: &ConflictId) {
        if let Err(e) = self.stores.conflicts.reopen_conflict(id).await {
            error!(conflict = %id, error = %e, "Failed to reopen conflict after failed resolution");
        }
    }

    async fn decide(
        &self,
        conflict: &Conflict,
        strategy: ResolutionStrategy,
        manual: Option<NotePatch>,
        device: &DeviceId,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        match strategy {
            ResolutionStrategy::Server => Ok(Outcome::Keep(conflict.server_note.clone())),
            ResolutionStrategy::Client => Ok(Outcome::Apply {
                patch: conflict.client_patch.clone(),
                editor: conflict.device_id.clone(),
            }),
            ResolutionStrategy::Manual => {
                let patch = manual.ok_or_else(|| {
                    Error::InvalidResolution("manual resolution requires note data".to_string())
                })?;
                Ok(Outcome::Apply {
                    patch,
                    editor: device.clone(),
                })
            }
            ResolutionStrategy::Lww => {
                let client_time = self.client_edit_time(conflict, now).await?;
                let current = self.stores.notes.get_note(&conflict.note_id).await?;
                if current.updated_at > client_time {
                    debug!(conflict = %conflict.id, "Last writer wins: server");
                    Ok(Outcome::Keep(current))
                } else {
                    debug!(conflict = %conflict.id, "Last writer wins: client");
                    Ok(Outcome::Apply {
                        patch: conflict.client_patch.clone(),
                        editor: conflict.device_id.clone(),
                    })
                }
            }
        }
    }

    /// When the client's edit was based, taken from the version log.
    ///
    /// Only the most recent `lww_lookback` snapshots are searched. When the
    /// base version is not among them the current time is used instead; this
    /// is an approximation that favours the client.
    async fn client_edit_time(&self, conflict: &Conflict, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let recent = self
            .stores
            .versions
            .list_versions(&conflict.note_id, self.config.lww_lookback)
            .await?;

        match recent.iter().find(|v| v.version == conflict.base_version) {
            Some(snapshot) => Ok(snapshot.created_at),
            None => {
                debug!(
                    conflict = %conflict.id,
                    base_version = conflict.base_version,
                    "Base version outside lookback window, using current time"
                );
                Ok(now)
            }
        }
    }
}
