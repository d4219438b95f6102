//! Storage collaborator trait definitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use notevault_common::{
    Conflict, ConflictId, DeviceId, Note, NoteId, NoteVersion, ResolutionStrategy, Result,
    SyncCursor, UserId, WorkspaceId,
};

/// Note documents.
///
/// Implementations perform no ownership checks and no version arithmetic;
/// the sync core owns both.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Insert a new note.
    ///
    /// # Errors
    /// - `InvalidInput` if a note with the same id already exists
    async fn create_note(&self, note: &Note) -> Result<()>;

    /// Fetch a note by id.
    ///
    /// # Errors
    /// - `NotFound` if no such note exists
    async fn get_note(&self, id: &NoteId) -> Result<Note>;

    /// Replace a stored note, but only if the stored copy is still at
    /// `expected_version`.
    ///
    /// Returns `false` without writing when another writer got there first.
    /// The check and the write are a single atomic step.
    ///
    /// # Errors
    /// - `NotFound` if the note was never created
    async fn update_note(&self, note: &Note, expected_version: i64) -> Result<bool>;

    /// All notes owned by `owner`, tombstones included. Order unspecified.
    async fn list_notes(&self, owner: &UserId) -> Result<Vec<Note>>;

    /// All notes in `workspace`, tombstones included. Order unspecified.
    async fn list_workspace_notes(&self, workspace: &WorkspaceId) -> Result<Vec<Note>>;
}

/// Append-only version log.
#[async_trait]
pub trait NoteVersionStore: Send + Sync {
    /// Append a snapshot. Snapshots are never modified afterwards: saving a
    /// version that is already logged leaves the logged one in place.
    async fn save_version(&self, version: &NoteVersion) -> Result<()>;

    /// Most recent snapshots of a note, newest first, at most `limit`.
    async fn list_versions(&self, note: &NoteId, limit: usize) -> Result<Vec<NoteVersion>>;

    /// A specific snapshot.
    ///
    /// # Errors
    /// - `NotFound` if that version was never saved or has been pruned
    async fn get_version(&self, note: &NoteId, version: i64) -> Result<NoteVersion>;

    /// Keep the newest `keep_last` snapshots and drop the rest.
    ///
    /// Returns the number of snapshots removed.
    async fn prune_versions(&self, note: &NoteId, keep_last: usize) -> Result<usize>;
}

/// Conflict records.
#[async_trait]
pub trait ConflictStore: Send + Sync {
    async fn create_conflict(&self, conflict: &Conflict) -> Result<()>;

    /// # Errors
    /// - `NotFound` if no such conflict exists
    async fn get_conflict(&self, id: &ConflictId) -> Result<Conflict>;

    async fn list_user_conflicts(&self, owner: &UserId) -> Result<Vec<Conflict>>;

    async fn list_note_conflicts(&self, note: &NoteId) -> Result<Vec<Conflict>>;

    /// Set the resolution fields and return the updated record.
    ///
    /// Check and write are atomic, so of two concurrent callers exactly one
    /// succeeds.
    ///
    /// # Errors
    /// - `NotFound` if no such conflict exists
    /// - `InvalidResolution` if it was already resolved
    async fn mark_resolved(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        at: DateTime<Utc>,
    ) -> Result<Conflict>;

    /// Clear the resolution fields again.
    ///
    /// Only used to release a resolution whose note write failed.
    async fn reopen_conflict(&self, id: &ConflictId) -> Result<Conflict>;

    /// Housekeeping removal. The sync core never calls this.
    async fn delete_conflict(&self, id: &ConflictId) -> Result<()>;
}

/// Per-device sync cursors.
#[async_trait]
pub trait SyncCursorStore: Send + Sync {
    /// The stored cursor, or `None` if the device has never synced.
    async fn get_cursor(&self, user: &UserId, device: &DeviceId) -> Result<Option<SyncCursor>>;

    /// Insert or replace a cursor.
    async fn put_cursor(&self, cursor: &SyncCursor) -> Result<()>;
}

/// The four collaborators the sync core talks to.
#[derive(Clone)]
pub struct Stores {
    pub notes: Arc<dyn NoteStore>,
    pub versions: Arc<dyn NoteVersionStore>,
    pub conflicts: Arc<dyn ConflictStore>,
    pub cursors: Arc<dyn SyncCursorStore>,
}

impl Stores {
    /// Use one backend for every collaborator.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: NoteStore + NoteVersionStore + ConflictStore + SyncCursorStore + 'static,
    {
        Self {
            notes: backend.clone(),
            versions: backend.clone(),
            conflicts: backend.clone(),
            cursors: backend,
        }
    }
}
