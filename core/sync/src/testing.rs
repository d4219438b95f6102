//! Store wrappers shared by the unit tests.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use notevault_common::{Note, NoteId, Result, UserId, WorkspaceId};
use notevault_storage::{MemoryStore, NoteStore, Stores};

/// Note store whose reads take a while to come back, so concurrent writers
/// all work from the same stale copy.
pub(crate) struct SlowNotes {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

impl SlowNotes {
    /// Stores over one memory backend with slowed note reads.
    pub(crate) fn stores(delay: Duration) -> Stores {
        let backend = Arc::new(MemoryStore::new());
        let mut stores = Stores::from_backend(backend.clone());
        stores.notes = Arc::new(Self {
            inner: backend,
            delay,
        });
        stores
    }
}

#[async_trait]
impl NoteStore for SlowNotes {
    async fn create_note(&self, note: &Note) -> Result<()> {
        self.inner.create_note(note).await
    }

    async fn get_note(&self, id: &NoteId) -> Result<Note> {
        let note = self.inner.get_note(id).await;
        tokio::time::sleep(self.delay).await;
        note
    }

    async fn update_note(&self, note: &Note, expected_version: i64) -> Result<bool> {
        self.inner.update_note(note, expected_version).await
    }

    async fn list_notes(&self, owner: &UserId) -> Result<Vec<Note>> {
        self.inner.list_notes(owner).await
    }

    async fn list_workspace_notes(&self, workspace: &WorkspaceId) -> Result<Vec<Note>> {
        self.inner.list_workspace_notes(workspace).await
    }
}
