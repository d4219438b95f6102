//! In-memory document store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use notevault_common::{
    Conflict, ConflictId, DeviceId, Error, Note, NoteId, NoteVersion, ResolutionStrategy, Result,
    SyncCursor, UserId, WorkspaceId,
};

use crate::keys;
use crate::provider::{ConflictStore, NoteStore, NoteVersionStore, SyncCursorStore};

/// A stored document.
#[derive(Debug, Clone)]
enum Document {
    Note(Note),
    Version(NoteVersion),
    Cursor(SyncCursor),
    Conflict(Conflict),
}

/// In-memory document store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, Document>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Document>>> {
        self.documents
            .read()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Document>>> {
        self.documents
            .write()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }

    /// Number of stored documents of every kind.
    pub fn len(&self) -> usize {
        self.documents.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn versions_of(documents: &HashMap<String, Document>, note: &NoteId) -> Vec<NoteVersion> {
        let mut versions: Vec<NoteVersion> = documents
            .values()
            .filter_map(|doc| match doc {
                Document::Version(v) if &v.note_id == note => Some(v.clone()),
                _ => None,
            })
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        versions
    }
}

#[async_trait]
impl NoteStore for MemoryStore {
    async fn create_note(&self, note: &Note) -> Result<()> {
        let key = keys::note(&note.id);
        let mut documents = self.write()?;
        if documents.contains_key(&key) {
            return Err(Error::InvalidInput(format!("Note already exists: {}", note.id)));
        }
        documents.insert(key, Document::Note(note.clone()));
        Ok(())
    }

    async fn get_note(&self, id: &NoteId) -> Result<Note> {
        match self.read()?.get(&keys::note(id)) {
            Some(Document::Note(note)) => Ok(note.clone()),
            _ => Err(Error::NotFound(format!("Note not found: {}", id))),
        }
    }

    async fn update_note(&self, note: &Note, expected_version: i64) -> Result<bool> {
        let key = keys::note(&note.id);
        let mut documents = self.write()?;
        match documents.get_mut(&key) {
            Some(Document::Note(stored)) if stored.version != expected_version => Ok(false),
            Some(Document::Note(stored)) => {
                *stored = note.clone();
                Ok(true)
            }
            _ => Err(Error::NotFound(format!("Note not found: {}", note.id))),
        }
    }

    async fn list_notes(&self, owner: &UserId) -> Result<Vec<Note>> {
        Ok(self
            .read()?
            .values()
            .filter_map(|doc| match doc {
                Document::Note(note) if &note.owner_id == owner => Some(note.clone()),
                _ => None,
            })
            .collect())
    }

    async fn list_workspace_notes(&self, workspace: &WorkspaceId) -> Result<Vec<Note>> {
        Ok(self
            .read()?
            .values()
            .filter_map(|doc| match doc {
                Document::Note(note) if &note.workspace_id == workspace => Some(note.clone()),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl NoteVersionStore for MemoryStore {
    async fn save_version(&self, version: &NoteVersion) -> Result<()> {
        let key = keys::version(&version.note_id, version.version);
        self.write()?
            .entry(key)
            .or_insert_with(|| Document::Version(version.clone()));
        Ok(())
    }

    async fn list_versions(&self, note: &NoteId, limit: usize) -> Result<Vec<NoteVersion>> {
        let mut versions = Self::versions_of(&*self.read()?, note);
        versions.truncate(limit);
        Ok(versions)
    }

    async fn get_version(&self, note: &NoteId, version: i64) -> Result<NoteVersion> {
        match self.read()?.get(&keys::version(note, version)) {
            Some(Document::Version(v)) => Ok(v.clone()),
            _ => Err(Error::NotFound(format!(
                "Version {} of note {} not found",
                version, note
            ))),
        }
    }

    async fn prune_versions(&self, note: &NoteId, keep_last: usize) -> Result<usize> {
        let mut documents = self.write()?;
        let versions = Self::versions_of(&documents, note);
        let mut removed = 0;
        for stale in versions.iter().skip(keep_last) {
            if documents
                .remove(&keys::version(&stale.note_id, stale.version))
                .is_some()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl ConflictStore for MemoryStore {
    async fn create_conflict(&self, conflict: &Conflict) -> Result<()> {
        self.write()?
            .insert(keys::conflict(&conflict.id), Document::Conflict(conflict.clone()));
        Ok(())
    }

    async fn get_conflict(&self, id: &ConflictId) -> Result<Conflict> {
        match self.read()?.get(&keys::conflict(id)) {
            Some(Document::Conflict(c)) => Ok(c.clone()),
            _ => Err(Error::NotFound(format!("Conflict not found: {}", id))),
        }
    }

    async fn list_user_conflicts(&self, owner: &UserId) -> Result<Vec<Conflict>> {
        let mut conflicts: Vec<Conflict> = self
            .read()?
            .values()
            .filter_map(|doc| match doc {
                Document::Conflict(c) if &c.owner_id == owner => Some(c.clone()),
                _ => None,
            })
            .collect();
        conflicts.sort_by(|a, b| a.detected_at.cmp(&b.detected_at));
        Ok(conflicts)
    }

    async fn list_note_conflicts(&self, note: &NoteId) -> Result<Vec<Conflict>> {
        let mut conflicts: Vec<Conflict> = self
            .read()?
            .values()
            .filter_map(|doc| match doc {
                Document::Conflict(c) if &c.note_id == note => Some(c.clone()),
                _ => None,
            })
            .collect();
        conflicts.sort_by(|a, b| a.detected_at.cmp(&b.detected_at));
        Ok(conflicts)
    }

    async fn mark_resolved(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        at: DateTime<Utc>,
    ) -> Result<Conflict> {
        let mut documents = self.write()?;
        match documents.get_mut(&keys::conflict(id)) {
            Some(Document::Conflict(c)) => {
                c.mark_resolved(strategy, at)?;
                Ok(c.clone())
            }
            _ => Err(Error::NotFound(format!("Conflict not found: {}", id))),
        }
    }

    async fn reopen_conflict(&self, id: &ConflictId) -> Result<Conflict> {
        let mut documents = self.write()?;
        match documents.get_mut(&keys::conflict(id)) {
            Some(Document::Conflict(c)) => {
                c.reopen();
                Ok(c.clone())
            }
            _ => Err(Error::NotFound(format!("Conflict not found: {}", id))),
        }
    }

    async fn delete_conflict(&self, id: &ConflictId) -> Result<()> {
        match self.write()?.remove(&keys::conflict(id)) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("Conflict not found: {}", id))),
        }
    }
}

#[async_trait]
impl SyncCursorStore for MemoryStore {
    async fn get_cursor(&self, user: &UserId, device: &DeviceId) -> Result<Option<SyncCursor>> {
        match self.read()?.get(&keys::cursor(user, device)) {
            Some(Document::Cursor(c)) => Ok(Some(c.clone())),
            _ => Ok(None),
        }
    }

    async fn put_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        self.write()?.insert(
            keys::cursor(&cursor.user_id, &cursor.device_id),
            Document::Cursor(cursor.clone()),
        );
        Ok(())
    }
}
