//! SQLite-backed document store.
//!
//! Every entity is a JSON document in one table, keyed with the prefixes
//! from [`crate::keys`]. A handful of indexed columns carry the fields the
//! sync core queries by.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use notevault_common::{
    Conflict, ConflictId, DeviceId, Error, Note, NoteId, NoteVersion, ResolutionStrategy, Result,
    SyncCursor, UserId, WorkspaceId,
};

use crate::keys;
use crate::provider::{ConflictStore, NoteStore, NoteVersionStore, SyncCursorStore};

const KIND_NOTE: &str = "note";
const KIND_VERSION: &str = "version";
const KIND_CURSOR: &str = "sync";
const KIND_CONFLICT: &str = "conflict";

fn db_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    Ok(serde_json::from_str(body)?)
}

/// Thread-safe SQLite document store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
            .map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        debug!("Opened document store at {}", path.display());
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS documents (
                    id TEXT PRIMARY KEY,
                    kind TEXT NOT NULL,
                    owner TEXT,
                    scope TEXT,
                    seq INTEGER,
                    body TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(kind, owner);
                CREATE INDEX IF NOT EXISTS idx_documents_scope ON documents(kind, scope, seq);",
            )
            .map_err(db_err)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("document store lock poisoned".to_string()))
    }

    fn get_body(&self, id: &str) -> Result<Option<String>> {
        self.conn()?
            .query_row("SELECT body FROM documents WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)
    }

    fn query_bodies(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(args, |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    fn upsert(
        &self,
        id: &str,
        kind: &str,
        owner: Option<&str>,
        scope: Option<&str>,
        seq: Option<i64>,
        body: &str,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO documents (id, kind, owner, scope, seq, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    owner = excluded.owner,
                    scope = excluded.scope,
                    seq = excluded.seq,
                    body = excluded.body",
                params![id, kind, owner, scope, seq, body],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Read, change and write back a conflict while holding the connection.
    fn modify_conflict<F>(&self, id: &ConflictId, change: F) -> Result<Conflict>
    where
        F: FnOnce(&mut Conflict) -> Result<()>,
    {
        let key = keys::conflict(id);
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row("SELECT body FROM documents WHERE id = ?1", [&key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)?;
        let mut conflict: Conflict = match body {
            Some(body) => decode(&body)?,
            None => return Err(Error::NotFound(format!("Conflict not found: {}", id))),
        };

        change(&mut conflict)?;
        conn.execute(
            "UPDATE documents SET body = ?2 WHERE id = ?1",
            params![key, encode(&conflict)?],
        )
        .map_err(db_err)?;
        Ok(conflict)
    }

    fn put_conflict(&self, conflict: &Conflict) -> Result<()> {
        self.upsert(
            &keys::conflict(&conflict.id),
            KIND_CONFLICT,
            Some(conflict.owner_id.as_str()),
            Some(conflict.note_id.as_str()),
            Some(conflict.detected_at.timestamp_millis()),
            &encode(conflict)?,
        )
    }
}

#[async_trait]
impl NoteStore for SqliteStore {
    async fn create_note(&self, note: &Note) -> Result<()> {
        let inserted = self
            .conn()?
            .execute(
                "INSERT OR IGNORE INTO documents (id, kind, owner, scope, seq, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    keys::note(&note.id),
                    KIND_NOTE,
                    note.owner_id.as_str(),
                    note.workspace_id.as_str(),
                    note.version,
                    encode(note)?
                ],
            )
            .map_err(db_err)?;
        if inserted == 0 {
            return Err(Error::InvalidInput(format!("Note already exists: {}", note.id)));
        }
        Ok(())
    }

    async fn get_note(&self, id: &NoteId) -> Result<Note> {
        match self.get_body(&keys::note(id))? {
            Some(body) => decode(&body),
            None => Err(Error::NotFound(format!("Note not found: {}", id))),
        }
    }

    async fn update_note(&self, note: &Note, expected_version: i64) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE documents SET owner = ?2, scope = ?3, seq = ?4, body = ?5
                 WHERE id = ?1 AND kind = 'note' AND seq = ?6",
                params![
                    keys::note(&note.id),
                    note.owner_id.as_str(),
                    note.workspace_id.as_str(),
                    note.version,
                    encode(note)?,
                    expected_version
                ],
            )
            .map_err(db_err)?;
        if updated > 0 {
            return Ok(true);
        }

        let exists = conn
            .query_row(
                "SELECT 1 FROM documents WHERE id = ?1 AND kind = 'note'",
                [keys::note(&note.id)],
                |_| Ok(()),
            )
            .optional()
            .map_err(db_err)?;
        match exists {
            Some(()) => Ok(false),
            None => Err(Error::NotFound(format!("Note not found: {}", note.id))),
        }
    }

    async fn list_notes(&self, owner: &UserId) -> Result<Vec<Note>> {
        self.query_bodies(
            "SELECT body FROM documents WHERE kind = ?1 AND owner = ?2",
            &[&KIND_NOTE, &owner.as_str()],
        )?
        .iter()
        .map(|body| decode(body))
        .collect()
    }

    async fn list_workspace_notes(&self, workspace: &WorkspaceId) -> Result<Vec<Note>> {
        self.query_bodies(
            "SELECT body FROM documents WHERE kind = ?1 AND scope = ?2",
            &[&KIND_NOTE, &workspace.as_str()],
        )?
        .iter()
        .map(|body| decode(body))
        .collect()
    }
}

#[async_trait]
impl NoteVersionStore for SqliteStore {
    async fn save_version(&self, version: &NoteVersion) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR IGNORE INTO documents (id, kind, owner, scope, seq, body)
                 VALUES (?1, ?2, NULL, ?3, ?4, ?5)",
                params![
                    keys::version(&version.note_id, version.version),
                    KIND_VERSION,
                    version.note_id.as_str(),
                    version.version,
                    encode(version)?
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_versions(&self, note: &NoteId, limit: usize) -> Result<Vec<NoteVersion>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_bodies(
            "SELECT body FROM documents WHERE kind = ?1 AND scope = ?2
             ORDER BY seq DESC LIMIT ?3",
            &[&KIND_VERSION, &note.as_str(), &limit],
        )?
        .iter()
        .map(|body| decode(body))
        .collect()
    }

    async fn get_version(&self, note: &NoteId, version: i64) -> Result<NoteVersion> {
        match self.get_body(&keys::version(note, version))? {
            Some(body) => decode(&body),
            None => Err(Error::NotFound(format!(
                "Version {} of note {} not found",
                version, note
            ))),
        }
    }

    async fn prune_versions(&self, note: &NoteId, keep_last: usize) -> Result<usize> {
        let keep = i64::try_from(keep_last).unwrap_or(i64::MAX);
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM documents WHERE kind = ?1 AND scope = ?2 AND id NOT IN (
                    SELECT id FROM documents WHERE kind = ?1 AND scope = ?2
                    ORDER BY seq DESC LIMIT ?3
                 )",
                params![KIND_VERSION, note.as_str(), keep],
            )
            .map_err(db_err)?;
        Ok(removed)
    }
}

#[async_trait]
impl ConflictStore for SqliteStore {
    async fn create_conflict(&self, conflict: &Conflict) -> Result<()> {
        self.put_conflict(conflict)
    }

    async fn get_conflict(&self, id: &ConflictId) -> Result<Conflict> {
        match self.get_body(&keys::conflict(id))? {
            Some(body) => decode(&body),
            None => Err(Error::NotFound(format!("Conflict not found: {}", id))),
        }
    }

    async fn list_user_conflicts(&self, owner: &UserId) -> Result<Vec<Conflict>> {
        self.query_bodies(
            "SELECT body FROM documents WHERE kind = ?1 AND owner = ?2 ORDER BY seq",
            &[&KIND_CONFLICT, &owner.as_str()],
        )?
        .iter()
        .map(|body| decode(body))
        .collect()
    }

    async fn list_note_conflicts(&self, note: &NoteId) -> Result<Vec<Conflict>> {
        self.query_bodies(
            "SELECT body FROM documents WHERE kind = ?1 AND scope = ?2 ORDER BY seq",
            &[&KIND_CONFLICT, &note.as_str()],
        )?
        .iter()
        .map(|body| decode(body))
        .collect()
    }

    async fn mark_resolved(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        at: DateTime<Utc>,
    ) -> Result<Conflict> {
        self.modify_conflict(id, |conflict| conflict.mark_resolved(strategy, at))
    }

    async fn reopen_conflict(&self, id: &ConflictId) -> Result<Conflict> {
        self.modify_conflict(id, |conflict| {
            conflict.reopen();
            Ok(())
        })
    }

    async fn delete_conflict(&self, id: &ConflictId) -> Result<()> {
        let removed = self
            .conn()?
            .execute("DELETE FROM documents WHERE id = ?1", [keys::conflict(id)])
            .map_err(db_err)?;
        if removed == 0 {
            return Err(Error::NotFound(format!("Conflict not found: {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl SyncCursorStore for SqliteStore {
    async fn get_cursor(&self, user: &UserId, device: &DeviceId) -> Result<Option<SyncCursor>> {
        self.get_body(&keys::cursor(user, device))?
            .map(|body| decode(&body))
            .transpose()
    }

    async fn put_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        self.upsert(
            &keys::cursor(&cursor.user_id, &cursor.device_id),
            KIND_CURSOR,
            Some(cursor.user_id.as_str()),
            Some(cursor.device_id.as_str()),
            None,
            &encode(cursor)?,
        )
    }
}
