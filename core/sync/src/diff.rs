//! Two-sided batch diff between a client's local state and the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use notevault_common::{Note, NoteId, WorkspaceId};

/// What a client holds locally for one note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientNoteEntry {
    pub id: NoteId,
    pub content_hash: String,
    pub version: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchDiffRequest {
    #[serde(default)]
    pub workspace_id: Option<WorkspaceId>,
    #[serde(default)]
    pub local_notes: Vec<ClientNoteEntry>,
}

/// Both sides changed a note since they last agreed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffConflict {
    pub note_id: NoteId,
    pub local_hash: String,
    pub server_hash: String,
    pub local_version: i64,
    pub server_version: i64,
}

/// Actions the client should take to converge with the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDiffResponse {
    pub to_download: Vec<Note>,
    pub to_upload: Vec<NoteId>,
    pub to_delete: Vec<NoteId>,
    pub conflicts: Vec<DiffConflict>,
    pub sync_time: DateTime<Utc>,
}

/// Classify every server note against the client's entries.
///
/// Notes only the client knows about are not reported; the client handles
/// those on its own.
pub fn classify(
    server_notes: &[Note],
    local_notes: &[ClientNoteEntry],
    sync_time: DateTime<Utc>,
) -> BatchDiffResponse {
    let client: HashMap<&NoteId, &ClientNoteEntry> =
        local_notes.iter().map(|entry| (&entry.id, entry)).collect();

    let mut response = BatchDiffResponse {
        to_download: Vec::new(),
        to_upload: Vec::new(),
        to_delete: Vec::new(),
        conflicts: Vec::new(),
        sync_time,
    };

    for note in server_notes {
        let local = client.get(&note.id);

        if note.is_deleted {
            if local.is_some() {
                response.to_delete.push(note.id.clone());
            }
            continue;
        }

        let Some(local) = local else {
            response.to_download.push(note.clone());
            continue;
        };

        if note.content_hash == local.content_hash {
            continue;
        }

        if note.version > local.version {
            response.conflicts.push(DiffConflict {
                note_id: note.id.clone(),
                local_hash: local.content_hash.clone(),
                server_hash: note.content_hash.clone(),
                local_version: local.version,
                server_version: note.version,
            });
        } else {
            response.to_upload.push(note.id.clone());
        }
    }

    response
}
