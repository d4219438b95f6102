//! Change descriptors returned by delta sync.

use serde::{Deserialize, Serialize};

use crate::note::Note;
use crate::types::NoteId;

/// Kind of change reported to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Update,
    Delete,
}

/// A note the device needs to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteChange {
    pub note_id: NoteId,
    pub operation: ChangeOperation,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<Note>,
}

impl NoteChange {
    /// Describe the current state of `note` as a change.
    ///
    /// Tombstoned notes are reported as deletes.
    pub fn from_note(note: &Note) -> Self {
        let operation = if note.is_deleted {
            ChangeOperation::Delete
        } else {
            ChangeOperation::Update
        };
        Self {
            note_id: note.id.clone(),
            operation,
            version: note.version,
            note: Some(note.clone()),
        }
    }
}
