//! Conflict records and resolution strategies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::note::{Note, NotePatch};
use crate::types::{ConflictId, DeviceId, NoteId, UserId};
use crate::{Error, Result};

/// What the losing writer was attempting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    Update,
    Delete,
}

/// Conflict resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Last writer wins, decided by timestamps.
    Lww,
    /// Keep the server's copy.
    Server,
    /// Apply the client's rejected patch.
    Client,
    /// Apply an externally supplied patch.
    Manual,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::Lww => "lww",
            ResolutionStrategy::Server => "server",
            ResolutionStrategy::Client => "client",
            ResolutionStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lww" => Ok(ResolutionStrategy::Lww),
            "server" => Ok(ResolutionStrategy::Server),
            "client" => Ok(ResolutionStrategy::Client),
            "manual" => Ok(ResolutionStrategy::Manual),
            other => Err(Error::InvalidResolution(format!(
                "unknown strategy: {}",
                other
            ))),
        }
    }
}

/// A failed optimistic update.
///
/// Immutable once created except for `resolved_at` and `resolution`, which
/// are set exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    pub note_id: NoteId,
    pub owner_id: UserId,
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    /// Version the client believed was current.
    pub base_version: i64,
    /// Version actually stored when the update arrived.
    pub server_version: i64,
    /// Version the client's edit would have produced.
    pub client_version: i64,
    /// Full server note at detection time.
    pub server_note: Note,
    /// The rejected partial update.
    pub client_patch: NotePatch,
    pub device_id: DeviceId,
    pub detected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionStrategy>,
}

impl Conflict {
    /// Record a version mismatch between `expected_version` and `note`.
    pub fn detect(
        note: &Note,
        patch: NotePatch,
        expected_version: i64,
        device: DeviceId,
        now: DateTime<Utc>,
    ) -> Self {
        let conflict_type = if patch.is_delete() {
            ConflictType::Delete
        } else {
            ConflictType::Update
        };

        Self {
            id: ConflictId::generate(),
            note_id: note.id.clone(),
            owner_id: note.owner_id.clone(),
            conflict_type,
            base_version: expected_version,
            server_version: note.version,
            client_version: expected_version + 1,
            server_note: note.clone(),
            client_patch: patch,
            device_id: device,
            detected_at: now,
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Set the resolution fields.
    ///
    /// # Errors
    /// - `InvalidResolution` if the conflict was already resolved
    pub fn mark_resolved(&mut self, strategy: ResolutionStrategy, at: DateTime<Utc>) -> Result<()> {
        if let Some(previous) = self.resolution {
            return Err(Error::InvalidResolution(format!(
                "conflict {} already resolved with strategy {}",
                self.id, previous
            )));
        }
        self.resolved_at = Some(at);
        self.resolution = Some(strategy);
        Ok(())
    }

    /// Undo [`mark_resolved`](Self::mark_resolved).
    pub fn reopen(&mut self) {
        self.resolved_at = None;
        self.resolution = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::{NewNote, NoteType};
    use crate::types::WorkspaceId;

    fn note_at_version(version: i64) -> Note {
        let mut note = Note::create(
            UserId::new("u").unwrap(),
            NewNote {
                workspace_id: WorkspaceId::new("ws").unwrap(),
                parent_id: None,
                note_type: NoteType::File,
                encrypted_title: "t".to_string(),
                encrypted_content: "c".to_string(),
                encryption_algo: "a".to_string(),
                nonce: "n".to_string(),
                content_hash: "h".to_string(),
                device_id: DeviceId::new("d").unwrap(),
            },
            Utc::now(),
        );
        note.version = version;
        note
    }

    #[test]
    fn test_detect_records_versions() {
        let note = note_at_version(2);
        let conflict = Conflict::detect(
            &note,
            NotePatch::default(),
            1,
            DeviceId::new("stale").unwrap(),
            Utc::now(),
        );
        assert_eq!(conflict.base_version, 1);
        assert_eq!(conflict.server_version, 2);
        assert_eq!(conflict.client_version, 2);
        assert_eq!(conflict.conflict_type, ConflictType::Update);
        assert!(!conflict.is_resolved());
    }

    #[test]
    fn test_detect_tombstone_is_delete_conflict() {
        let note = note_at_version(5);
        let conflict = Conflict::detect(
            &note,
            NotePatch::tombstone(Some(4)),
            4,
            DeviceId::new("d").unwrap(),
            Utc::now(),
        );
        assert_eq!(conflict.conflict_type, ConflictType::Delete);
    }

    #[test]
    fn test_mark_resolved_only_once() {
        let note = note_at_version(2);
        let mut conflict = Conflict::detect(
            &note,
            NotePatch::default(),
            1,
            DeviceId::new("d").unwrap(),
            Utc::now(),
        );
        conflict
            .mark_resolved(ResolutionStrategy::Server, Utc::now())
            .unwrap();
        let err = conflict
            .mark_resolved(ResolutionStrategy::Client, Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResolution(_)));
        assert_eq!(conflict.resolution, Some(ResolutionStrategy::Server));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "lww".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::Lww
        );
        assert_eq!(
            "manual".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::Manual
        );
        let err = "merge".parse::<ResolutionStrategy>().unwrap_err();
        assert!(err.to_string().contains("unknown strategy: merge"));
    }
}
