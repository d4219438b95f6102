//! Notes, partial patches, version snapshots and manifest entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{DeviceId, NoteId, UserId, WorkspaceId};

/// Kind of tree node a note represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    File,
    Directory,
}

/// A stored note.
///
/// Title and content are ciphertext produced by the client; `content_hash`
/// is a client-computed integrity hash that the server only compares for
/// equality. Notes are never hard-deleted; deletion sets `is_deleted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub owner_id: UserId,
    pub workspace_id: WorkspaceId,
    pub parent_id: Option<NoteId>,
    #[serde(rename = "type")]
    pub note_type: NoteType,
    pub encrypted_title: String,
    pub encrypted_content: String,
    pub encryption_algo: String,
    pub nonce: String,
    pub content_hash: String,
    /// Starts at 1 and increases by exactly one per successful mutation.
    pub version: i64,
    pub is_deleted: bool,
    pub last_edit_device: DeviceId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Build a fresh note at version 1 from a create request.
    pub fn create(owner: UserId, request: NewNote, now: DateTime<Utc>) -> Self {
        Self {
            id: NoteId::generate(),
            owner_id: owner,
            workspace_id: request.workspace_id,
            parent_id: request.parent_id,
            note_type: request.note_type,
            encrypted_title: request.encrypted_title,
            encrypted_content: request.encrypted_content,
            encryption_algo: request.encryption_algo,
            nonce: request.nonce,
            content_hash: request.content_hash,
            version: 1,
            is_deleted: false,
            last_edit_device: request.device_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether `user` owns this note.
    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.owner_id == user
    }

    /// Immutable snapshot of the current state for the version log.
    pub fn snapshot(&self, now: DateTime<Utc>) -> NoteVersion {
        NoteVersion {
            note_id: self.id.clone(),
            version: self.version,
            encrypted_title: self.encrypted_title.clone(),
            encrypted_content: self.encrypted_content.clone(),
            content_hash: self.content_hash.clone(),
            device_id: self.last_edit_device.clone(),
            created_at: now,
        }
    }

    /// Lightweight projection used for reconciliation.
    pub fn manifest_entry(&self) -> ManifestEntry {
        ManifestEntry {
            id: self.id.clone(),
            content_hash: self.content_hash.clone(),
            version: self.version,
            updated_at: self.updated_at,
            is_deleted: self.is_deleted,
        }
    }

    /// Apply a patch and advance the version.
    ///
    /// # Postconditions
    /// - Only fields present in `patch` change
    /// - `version` is exactly one higher, `updated_at == now`
    /// - `last_edit_device` is `device`
    pub fn apply(&mut self, patch: &NotePatch, device: &DeviceId, now: DateTime<Utc>) {
        patch.apply_fields(self);
        self.updated_at = now;
        self.version += 1;
        self.last_edit_device = device.clone();
    }
}

/// Request to create a note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNote {
    pub workspace_id: WorkspaceId,
    #[serde(default)]
    pub parent_id: Option<NoteId>,
    #[serde(rename = "type")]
    pub note_type: NoteType,
    pub encrypted_title: String,
    #[serde(default)]
    pub encrypted_content: String,
    pub encryption_algo: String,
    pub nonce: String,
    #[serde(default)]
    pub content_hash: String,
    pub device_id: DeviceId,
}

/// Partial update of a note.
///
/// Absent fields leave the stored value untouched. `expected_version`
/// enables the optimistic check; when omitted the update always applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_algo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// `Some(None)` (an explicit JSON `null`) moves the note to the root.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<Option<NoteId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<i64>,
}

impl NotePatch {
    /// Patch that only sets the tombstone.
    pub fn tombstone(expected_version: Option<i64>) -> Self {
        Self {
            is_deleted: Some(true),
            expected_version,
            ..Self::default()
        }
    }

    /// Copy every present field onto `note`. Does not touch version metadata.
    pub fn apply_fields(&self, note: &mut Note) {
        if let Some(title) = &self.encrypted_title {
            note.encrypted_title = title.clone();
        }
        if let Some(content) = &self.encrypted_content {
            note.encrypted_content = content.clone();
        }
        if let Some(algo) = &self.encryption_algo {
            note.encryption_algo = algo.clone();
        }
        if let Some(nonce) = &self.nonce {
            note.nonce = nonce.clone();
        }
        if let Some(parent) = &self.parent_id {
            note.parent_id = parent.clone();
        }
        if let Some(deleted) = self.is_deleted {
            note.is_deleted = deleted;
        }
        if let Some(hash) = &self.content_hash {
            note.content_hash = hash.clone();
        }
    }

    /// Whether this patch sets the tombstone.
    pub fn is_delete(&self) -> bool {
        self.is_deleted == Some(true)
    }
}

/// Keep an explicit `null` apart from an absent field.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Immutable snapshot appended to the version log before each mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteVersion {
    pub note_id: NoteId,
    pub version: i64,
    pub encrypted_title: String,
    pub encrypted_content: String,
    pub content_hash: String,
    pub device_id: DeviceId,
    pub created_at: DateTime<Utc>,
}

/// Compact projection of a note used for bulk reconciliation. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: NoteId,
    pub content_hash: String,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn new_note() -> NewNote {
        NewNote {
            workspace_id: WorkspaceId::new("ws").unwrap(),
            parent_id: None,
            note_type: NoteType::File,
            encrypted_title: "t0".to_string(),
            encrypted_content: "c0".to_string(),
            encryption_algo: "xchacha20poly1305".to_string(),
            nonce: "n0".to_string(),
            content_hash: "h0".to_string(),
            device_id: DeviceId::new("laptop").unwrap(),
        }
    }

    #[test]
    fn test_create_starts_at_version_one() {
        let note = Note::create(UserId::new("u").unwrap(), new_note(), Utc::now());
        assert_eq!(note.version, 1);
        assert!(!note.is_deleted);
        assert_eq!(note.created_at, note.updated_at);
    }

    #[test]
    fn test_patch_leaves_absent_fields_untouched() {
        let mut note = Note::create(UserId::new("u").unwrap(), new_note(), Utc::now());
        let patch = NotePatch {
            encrypted_content: Some("c1".to_string()),
            content_hash: Some("h1".to_string()),
            ..NotePatch::default()
        };
        let phone = DeviceId::new("phone").unwrap();
        note.apply(&patch, &phone, Utc::now());

        assert_eq!(note.encrypted_content, "c1");
        assert_eq!(note.content_hash, "h1");
        assert_eq!(note.encrypted_title, "t0");
        assert_eq!(note.nonce, "n0");
        assert_eq!(note.version, 2);
        assert_eq!(note.last_edit_device, phone);
    }

    #[test]
    fn test_patch_deserializes_missing_fields_as_absent() {
        let patch: NotePatch =
            serde_json::from_str(r#"{"encrypted_title":"x","expected_version":3}"#).unwrap();
        assert_eq!(patch.encrypted_title.as_deref(), Some("x"));
        assert_eq!(patch.expected_version, Some(3));
        assert!(patch.encrypted_content.is_none());
        assert!(!patch.is_delete());
    }

    #[test]
    fn test_patch_null_parent_clears_it() {
        let mut note = Note::create(UserId::new("u").unwrap(), new_note(), Utc::now());
        note.parent_id = Some(NoteId::new("folder").unwrap());
        let device = DeviceId::new("d").unwrap();

        let untouched: NotePatch = serde_json::from_str(r#"{"nonce":"n1"}"#).unwrap();
        assert_eq!(untouched.parent_id, None);
        note.apply(&untouched, &device, Utc::now());
        assert_eq!(note.parent_id.as_ref().map(NoteId::as_str), Some("folder"));

        let moved: NotePatch = serde_json::from_str(r#"{"parent_id":"other"}"#).unwrap();
        note.apply(&moved, &device, Utc::now());
        assert_eq!(note.parent_id.as_ref().map(NoteId::as_str), Some("other"));

        let cleared: NotePatch = serde_json::from_str(r#"{"parent_id":null}"#).unwrap();
        assert_eq!(cleared.parent_id, Some(None));
        note.apply(&cleared, &device, Utc::now());
        assert!(note.parent_id.is_none());

        let json = serde_json::to_value(&cleared).unwrap();
        assert!(json["parent_id"].is_null());
        assert!(json.get("parent_id").is_some());
    }

    #[test]
    fn test_note_type_serializes_lowercase() {
        let note = Note::create(UserId::new("u").unwrap(), new_note(), Utc::now());
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["type"], "file");
    }

    proptest! {
        #[test]
        fn prop_version_strictly_increases_by_one(steps in 1usize..40) {
            let device = DeviceId::new("d").unwrap();
            let mut note = Note::create(UserId::new("u").unwrap(), new_note(), Utc::now());
            for i in 0..steps {
                let before = note.version;
                let patch = NotePatch {
                    content_hash: Some(format!("h{}", i)),
                    ..NotePatch::default()
                };
                note.apply(&patch, &device, Utc::now());
                prop_assert_eq!(note.version, before + 1);
            }
            prop_assert_eq!(note.version, 1 + steps as i64);
        }
    }
}
