//! Message envelope and payloads for the real-time channel.
//!
//! Every frame is a JSON envelope `{type, timestamp, payload}` where the
//! payload shape depends on `type`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use notevault_common::{
    Conflict, ConflictId, DeviceId, Error, Note, NoteChange, NoteId, Result,
};

/// Envelope discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    SyncRequest,
    SyncResponse,
    NoteUpdate,
    NoteDelete,
    Conflict,
    Ack,
    Ping,
    Pong,
}

/// Real-time message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Message {
    /// Wrap a typed payload.
    pub fn new<T: Serialize>(message_type: MessageType, payload: &T) -> Result<Self> {
        Ok(Self {
            message_type,
            timestamp: Utc::now(),
            payload: Some(serde_json::to_value(payload)?),
        })
    }

    /// A message without payload (ping, pong).
    pub fn empty(message_type: MessageType) -> Self {
        Self {
            message_type,
            timestamp: Utc::now(),
            payload: None,
        }
    }

    /// Decode the payload as `T`.
    ///
    /// # Errors
    /// - `InvalidInput` if the message carries no payload
    /// - `Serialization` if the payload does not match `T`
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        let payload = self.payload.clone().ok_or_else(|| {
            Error::InvalidInput(format!("{:?} message has no payload", self.message_type))
        })?;
        Ok(serde_json::from_value(payload)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Fan-out notice for a created or updated note.
    pub fn note_update(note: &Note, device: &DeviceId) -> Result<Self> {
        Self::new(
            MessageType::NoteUpdate,
            &NoteUpdatePayload {
                note_id: note.id.clone(),
                version: note.version,
                encrypted_title: note.encrypted_title.clone(),
                encrypted_content: note.encrypted_content.clone(),
                updated_at: note.updated_at,
                device_id: device.clone(),
            },
        )
    }

    /// Fan-out notice for a tombstoned note.
    pub fn note_delete(note: &Note, device: &DeviceId) -> Result<Self> {
        Self::new(
            MessageType::NoteDelete,
            &NoteDeletePayload {
                note_id: note.id.clone(),
                version: note.version,
                device_id: device.clone(),
            },
        )
    }

    /// Notice that a device's update was rejected.
    pub fn conflict(conflict: &Conflict) -> Result<Self> {
        Self::new(
            MessageType::Conflict,
            &ConflictPayload {
                conflict_id: conflict.id.clone(),
                note_id: conflict.note_id.clone(),
                server_version: conflict.server_version,
                client_version: conflict.client_version,
                server_data: conflict.server_note.clone(),
            },
        )
    }

    /// Failure acknowledgement for an inbound message.
    pub fn ack_failure(message_type: MessageType, error: impl Into<String>) -> Result<Self> {
        Self::new(
            MessageType::Ack,
            &AckPayload {
                message_type,
                success: false,
                error: Some(error.into()),
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequestPayload {
    pub device_id: DeviceId,
    pub last_sync_time: DateTime<Utc>,
    #[serde(default)]
    pub note_versions: HashMap<NoteId, i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponsePayload {
    pub changes: Vec<NoteChange>,
    pub has_more: bool,
    pub sync_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteUpdatePayload {
    pub note_id: NoteId,
    pub version: i64,
    pub encrypted_title: String,
    pub encrypted_content: String,
    pub updated_at: DateTime<Utc>,
    pub device_id: DeviceId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteDeletePayload {
    pub note_id: NoteId,
    pub version: i64,
    pub device_id: DeviceId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictPayload {
    pub conflict_id: ConflictId,
    pub note_id: NoteId,
    pub server_version: i64,
    pub client_version: i64,
    pub server_data: Note,
}

/// Acknowledgement of an inbound message of `message_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckPayload {
    pub message_type: MessageType,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
