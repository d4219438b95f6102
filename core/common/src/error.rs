//! Common error types for NoteVault.

use thiserror::Error;

use crate::conflict::Conflict;
use crate::types::UserId;

/// Top-level error type for sync server operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The entity is not owned by the requester.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Optimistic version check failed.
    ///
    /// Carries the persisted conflict so the caller can pick a resolution
    /// strategy. This is the only failure with a usable payload.
    #[error(
        "Version conflict on note {}: expected version {}, server has {}",
        .0.note_id,
        .0.base_version,
        .0.server_version
    )]
    VersionConflict(Box<Conflict>),

    /// Conflict resolution request cannot be applied.
    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),

    /// Storage collaborator failed. Never retried by the core.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Real-time connection refused because the user is at the cap.
    #[error("Connection limit of {limit} reached for user {user}")]
    CapacityRejected { user: UserId, limit: usize },

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// The conflict carried by a `VersionConflict`, if any.
    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            Error::VersionConflict(conflict) => Some(conflict),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
