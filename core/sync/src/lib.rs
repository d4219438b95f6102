//! NoteVault sync core
//!
//! This module provides the server side of multi-device note sync:
//! - Delta sync by cursor, by timestamp, by full manifest and by batch diff
//! - Optimistic-concurrency mutations with conflict capture
//! - Conflict resolution (server, client, manual, last-writer-wins)
//! - Best-effort fan-out of changes to a user's other devices
//! - The real-time message handler for inbound sync requests

pub mod config;
pub mod coordinator;
pub mod diff;
pub mod handler;
mod mutation;
mod notify;
pub mod resolver;

#[cfg(test)]
mod testing;

pub use config::SyncConfig;
pub use coordinator::{Manifest, SyncCoordinator};
pub use diff::{BatchDiffRequest, BatchDiffResponse, ClientNoteEntry, DiffConflict};
pub use handler::SyncMessageHandler;
pub use resolver::ConflictResolver;
