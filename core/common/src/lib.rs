//! Common types shared across the NoteVault sync server.
//!
//! This crate holds the error taxonomy and the data model that every other
//! crate speaks: notes and their partial patches, the append-only version
//! log, conflicts, and per-device sync cursors. The server never interprets
//! note content; every `encrypted_*` field is opaque ciphertext.

pub mod change;
pub mod conflict;
pub mod cursor;
pub mod error;
pub mod note;
pub mod types;

pub use change::{ChangeOperation, NoteChange};
pub use conflict::{Conflict, ConflictType, ResolutionStrategy};
pub use cursor::SyncCursor;
pub use error::{Error, Result};
pub use note::{ManifestEntry, NewNote, Note, NotePatch, NoteType, NoteVersion};
pub use types::{ConflictId, DeviceId, NoteId, UserId, WorkspaceId};
