//! Document key namespacing.
//!
//! Each entity kind gets its own prefix so ids from different kinds never
//! collide inside one document store.

use notevault_common::{ConflictId, DeviceId, NoteId, UserId};

pub const NOTE_PREFIX: &str = "note:";
pub const VERSION_PREFIX: &str = "version:";
pub const CURSOR_PREFIX: &str = "sync:";
pub const CONFLICT_PREFIX: &str = "conflict:";

pub fn note(id: &NoteId) -> String {
    format!("{}{}", NOTE_PREFIX, id)
}

pub fn version(note: &NoteId, version: i64) -> String {
    format!("{}{}:{}", VERSION_PREFIX, note, version)
}

pub fn cursor(user: &UserId, device: &DeviceId) -> String {
    format!("{}{}:{}", CURSOR_PREFIX, user, device)
}

pub fn conflict(id: &ConflictId) -> String {
    format!("{}{}", CONFLICT_PREFIX, id)
}
