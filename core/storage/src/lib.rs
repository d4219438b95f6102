//! Storage collaborators for the NoteVault sync server.
//!
//! The sync core only needs id-addressed get/put plus a few equality and
//! range queries, expressed as four narrow traits. Two document-store
//! backends implement all of them:
//!
//! - [`MemoryStore`]: in-process, for tests and ephemeral servers
//! - [`SqliteStore`]: a single-table SQLite document store
//!
//! Both namespace document keys by entity kind (see [`keys`]).

pub mod keys;
pub mod memory;
pub mod provider;
pub mod sqlite;

pub use memory::MemoryStore;
pub use provider::{ConflictStore, NoteStore, NoteVersionStore, Stores, SyncCursorStore};
pub use sqlite::SqliteStore;
