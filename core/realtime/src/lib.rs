//! Real-time fan-out for the NoteVault sync server.
//!
//! This crate provides:
//! - The message envelope and typed payloads carried over the live channel
//! - A connection registry with a per-user admission cap and non-blocking
//!   fan-out that evicts stalled consumers instead of waiting on them
//! - Per-connection inbound/outbound loops with ping/pong liveness
//! - A dispatcher that routes inbound messages to a [`MessageHandler`]

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod protocol;
pub mod registry;

pub use config::RealtimeConfig;
pub use connection::{serve_connection, Frame};
pub use dispatch::{inbound_channel, Dispatcher, InboundMessage, MessageHandler};
pub use protocol::{
    AckPayload, ConflictPayload, Message, MessageType, NoteDeletePayload, NoteUpdatePayload,
    SyncRequestPayload, SyncResponsePayload,
};
pub use registry::{Connection, ConnectionId, ConnectionRegistry, ConnectionSession};
