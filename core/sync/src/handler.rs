//! Real-time message handling for sync.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use notevault_common::Result;
use notevault_realtime::{
    InboundMessage, Message, MessageHandler, MessageType, SyncRequestPayload,
};

use crate::coordinator::SyncCoordinator;

/// Answers `sync_request` with `sync_response` and `ping` with `pong`.
pub struct SyncMessageHandler {
    coordinator: Arc<SyncCoordinator>,
}

impl SyncMessageHandler {
    pub fn new(coordinator: Arc<SyncCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl MessageHandler for SyncMessageHandler {
    async fn handle_message(&self, inbound: &InboundMessage) -> Result<Option<Message>> {
        match inbound.message.message_type {
            MessageType::SyncRequest => {
                let request: SyncRequestPayload = inbound.message.payload()?;
                // The connection's device is authoritative.
                let response = self
                    .coordinator
                    .process_cursor_sync(&inbound.user_id, &inbound.device_id, &request.note_versions)
                    .await?;
                Ok(Some(Message::new(MessageType::SyncResponse, &response)?))
            }
            MessageType::Ping => Ok(Some(Message::empty(MessageType::Pong))),
            MessageType::Pong => Ok(None),
            other => {
                debug!(
                    connection = %inbound.connection_id,
                    message_type = ?other,
                    "Ignoring message type"
                );
                Ok(None)
            }
        }
    }
}
