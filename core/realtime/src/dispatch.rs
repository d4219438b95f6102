//! Routing of inbound messages.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use notevault_common::{DeviceId, Result, UserId};

use crate::protocol::Message;
use crate::registry::{ConnectionId, ConnectionRegistry};

/// A decoded message together with the connection it arrived on.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub message: Message,
}

/// Application logic behind the real-time channel.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one inbound message.
    ///
    /// `Ok(Some(reply))` is sent back to the originating connection.
    /// An error is reported to that connection as a failed `ack`.
    async fn handle_message(&self, inbound: &InboundMessage) -> Result<Option<Message>>;
}

/// The shared inbound queue every connection forwards into.
pub fn inbound_channel(
    capacity: usize,
) -> (mpsc::Sender<InboundMessage>, mpsc::Receiver<InboundMessage>) {
    mpsc::channel(capacity.max(1))
}

/// Drains the inbound queue in arrival order.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    handler: Arc<dyn MessageHandler>,
    inbound: mpsc::Receiver<InboundMessage>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        handler: Arc<dyn MessageHandler>,
        inbound: mpsc::Receiver<InboundMessage>,
    ) -> Self {
        Self {
            registry,
            handler,
            inbound,
        }
    }

    /// Run until every sender of the inbound queue is gone.
    pub async fn run(mut self) {
        info!("Dispatcher started");
        while let Some(inbound) = self.inbound.recv().await {
            self.dispatch(&inbound).await;
        }
        info!("Dispatcher stopped");
    }

    async fn dispatch(&self, inbound: &InboundMessage) {
        let reply = match self.handler.handle_message(inbound).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err(e) => {
                warn!(
                    connection = %inbound.connection_id,
                    message_type = ?inbound.message.message_type,
                    error = %e,
                    "Inbound message failed"
                );
                match Message::ack_failure(inbound.message.message_type, e.to_string()) {
                    Ok(ack) => ack,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode ack");
                        return;
                    }
                }
            }
        };

        match self.registry.send_to_client(&inbound.connection_id, &reply) {
            Ok(true) => {}
            Ok(false) => debug!(connection = %inbound.connection_id, "Reply dropped"),
            Err(e) => warn!(connection = %inbound.connection_id, error = %e, "Failed to send reply"),
        }
    }
}
