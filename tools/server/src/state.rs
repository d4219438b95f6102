//! Shared handler state.

use std::sync::Arc;
use tokio::sync::mpsc;

use notevault_realtime::{
    inbound_channel, ConnectionRegistry, Dispatcher, InboundMessage, RealtimeConfig,
};
use notevault_storage::Stores;
use notevault_sync::{ConflictResolver, SyncConfig, SyncCoordinator, SyncMessageHandler};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SyncCoordinator>,
    pub resolver: Arc<ConflictResolver>,
    pub registry: Arc<ConnectionRegistry>,
    pub inbound: mpsc::Sender<InboundMessage>,
    pub realtime: RealtimeConfig,
}

impl AppState {
    /// Wire the sync core to the connection registry.
    ///
    /// The returned dispatcher must be spawned for real-time requests to be
    /// answered.
    pub fn new(stores: Stores, realtime: RealtimeConfig, sync: SyncConfig) -> (Self, Dispatcher) {
        let registry = Arc::new(ConnectionRegistry::new(&realtime));
        let coordinator = Arc::new(
            SyncCoordinator::new(stores.clone(), sync.clone()).with_registry(registry.clone()),
        );
        let resolver =
            Arc::new(ConflictResolver::new(stores, sync).with_registry(registry.clone()));

        let (inbound, receiver) = inbound_channel(realtime.inbound_queue_capacity);
        let handler = Arc::new(SyncMessageHandler::new(coordinator.clone()));
        let dispatcher = Dispatcher::new(registry.clone(), handler, receiver);

        let state = Self {
            coordinator,
            resolver,
            registry,
            inbound,
            realtime,
        };
        (state, dispatcher)
    }
}
