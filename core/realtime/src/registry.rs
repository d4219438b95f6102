//! Connection registry.
//!
//! Tracks live connections per user and fans messages out to them. Fan-out
//! never blocks: each connection has a bounded outbound queue, and a
//! connection whose queue is full (or closed) is evicted.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use notevault_common::{DeviceId, Error, Result, UserId};

use crate::config::RealtimeConfig;
use crate::protocol::Message;

/// Identifies one live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The registry's half of a connection: identity plus the sending end of
/// its outbound queue.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub device_id: DeviceId,
    sender: mpsc::Sender<String>,
    shutdown: CancellationToken,
}

/// The connection loops' half: the receiving end of the outbound queue and
/// the token that is cancelled when the registry drops the connection.
#[derive(Debug)]
pub struct ConnectionSession {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub outbound: mpsc::Receiver<String>,
    pub shutdown: CancellationToken,
}

impl Connection {
    /// Create both halves of a new connection.
    pub fn new(user_id: UserId, device_id: DeviceId, capacity: usize) -> (Self, ConnectionSession) {
        let (sender, outbound) = mpsc::channel(capacity.max(1));
        let id = ConnectionId::generate();
        let shutdown = CancellationToken::new();

        let connection = Self {
            id: id.clone(),
            user_id: user_id.clone(),
            device_id: device_id.clone(),
            sender,
            shutdown: shutdown.clone(),
        };
        let session = ConnectionSession {
            id,
            user_id,
            device_id,
            outbound,
            shutdown,
        };
        (connection, session)
    }
}

#[derive(Default)]
struct Index {
    connections: HashMap<ConnectionId, Connection>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

impl Index {
    fn remove(&mut self, id: &ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(id)?;
        if let Some(ids) = self.by_user.get_mut(&connection.user_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_user.remove(&connection.user_id);
            }
        }
        Some(connection)
    }
}

/// Live connections indexed by user.
pub struct ConnectionRegistry {
    index: RwLock<Index>,
    max_conn_per_user: usize,
    outbound_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(config: &RealtimeConfig) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            max_conn_per_user: config.max_conn_per_user,
            outbound_capacity: config.outbound_queue_capacity,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create and register a connection for `user`/`device`.
    ///
    /// # Errors
    /// - `CapacityRejected` if the user is at the connection cap
    pub fn connect(&self, user: UserId, device: DeviceId) -> Result<ConnectionSession> {
        let (connection, session) = Connection::new(user, device, self.outbound_capacity);
        self.register(connection)?;
        Ok(session)
    }

    /// Admit a connection.
    ///
    /// When the user is at the cap the connection is dropped, which closes
    /// its outbound queue, and `CapacityRejected` is returned.
    pub fn register(&self, connection: Connection) -> Result<()> {
        let mut index = self.write();
        let current = index
            .by_user
            .get(&connection.user_id)
            .map_or(0, HashSet::len);

        if current >= self.max_conn_per_user {
            warn!(
                user = %connection.user_id,
                device = %connection.device_id,
                limit = self.max_conn_per_user,
                "Connection refused, user at capacity"
            );
            connection.shutdown.cancel();
            return Err(Error::CapacityRejected {
                user: connection.user_id.clone(),
                limit: self.max_conn_per_user,
            });
        }

        info!(
            user = %connection.user_id,
            device = %connection.device_id,
            connection = %connection.id,
            "Connection registered"
        );
        index
            .by_user
            .entry(connection.user_id.clone())
            .or_default()
            .insert(connection.id.clone());
        index.connections.insert(connection.id.clone(), connection);
        Ok(())
    }

    /// Remove a connection and close its outbound queue.
    ///
    /// Returns `false` if it was already gone.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = self.write().remove(id);
        match removed {
            Some(connection) => {
                connection.shutdown.cancel();
                info!(
                    user = %connection.user_id,
                    device = %connection.device_id,
                    connection = %id,
                    "Connection unregistered"
                );
                true
            }
            None => false,
        }
    }

    fn evict(&self, stalled: Vec<ConnectionId>) {
        if stalled.is_empty() {
            return;
        }
        let mut index = self.write();
        for id in stalled {
            if let Some(connection) = index.remove(&id) {
                connection.shutdown.cancel();
                warn!(
                    user = %connection.user_id,
                    device = %connection.device_id,
                    connection = %id,
                    "Evicted connection with full or closed outbound queue"
                );
            }
        }
    }

    fn offer(connection: &Connection, text: &str) -> bool {
        match connection.sender.try_send(text.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Deliver `message` to every connection of `user`, skipping connections
    /// of `exclude_device`.
    ///
    /// Returns the number of connections the message was queued for.
    /// Connections whose queue could not take the message are evicted.
    pub fn broadcast_to_user(
        &self,
        user: &UserId,
        message: &Message,
        exclude_device: Option<&DeviceId>,
    ) -> Result<usize> {
        let text = message.to_json()?;
        let mut delivered = 0;
        let mut stalled = Vec::new();

        {
            let index = self.read();
            if let Some(ids) = index.by_user.get(user) {
                for id in ids {
                    let Some(connection) = index.connections.get(id) else {
                        continue;
                    };
                    if exclude_device == Some(&connection.device_id) {
                        continue;
                    }
                    if Self::offer(connection, &text) {
                        delivered += 1;
                    } else {
                        stalled.push(id.clone());
                    }
                }
            }
        }

        self.evict(stalled);
        debug!(user = %user, delivered, message_type = ?message.message_type, "Broadcast");
        Ok(delivered)
    }

    /// Deliver `message` to one connection.
    ///
    /// Returns `false` if the connection is unknown or was evicted because
    /// its queue could not take the message.
    pub fn send_to_client(&self, id: &ConnectionId, message: &Message) -> Result<bool> {
        let text = message.to_json()?;
        let accepted = {
            let index = self.read();
            match index.connections.get(id) {
                Some(connection) => Self::offer(connection, &text),
                None => return Ok(false),
            }
        };

        if !accepted {
            self.evict(vec![id.clone()]);
        }
        Ok(accepted)
    }

    /// Deliver `message` to every connection of one device.
    pub fn send_to_device(
        &self,
        user: &UserId,
        device: &DeviceId,
        message: &Message,
    ) -> Result<usize> {
        let text = message.to_json()?;
        let mut delivered = 0;
        let mut stalled = Vec::new();

        {
            let index = self.read();
            if let Some(ids) = index.by_user.get(user) {
                for id in ids {
                    let Some(connection) = index.connections.get(id) else {
                        continue;
                    };
                    if &connection.device_id != device {
                        continue;
                    }
                    if Self::offer(connection, &text) {
                        delivered += 1;
                    } else {
                        stalled.push(id.clone());
                    }
                }
            }
        }

        self.evict(stalled);
        Ok(delivered)
    }

    /// Live connections of `user`.
    pub fn connection_count(&self, user: &UserId) -> usize {
        self.read().by_user.get(user).map_or(0, HashSet::len)
    }

    /// Live connections across all users.
    pub fn total_connections(&self) -> usize {
        self.read().connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    fn registry(cap: usize, capacity: usize) -> ConnectionRegistry {
        ConnectionRegistry::new(&RealtimeConfig {
            max_conn_per_user: cap,
            outbound_queue_capacity: capacity,
            ..RealtimeConfig::default()
        })
    }

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    fn device(name: &str) -> DeviceId {
        DeviceId::new(name).unwrap()
    }

    #[test]
    fn test_cap_enforced_per_user() {
        let registry = registry(5, 8);
        let mut sessions = Vec::new();
        for i in 0..5 {
            sessions.push(registry.connect(user("alice"), device(&format!("d{i}"))).unwrap());
        }

        let (sixth, mut sixth_session) = Connection::new(user("alice"), device("d5"), 8);
        let err = registry.register(sixth).unwrap_err();
        assert!(matches!(err, Error::CapacityRejected { limit: 5, .. }));
        assert!(sixth_session.outbound.try_recv().is_err());
        assert!(sixth_session.shutdown.is_cancelled());
        assert_eq!(registry.connection_count(&user("alice")), 5);

        // Other users are unaffected.
        registry.connect(user("bob"), device("d0")).unwrap();
        assert_eq!(registry.total_connections(), 6);
    }

    #[test]
    fn test_refused_connection_queue_is_closed() {
        let registry = registry(1, 8);
        let _first = registry.connect(user("alice"), device("a")).unwrap();
        let (second, mut session) = Connection::new(user("alice"), device("b"), 8);
        assert!(registry.register(second).is_err());
        assert_eq!(
            session.outbound.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        );
    }

    #[test]
    fn test_broadcast_excludes_originating_device() {
        let registry = registry(5, 8);
        let mut phone = registry.connect(user("alice"), device("phone")).unwrap();
        let mut laptop = registry.connect(user("alice"), device("laptop")).unwrap();
        let mut bob = registry.connect(user("bob"), device("phone")).unwrap();

        let msg = Message::empty(MessageType::Ping);
        let delivered = registry
            .broadcast_to_user(&user("alice"), &msg, Some(&device("phone")))
            .unwrap();

        assert_eq!(delivered, 1);
        assert!(laptop.outbound.try_recv().is_ok());
        assert!(phone.outbound.try_recv().is_err());
        assert!(bob.outbound.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_without_exclusion_reaches_all_devices() {
        let registry = registry(5, 8);
        let mut a = registry.connect(user("alice"), device("phone")).unwrap();
        let mut b = registry.connect(user("alice"), device("phone")).unwrap();

        let msg = Message::empty(MessageType::Pong);
        assert_eq!(registry.broadcast_to_user(&user("alice"), &msg, None).unwrap(), 2);
        assert!(a.outbound.try_recv().is_ok());
        assert!(b.outbound.try_recv().is_ok());
    }

    #[test]
    fn test_full_queue_evicts_without_blocking() {
        let registry = registry(5, 1);
        let mut slow = registry.connect(user("alice"), device("slow")).unwrap();
        let mut fast = registry.connect(user("alice"), device("fast")).unwrap();

        let msg = Message::empty(MessageType::Ping);
        registry.broadcast_to_user(&user("alice"), &msg, None).unwrap();
        // Drain only the fast consumer.
        fast.outbound.try_recv().unwrap();

        let delivered = registry.broadcast_to_user(&user("alice"), &msg, None).unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(registry.connection_count(&user("alice")), 1);
        assert!(slow.shutdown.is_cancelled());

        // The evicted queue still yields what it had, then closes.
        assert!(slow.outbound.try_recv().is_ok());
        assert_eq!(
            slow.outbound.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        );
    }

    #[test]
    fn test_send_to_client_full_queue_evicts() {
        let registry = registry(5, 1);
        let session = registry.connect(user("alice"), device("d")).unwrap();
        let msg = Message::empty(MessageType::Pong);

        assert!(registry.send_to_client(&session.id, &msg).unwrap());
        assert!(!registry.send_to_client(&session.id, &msg).unwrap());
        assert_eq!(registry.total_connections(), 0);
        assert!(!registry.send_to_client(&session.id, &msg).unwrap());
    }

    #[test]
    fn test_send_to_device_targets_only_that_device() {
        let registry = registry(5, 8);
        let mut phone = registry.connect(user("alice"), device("phone")).unwrap();
        let mut laptop = registry.connect(user("alice"), device("laptop")).unwrap();

        let msg = Message::empty(MessageType::Ping);
        let delivered = registry
            .send_to_device(&user("alice"), &device("phone"), &msg)
            .unwrap();
        assert_eq!(delivered, 1);
        assert!(phone.outbound.try_recv().is_ok());
        assert!(laptop.outbound.try_recv().is_err());
    }

    #[test]
    fn test_unregister_closes_queue_and_is_idempotent() {
        let registry = registry(5, 8);
        let mut session = registry.connect(user("alice"), device("d")).unwrap();

        assert!(registry.unregister(&session.id));
        assert!(!registry.unregister(&session.id));
        assert!(session.shutdown.is_cancelled());
        assert_eq!(
            session.outbound.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        );
        assert_eq!(registry.connection_count(&user("alice")), 0);
    }
}
