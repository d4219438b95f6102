//! Best-effort fan-out of sync events to live connections.

use std::sync::Arc;
use tracing::{debug, warn};

use notevault_common::{Conflict, DeviceId, Note, Result, UserId};
use notevault_realtime::{ConnectionRegistry, Message};

/// Sends change and conflict notices through the connection registry.
///
/// Without a registry every notice is a no-op. Failures are logged and
/// never reach the caller.
#[derive(Clone, Default)]
pub(crate) struct Notifier {
    registry: Option<Arc<ConnectionRegistry>>,
}

impl Notifier {
    pub(crate) fn new(registry: Option<Arc<ConnectionRegistry>>) -> Self {
        Self { registry }
    }

    /// Tell the owner's other devices about the current state of `note`.
    pub(crate) fn note_changed(&self, owner: &UserId, device: &DeviceId, note: &Note) {
        let Some(registry) = &self.registry else {
            return;
        };

        let delivered: Result<usize> = if note.is_deleted {
            Message::note_delete(note, device)
        } else {
            Message::note_update(note, device)
        }
        .and_then(|message| registry.broadcast_to_user(owner, &message, Some(device)));

        match delivered {
            Ok(count) => debug!(note = %note.id, version = note.version, count, "Change broadcast"),
            Err(e) => warn!(note = %note.id, error = %e, "Change broadcast failed"),
        }
    }

    /// Tell the device whose update was rejected about the conflict.
    pub(crate) fn conflict_detected(&self, conflict: &Conflict) {
        let Some(registry) = &self.registry else {
            return;
        };

        let delivered = Message::conflict(conflict).and_then(|message| {
            registry.send_to_device(&conflict.owner_id, &conflict.device_id, &message)
        });

        match delivered {
            Ok(count) => debug!(conflict = %conflict.id, count, "Conflict notice sent"),
            Err(e) => warn!(conflict = %conflict.id, error = %e, "Conflict notice failed"),
        }
    }
}
