//! Per-device sync cursor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::types::{ConflictId, DeviceId, NoteId, UserId};

/// What a device last reported about its own state.
///
/// The cursor records self-reported versions, not what the server has
/// delivered. Devices re-declare the versions they hold on every sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub last_sync_time: DateTime<Utc>,
    #[serde(default)]
    pub note_versions: HashMap<NoteId, i64>,
    #[serde(default)]
    pub pending_conflicts: BTreeSet<ConflictId>,
    pub updated_at: DateTime<Utc>,
}

impl SyncCursor {
    /// Empty cursor for a device that has never synced.
    pub fn new(user_id: UserId, device_id: DeviceId) -> Self {
        Self {
            user_id,
            device_id,
            last_sync_time: DateTime::<Utc>::UNIX_EPOCH,
            note_versions: HashMap::new(),
            pending_conflicts: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    /// Merge declared versions into the cursor.
    ///
    /// Additive: notes the device did not mention keep their entry, and a
    /// declared version never lowers an entry already recorded.
    pub fn merge_versions<'a>(&mut self, declared: impl IntoIterator<Item = (&'a NoteId, &'a i64)>) {
        for (note_id, version) in declared {
            let entry = self.note_versions.entry(note_id.clone()).or_insert(*version);
            if *version > *entry {
                *entry = *version;
            }
        }
    }

    pub fn add_pending_conflict(&mut self, id: ConflictId) -> bool {
        self.pending_conflicts.insert(id)
    }

    pub fn remove_pending_conflict(&mut self, id: &ConflictId) -> bool {
        self.pending_conflicts.remove(id)
    }
}
