//! Sync core configuration.

use serde::{Deserialize, Serialize};

/// Tunables for the sync core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How many recent version-log entries last-writer-wins searches for
    /// the client's base version.
    pub lww_lookback: usize,
    /// When set, keep only this many snapshots per note after each mutation.
    pub version_retention: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lww_lookback: 10,
            version_retention: None,
        }
    }
}
