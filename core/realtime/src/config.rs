//! Real-time channel configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use notevault_common::{Error, Result};

/// Limits and timings for live connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Maximum simultaneous connections per user.
    pub max_conn_per_user: usize,
    /// Bounded outbound queue length per connection.
    pub outbound_queue_capacity: usize,
    /// Capacity of the shared inbound queue.
    pub inbound_queue_capacity: usize,
    /// Deadline for a single write.
    pub write_wait_secs: u64,
    /// Idle deadline; reset by every inbound frame.
    pub pong_wait_secs: u64,
    /// Interval between server pings. Must be shorter than `pong_wait_secs`.
    pub ping_period_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            max_conn_per_user: 5,
            outbound_queue_capacity: 256,
            inbound_queue_capacity: 1024,
            write_wait_secs: 10,
            pong_wait_secs: 60,
            ping_period_secs: 54,
        }
    }
}

impl RealtimeConfig {
    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_secs(self.ping_period_secs)
    }

    /// Reject settings that would make connections unusable.
    pub fn validate(&self) -> Result<()> {
        if self.max_conn_per_user == 0 {
            return Err(Error::InvalidInput(
                "max_conn_per_user must be at least 1".to_string(),
            ));
        }
        if self.outbound_queue_capacity == 0 || self.inbound_queue_capacity == 0 {
            return Err(Error::InvalidInput(
                "queue capacities must be at least 1".to_string(),
            ));
        }
        if self.ping_period_secs == 0 || self.ping_period_secs >= self.pong_wait_secs {
            return Err(Error::InvalidInput(
                "ping_period_secs must be non-zero and shorter than pong_wait_secs".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RealtimeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ping_period(), Duration::from_secs(54));
    }

    #[test]
    fn test_ping_must_beat_pong_wait() {
        let config = RealtimeConfig {
            ping_period_secs: 60,
            pong_wait_secs: 60,
            ..RealtimeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_cap_rejected() {
        let config = RealtimeConfig {
            max_conn_per_user: 0,
            ..RealtimeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
