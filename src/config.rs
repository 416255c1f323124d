//! Engine timing configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The timeout window is empty or inverted.
    #[error("leader timeout window is empty: min {min} >= max {max}")]
    EmptyTimeoutWindow {
        /// Configured minimum, milliseconds.
        min: u64,
        /// Configured maximum, milliseconds.
        max: u64,
    },
    /// The minimum is too small to derive a heartbeat period from.
    #[error("leader timeout min {min} must be at least 4ms")]
    TimeoutTooSmall {
        /// Configured minimum, milliseconds.
        min: u64,
    },
}

/// Timeout window for role timers.
///
/// Role timeouts are drawn uniformly from `[min, max)`; the spread is what
/// keeps two followers from probing in lockstep and duelling forever. The
/// leader heartbeat period is `min / 4`, so a live leader gets several
/// heartbeats into every follower's window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaxosConfig {
    /// Lower bound of the role timeout, milliseconds. Inclusive.
    pub leader_timeout_min: u64,
    /// Upper bound of the role timeout, milliseconds. Exclusive.
    pub leader_timeout_max: u64,
}

impl PaxosConfig {
    /// Build a validated configuration.
    pub fn new(leader_timeout_min: u64, leader_timeout_max: u64) -> Result<Self, ConfigError> {
        if leader_timeout_min < 4 {
            return Err(ConfigError::TimeoutTooSmall {
                min: leader_timeout_min,
            });
        }
        if leader_timeout_min >= leader_timeout_max {
            return Err(ConfigError::EmptyTimeoutWindow {
                min: leader_timeout_min,
                max: leader_timeout_max,
            });
        }
        Ok(PaxosConfig {
            leader_timeout_min,
            leader_timeout_max,
        })
    }

    /// Heartbeat period derived from the timeout floor.
    pub fn heartbeat_interval(&self) -> u64 {
        self.leader_timeout_min / 4
    }
}

impl Default for PaxosConfig {
    fn default() -> Self {
        PaxosConfig {
            leader_timeout_min: 1000,
            leader_timeout_max: 3000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_interval_is_quarter_min() {
        let cfg = PaxosConfig::new(1000, 3000).unwrap();
        assert_eq!(cfg.heartbeat_interval(), 250);
    }

    #[test]
    fn test_rejects_inverted_window() {
        assert!(PaxosConfig::new(3000, 1000).is_err());
        assert!(PaxosConfig::new(1000, 1000).is_err());
    }

    #[test]
    fn test_rejects_tiny_min() {
        assert!(PaxosConfig::new(2, 100).is_err());
    }
}
