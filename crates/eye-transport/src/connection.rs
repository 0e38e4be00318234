//! Connection state management.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{MAX_RECONNECT_FACTOR, MIN_RECONNECT_FACTOR, RECONNECT_DELAY_UNIT_SECS};

/// Connection state for the hub client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,

    /// Connecting to the hub.
    Connecting,

    /// Connected.
    Connected,

    /// Waiting to reconnect.
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transient state (connecting or reconnecting).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting { .. })
    }

    /// Human readable status.
    pub fn message(&self) -> String {
        match self {
            Self::Disconnected => "Disconnected".to_string(),
            Self::Connecting => "Connecting...".to_string(),
            Self::Connected => "Connected".to_string(),
            Self::Reconnecting { attempt } => format!("Reconnecting (attempt {})", attempt),
        }
    }
}

/// Reconnection policy.
///
/// Retries forever. Each delay is a random factor in
/// `[min_factor, max_factor)` times `delay_unit`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub min_factor: u32,
    pub max_factor: u32,
    pub delay_unit: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            min_factor: MIN_RECONNECT_FACTOR,
            max_factor: MAX_RECONNECT_FACTOR,
            delay_unit: Duration::from_secs(RECONNECT_DELAY_UNIT_SECS),
        }
    }
}

impl ReconnectPolicy {
    /// Draw the delay before the next attempt.
    pub fn next_delay(&self) -> Duration {
        let factor = if self.max_factor > self.min_factor {
            rand::thread_rng().gen_range(self.min_factor..self.max_factor)
        } else {
            self.min_factor
        };
        self.delay_for_factor(factor)
    }

    /// Delay for a given factor.
    pub fn delay_for_factor(&self, factor: u32) -> Duration {
        self.delay_unit.saturating_mul(factor)
    }

    /// Shortest and longest delay the policy can produce.
    pub fn delay_bounds(&self) -> (Duration, Duration) {
        let longest = self.max_factor.saturating_sub(1).max(self.min_factor);
        (
            self.delay_for_factor(self.min_factor),
            self.delay_for_factor(longest),
        )
    }
}
