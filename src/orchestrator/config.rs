//! Orchestrator Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the orchestrator loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Minimum spacing between two agent launches (ms)
    pub stagger_ms: u64,
    /// How often to re-check the friend relation before a transfer (ms)
    pub friend_poll_ms: u64,
    /// How often an unanswered friend request is sent again (ms)
    pub friend_resend_ms: u64,
    /// Delay before re-evaluating a pair after a session error (ms)
    pub retry_ms: u64,
    /// Capacity of the command channel feeding the loop
    pub command_buffer: usize,
    /// Arm a trade timer after each transfer request
    pub trade_timeout_enabled: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stagger_ms: 2_000,
            friend_poll_ms: 500,
            friend_resend_ms: 10_000,
            retry_ms: 1_000,
            command_buffer: 256,
            trade_timeout_enabled: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    /// Never zero; a zero interval would turn the wait into a spin loop
    pub fn friend_poll_interval(&self) -> Duration {
        Duration::from_millis(self.friend_poll_ms.max(10))
    }

    pub fn friend_resend_interval(&self) -> Duration {
        Duration::from_millis(self.friend_resend_ms.max(self.friend_poll_ms).max(10))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_ms.max(10))
    }
}
