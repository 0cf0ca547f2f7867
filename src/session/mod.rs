//! Session Runtime contract
//!
//! The orchestrator never talks to the external trading service directly.
//! Everything it needs from a logged-in account goes through these traits:
//! login completion (delivered as a `RoleHandler` callback), friend graph
//! queries, item transfer initiation and inventory snapshots.
//!
//! A runtime owns the wire protocol and the worker task of every session it
//! launches. `dry_run` provides an in-memory implementation.

pub mod dry_run;

pub use dry_run::{DryRunRuntime, DryRunSession, DryRunWorld, TransferRecord};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::agent::{AgentContext, RoleHandler};
use crate::config::AgentConfig;
use crate::error::Result;

/// External identity of an account on the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AccountId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Point-in-time view of one account's inventory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    /// Total number of slots
    pub capacity: usize,
    /// Items currently held (tradable or not)
    pub item_count: usize,
    /// Items that may be traded away right now
    pub tradable_count: usize,
}

impl InventorySnapshot {
    pub fn new(capacity: usize, item_count: usize, tradable_count: usize) -> Self {
        Self {
            capacity,
            item_count,
            tradable_count,
        }
    }

    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.item_count)
    }

    pub fn is_full(&self) -> bool {
        self.item_count >= self.capacity
    }

    pub fn has_tradable(&self) -> bool {
        self.tradable_count > 0
    }
}

/// An incoming trade offer as seen by the receiving agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeOffer {
    pub offer_id: String,
    pub sender: AccountId,
    /// Number of items the sender is giving
    pub items_to_receive: usize,
    /// Number of items the sender is asking for
    pub items_to_give: usize,
}

/// What a role handler wants done with an incoming offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    Accept,
    Decline,
}

/// Housekeeping a runtime performs on request after login
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceTask {
    /// Craft duplicate weapons into metal
    CraftWeapons,
    /// Delete crates except the excluded series
    DeleteCrates { exclusions: Vec<u32> },
    /// Combine small metal into larger denominations
    CombineMetal,
}

/// Everything a runtime needs to bring one agent online
#[derive(Clone)]
pub struct LaunchRequest {
    pub config: Arc<AgentConfig>,
    /// Out-of-band authentication code injected by the operator, if any
    pub auth_code: Option<String>,
    pub context: AgentContext,
    pub handler: Arc<dyn RoleHandler>,
}

/// Spins up workers for agents
#[async_trait]
pub trait SessionRuntime: Send + Sync + 'static {
    /// Start a worker for the agent and return its live session.
    ///
    /// The worker is expected to call `handler.on_login_completed()` once the
    /// account is usable, and `context.report_exited()` if it stops on its own.
    async fn launch(&self, request: LaunchRequest) -> Result<Arc<dyn AgentSession>>;
}

/// A running, logged-in agent
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Account this session is logged into
    fn account_id(&self) -> AccountId;

    fn is_running(&self) -> bool;

    /// Whether `other` is on this account's friends list
    async fn is_friend(&self, other: AccountId) -> Result<bool>;

    /// Send a friend request to `other`
    async fn add_friend(&self, other: AccountId) -> Result<()>;

    /// Fetch a fresh inventory snapshot
    async fn inventory(&self) -> Result<InventorySnapshot>;

    /// Offer up to `count` tradable items to `recipient`
    async fn transfer_items(&self, count: usize, recipient: AccountId) -> Result<()>;

    async fn send_message(&self, to: AccountId, message: &str) -> Result<()>;

    async fn run_maintenance(&self, task: MaintenanceTask) -> Result<()>;

    async fn set_auth_code(&self, code: &str);

    /// Execute a free-form operator command inside the agent
    async fn handle_command(&self, command: &str) -> Result<()>;

    /// Ask the agent to report readiness to the orchestrator again
    async fn request_report(&self);

    /// Terminate the worker. Must be idempotent.
    async fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_slots_saturates() {
        let inv = InventorySnapshot::new(10, 12, 0);
        assert_eq!(inv.free_slots(), 0);
        assert!(inv.is_full());
    }

    #[test]
    fn test_free_slots() {
        let inv = InventorySnapshot::new(50, 45, 3);
        assert_eq!(inv.free_slots(), 5);
        assert!(!inv.is_full());
        assert!(inv.has_tradable());
    }

    #[test]
    fn test_account_id_display() {
        assert_eq!(AccountId(76561198000000001).to_string(), "76561198000000001");
    }
}
