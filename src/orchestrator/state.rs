//! Orchestrator State - pairing slots, approved identities and the
//! read-only fleet snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::task::AbortHandle;

use crate::agent::AgentState;
use crate::config::Role;
use crate::session::AccountId;

/// Where the handoff state machine currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffPhase {
    /// Nothing started
    Idle,
    /// Agents launched, waiting for both roles to report ready
    AwaitingPair,
    /// Pair complete, waiting for the friend relation
    Befriending,
    /// Transfer requested, waiting for the trade to finish
    Transferring,
    /// A pool ran dry and the fleet was stopped
    Drained,
}

impl std::fmt::Display for HandoffPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandoffPhase::Idle => write!(f, "idle"),
            HandoffPhase::AwaitingPair => write!(f, "awaiting_pair"),
            HandoffPhase::Befriending => write!(f, "befriending"),
            HandoffPhase::Transferring => write!(f, "transferring"),
            HandoffPhase::Drained => write!(f, "drained"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairStage {
    Evaluating,
    Befriending { amount: usize },
    Transferring { amount: usize },
}

/// At most one active collector and one active giver.
///
/// Every change to either slot bumps the epoch and aborts the background
/// task of the previous pairing.
#[derive(Debug)]
pub struct PairingState {
    collector: Option<usize>,
    giver: Option<usize>,
    epoch: u64,
    stage: PairStage,
    task: Option<AbortHandle>,
}

impl Default for PairingState {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingState {
    pub fn new() -> Self {
        Self {
            collector: None,
            giver: None,
            epoch: 0,
            stage: PairStage::Evaluating,
            task: None,
        }
    }

    pub fn active(&self, role: Role) -> Option<usize> {
        match role {
            Role::Collector => self.collector,
            Role::Giver => self.giver,
        }
    }

    pub fn collector(&self) -> Option<usize> {
        self.collector
    }

    pub fn giver(&self) -> Option<usize> {
        self.giver
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Both slots filled
    pub fn pair(&self) -> Option<(usize, usize)> {
        Some((self.collector?, self.giver?))
    }

    pub fn is_empty(&self) -> bool {
        self.collector.is_none() && self.giver.is_none()
    }

    pub fn holds(&self, index: usize) -> Option<Role> {
        if self.collector == Some(index) {
            Some(Role::Collector)
        } else if self.giver == Some(index) {
            Some(Role::Giver)
        } else {
            None
        }
    }

    /// Put `index` into the slot for `role`. Returns true if the slot changed.
    pub fn set(&mut self, role: Role, index: usize) -> bool {
        let slot = match role {
            Role::Collector => &mut self.collector,
            Role::Giver => &mut self.giver,
        };
        if *slot == Some(index) {
            return false;
        }
        *slot = Some(index);
        self.reset();
        true
    }

    /// Empty the slot for `role`, returning what it held
    pub fn clear(&mut self, role: Role) -> Option<usize> {
        let slot = match role {
            Role::Collector => &mut self.collector,
            Role::Giver => &mut self.giver,
        };
        let previous = slot.take();
        if previous.is_some() {
            self.reset();
        }
        previous
    }

    pub fn clear_all(&mut self) {
        let had_any = !self.is_empty();
        self.collector = None;
        self.giver = None;
        if had_any {
            self.reset();
        } else {
            self.abort_task();
        }
    }

    /// A friendship wait or a transfer is already running for this pairing
    pub fn in_flight(&self) -> bool {
        !matches!(self.stage, PairStage::Evaluating)
    }

    pub fn is_befriending(&self) -> bool {
        matches!(self.stage, PairStage::Befriending { .. })
    }

    pub fn is_transferring(&self) -> bool {
        matches!(self.stage, PairStage::Transferring { .. })
    }

    /// Amount computed for the current handoff, once one is in flight
    pub fn requested_amount(&self) -> Option<usize> {
        match self.stage {
            PairStage::Befriending { amount } | PairStage::Transferring { amount } => Some(amount),
            PairStage::Evaluating => None,
        }
    }

    pub fn begin_befriending(&mut self, amount: usize, task: AbortHandle) {
        self.abort_task();
        self.stage = PairStage::Befriending { amount };
        self.task = Some(task);
    }

    pub fn begin_transfer(&mut self, amount: usize, timer: Option<AbortHandle>) {
        self.abort_task();
        self.stage = PairStage::Transferring { amount };
        self.task = timer;
    }

    /// Stay in evaluation with a pending re-evaluation task. The task is
    /// aborted like any other when the pairing changes.
    pub fn arm_retry(&mut self, task: AbortHandle) {
        self.settle();
        self.task = Some(task);
    }

    /// Back to evaluating without changing the slots
    pub fn settle(&mut self) {
        self.abort_task();
        self.stage = PairStage::Evaluating;
    }

    fn reset(&mut self) {
        self.epoch += 1;
        self.settle();
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// External identities granted standing trust. Only ever grows.
#[derive(Debug, Clone, Default)]
pub struct ApprovedSet {
    ids: HashSet<AccountId>,
}

impl ApprovedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the identity was not yet approved
    pub fn approve(&mut self, account: AccountId) -> bool {
        self.ids.insert(account)
    }

    pub fn contains(&self, account: AccountId) -> bool {
        self.ids.contains(&account)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Per-agent view for the operator and tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusSnapshot {
    pub index: usize,
    pub username: String,
    pub role: String,
    pub state: AgentState,
    pub account: Option<AccountId>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Fleet-wide view, produced by the orchestrator on request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub phase: HandoffPhase,
    pub agents: Vec<AgentStatusSnapshot>,
    pub collector_pool: Vec<usize>,
    pub giver_pool: Vec<usize>,
    pub active_collector: Option<usize>,
    pub active_giver: Option<usize>,
    pub approved_count: usize,
    pub pairing_epoch: u64,
    pub taken_at: DateTime<Utc>,
}

impl FleetSnapshot {
    /// Number of agents currently in Running state
    pub fn running_count(&self) -> usize {
        self.agents
            .iter()
            .filter(|a| a.state == AgentState::Running)
            .count()
    }

    pub fn state_of(&self, index: usize) -> Option<AgentState> {
        self.agents.get(index).map(|a| a.state)
    }

    pub fn index_of(&self, username: &str) -> Option<usize> {
        self.agents
            .iter()
            .find(|a| a.username.eq_ignore_ascii_case(username))
            .map(|a| a.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairing_slots_hold_one_each() {
        let mut pairing = PairingState::new();
        assert!(pairing.set(Role::Collector, 0));
        assert!(pairing.set(Role::Giver, 2));
        assert_eq!(pairing.pair(), Some((0, 2)));

        // replacing the giver keeps a single active giver
        assert!(pairing.set(Role::Giver, 3));
        assert_eq!(pairing.giver(), Some(3));
        assert_eq!(pairing.holds(2), None);
        assert_eq!(pairing.holds(3), Some(Role::Giver));
    }

    #[test]
    fn test_epoch_bumps_only_on_change() {
        let mut pairing = PairingState::new();
        pairing.set(Role::Collector, 0);
        let epoch = pairing.epoch();
        assert!(!pairing.set(Role::Collector, 0));
        assert_eq!(pairing.epoch(), epoch);

        assert_eq!(pairing.clear(Role::Collector), Some(0));
        assert_eq!(pairing.epoch(), epoch + 1);
        assert_eq!(pairing.clear(Role::Collector), None);
        assert_eq!(pairing.epoch(), epoch + 1);
    }

    #[test]
    fn test_stage_resets_when_slot_changes() {
        let mut pairing = PairingState::new();
        pairing.set(Role::Collector, 0);
        pairing.set(Role::Giver, 1);
        pairing.begin_transfer(3, None);
        assert!(pairing.in_flight());
        assert_eq!(pairing.requested_amount(), Some(3));

        pairing.clear(Role::Giver);
        assert!(!pairing.in_flight());
        assert_eq!(pairing.requested_amount(), None);
    }

    #[test]
    fn test_approved_set_is_idempotent() {
        let mut approved = ApprovedSet::new();
        assert!(approved.approve(AccountId(1)));
        assert!(!approved.approve(AccountId(1)));
        assert_eq!(approved.len(), 1);
        assert!(approved.contains(AccountId(1)));
        assert!(!approved.contains(AccountId(2)));
    }

    #[tokio::test]
    async fn test_slot_change_aborts_background_task() {
        let mut pairing = PairingState::new();
        pairing.set(Role::Collector, 0);
        pairing.set(Role::Giver, 1);

        let task = tokio::spawn(std::future::pending::<()>());
        pairing.begin_befriending(2, task.abort_handle());
        assert!(pairing.is_befriending());

        pairing.clear_all();
        let err = task.await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_pending_retry_does_not_block_evaluation() {
        let mut pairing = PairingState::new();
        pairing.set(Role::Collector, 0);
        pairing.set(Role::Giver, 1);

        let task = tokio::spawn(std::future::pending::<()>());
        pairing.arm_retry(task.abort_handle());
        assert!(!pairing.in_flight());

        pairing.set(Role::Giver, 2);
        let err = task.await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
