//! AgentContext - the agent's interface to the orchestrator
//!
//! Handed to the runtime with every launch. Each report is tagged with the
//! agent's index and launch generation so the orchestrator can drop reports
//! from a previous run.

use std::sync::Arc;

use crate::config::{AgentConfig, Role};
use crate::error::Result;
use crate::orchestrator::OrchestratorHandle;
use crate::session::AccountId;

#[derive(Clone)]
pub struct AgentContext {
    config: Arc<AgentConfig>,
    generation: u64,
    fleet: OrchestratorHandle,
}

impl AgentContext {
    pub fn new(config: Arc<AgentConfig>, generation: u64, fleet: OrchestratorHandle) -> Self {
        Self {
            config,
            generation,
            fleet,
        }
    }

    pub fn index(&self) -> usize {
        self.config.index
    }

    pub fn name(&self) -> &str {
        &self.config.username
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn is_admin(&self, account: AccountId) -> bool {
        self.config.is_admin(account)
    }

    /// Whether the orchestrator has granted `account` standing trust
    pub async fn is_approved(&self, account: AccountId) -> bool {
        self.fleet.is_approved(account).await
    }

    /// Admins and approved identities may befriend and trade with this agent
    pub async fn trusts(&self, account: AccountId) -> bool {
        self.is_admin(account) || self.is_approved(account).await
    }

    /// Announce that login finished and the agent can take part in a handoff
    pub async fn report_ready(&self) -> Result<()> {
        self.fleet.report_ready(self.index(), self.generation).await
    }

    /// Announce that a trade with the paired agent completed
    pub async fn report_trade_success(&self) -> Result<()> {
        self.fleet
            .report_trade_success(self.index(), self.generation)
            .await
    }

    /// Announce that the worker stopped without being asked to
    pub async fn report_exited(&self) -> Result<()> {
        self.fleet.report_exited(self.index(), self.generation).await
    }
}
