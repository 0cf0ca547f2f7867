//! Orchestrator Commands - everything that mutates fleet state is a message
//! on the orchestrator's single command channel.

use std::sync::Arc;
use tokio::sync::oneshot;

use super::state::FleetSnapshot;
use crate::error::Result;
use crate::session::AgentSession;

/// How an operator command addresses agents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentTarget {
    /// Zero-based position in the settings file
    Index(usize),
    /// Case-insensitive username; may match several agents or none
    Name(String),
}

impl AgentTarget {
    /// Numeric targets are indexes, anything else is a name
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<usize>() {
            Ok(index) => AgentTarget::Index(index),
            Err(_) => AgentTarget::Name(raw.to_string()),
        }
    }
}

impl std::fmt::Display for AgentTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentTarget::Index(index) => write!(f, "index {index}"),
            AgentTarget::Name(name) => write!(f, "name {name:?}"),
        }
    }
}

/// Commands processed by the orchestrator loop
pub enum OrchestratorCommand {
    // --- Agent lifecycle callbacks ---
    /// A launch task finished (successfully or not)
    Launched {
        index: usize,
        generation: u64,
        result: Result<Arc<dyn AgentSession>>,
    },
    /// Login finished; the agent is ready for a handoff
    ReportReady { index: usize, generation: u64 },
    /// A trade between the active pair completed
    ReportTradeSuccess { index: usize, generation: u64 },
    /// The worker terminated on its own
    AgentExited { index: usize, generation: u64 },

    // --- Handoff background tasks ---
    /// The active pair became friends; the transfer may be requested
    FriendshipEstablished { epoch: u64 },
    /// No trade success arrived in time after a transfer request
    TradeTimedOut { epoch: u64 },

    // --- Operator / control ---
    InitiateCollection,
    Start(AgentTarget),
    Stop(AgentTarget),
    Authenticate { index: usize, code: String },
    Forward { index: usize, command: String },
    StopAll,
    Snapshot(oneshot::Sender<FleetSnapshot>),
}

impl OrchestratorCommand {
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorCommand::Launched { .. } => "launched",
            OrchestratorCommand::ReportReady { .. } => "report_ready",
            OrchestratorCommand::ReportTradeSuccess { .. } => "report_trade_success",
            OrchestratorCommand::AgentExited { .. } => "agent_exited",
            OrchestratorCommand::FriendshipEstablished { .. } => "friendship_established",
            OrchestratorCommand::TradeTimedOut { .. } => "trade_timed_out",
            OrchestratorCommand::InitiateCollection => "initiate_collection",
            OrchestratorCommand::Start(_) => "start",
            OrchestratorCommand::Stop(_) => "stop",
            OrchestratorCommand::Authenticate { .. } => "authenticate",
            OrchestratorCommand::Forward { .. } => "forward",
            OrchestratorCommand::StopAll => "stop_all",
            OrchestratorCommand::Snapshot(_) => "snapshot",
        }
    }
}

impl std::fmt::Debug for OrchestratorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parse() {
        assert_eq!(AgentTarget::parse("3"), AgentTarget::Index(3));
        assert_eq!(AgentTarget::parse(" 0 "), AgentTarget::Index(0));
        assert_eq!(
            AgentTarget::parse("GiverBot"),
            AgentTarget::Name("GiverBot".into())
        );
        assert_eq!(AgentTarget::parse("-1"), AgentTarget::Name("-1".into()));
    }
}
