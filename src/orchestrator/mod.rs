//! Orchestrator - the single owner of fleet state
//!
//! Agents, handoff background tasks and the operator shell all reach it
//! through an `OrchestratorHandle`; mutations are applied one command at a
//! time by `Orchestrator::run`.

pub mod command;
pub mod config;
pub mod handoff;
#[allow(clippy::module_inception)]
pub mod orchestrator;
pub mod state;

pub use command::{AgentTarget, OrchestratorCommand};
pub use config::OrchestratorConfig;
pub use orchestrator::{Orchestrator, OrchestratorHandle};
pub use state::{AgentStatusSnapshot, ApprovedSet, FleetSnapshot, HandoffPhase, PairingState};
