//! Itemfleet - runs a fleet of trade bots that move items from "giver"
//! accounts into "collector" accounts, one collector/giver pair at a time.

pub mod agent;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod session;

pub use agent::{AgentContext, AgentHandle, AgentState, RoleHandler, RolePool};
pub use config::{AgentConfig, FleetConfig, Role};
pub use coordination::{GracefulShutdown, ShutdownSignal};
pub use dispatch::{Dispatcher, OperatorCommand};
pub use error::{FleetError, Result};
pub use orchestrator::{
    AgentTarget, FleetSnapshot, HandoffPhase, Orchestrator, OrchestratorConfig,
    OrchestratorHandle,
};
pub use session::{AccountId, AgentSession, InventorySnapshot, SessionRuntime};
