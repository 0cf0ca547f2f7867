//! Agents - per-bot handles, role pools and role handlers

pub mod context;
pub mod handle;
pub mod handler;
pub mod pool;

pub use context::AgentContext;
pub use handle::{AgentHandle, AgentState, Launcher};
pub use handler::{handler_for, CollectorHandler, GiverHandler, RoleHandler};
pub use pool::RolePool;
