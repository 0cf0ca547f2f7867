//! Coordination - process-wide shutdown sequencing
//!
//! OS signals and the operator's `exit` command both end up as a single
//! `ShutdownSignal` broadcast; the orchestrator loop stops every agent when
//! it sees one.

pub mod shutdown;

pub use shutdown::{
    install_signal_handlers, GracefulShutdown, ShutdownConfig, ShutdownError, ShutdownPhase,
    ShutdownSignal,
};
