//! Graceful Shutdown Handler
//!
//! One shutdown request per process. The first request is broadcast to
//! subscribers; later ones are logged and dropped. `execute` then waits for
//! the fleet to finish stopping, bounded by a timeout that depends on how
//! urgent the request was.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Operator `exit`, SIGTERM or Ctrl+C
    Graceful,
    /// SIGQUIT; agents get the short timeout
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// How long agents get to log off after a graceful request (default: 30s)
    pub stop_timeout_secs: u64,
    /// Same, after an urgent request (default: 5s)
    pub urgent_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 30,
            urgent_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    StoppingAgents,
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StoppingAgents => write!(f, "stopping_agents"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    config: ShutdownConfig,
    shutdown_requested: AtomicBool,
    signal: Mutex<Option<ShutdownSignal>>,
    phase: watch::Sender<ShutdownPhase>,
    phase_rx: watch::Receiver<ShutdownPhase>,
    signal_tx: broadcast::Sender<ShutdownSignal>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (phase, phase_rx) = watch::channel(ShutdownPhase::Running);
        let (signal_tx, _) = broadcast::channel(8);

        Self {
            config,
            shutdown_requested: AtomicBool::new(false),
            signal: Mutex::new(None),
            phase,
            phase_rx,
            signal_tx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// Subscribe to shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.signal_tx.subscribe()
    }

    pub fn phase_receiver(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase_rx.clone()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_rx.borrow()
    }

    /// Request shutdown. Only the first request counts.
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        if let Ok(mut slot) = self.signal.try_lock() {
            *slot = Some(signal);
        }
        let _ = self.signal_tx.send(signal);
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.send_replace(phase);
        info!("Shutdown phase: {}", phase);
    }

    /// Wait for `stop_agents` to finish, bounded by the timeout for the
    /// signal that was requested.
    pub async fn execute<F>(&self, stop_agents: F) -> Result<(), ShutdownError>
    where
        F: Future<Output = ()>,
    {
        let signal = (*self.signal.lock().await).unwrap_or(ShutdownSignal::Graceful);
        let timeout_secs = match signal {
            ShutdownSignal::Graceful => self.config.stop_timeout_secs,
            ShutdownSignal::Urgent => self.config.urgent_timeout_secs,
        };
        let start = std::time::Instant::now();

        self.set_phase(ShutdownPhase::StoppingAgents);
        let outcome = tokio::time::timeout(Duration::from_secs(timeout_secs), stop_agents).await;
        self.set_phase(ShutdownPhase::Complete);

        match outcome {
            Ok(()) => {
                info!("Shutdown completed in {:?}", start.elapsed());
                Ok(())
            }
            Err(_) => {
                error!("Agents did not stop within {}s", timeout_secs);
                Err(ShutdownError::Timeout)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    Timeout,
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownError::Timeout => write!(f, "shutdown timed out"),
        }
    }
}

impl std::error::Error for ShutdownError {}

/// Turn OS signals into shutdown requests
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    let on_ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                on_ctrl_c.request_shutdown(ShutdownSignal::Graceful);
            }
            Err(e) => warn!(error = %e, "failed to install Ctrl+C handler"),
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, label, level) in [
            (SignalKind::terminate(), "SIGTERM", ShutdownSignal::Graceful),
            (SignalKind::quit(), "SIGQUIT", ShutdownSignal::Urgent),
        ] {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut stream = match signal(kind) {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(error = %e, "failed to install {} handler", label);
                        return;
                    }
                };
                stream.recv().await;
                info!("Received {}", label);
                shutdown.request_shutdown(level);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal_display() {
        assert_eq!(ShutdownSignal::Graceful.to_string(), "graceful");
        assert_eq!(ShutdownSignal::Urgent.to_string(), "urgent");
        assert_eq!(ShutdownPhase::StoppingAgents.to_string(), "stopping_agents");
    }

    #[tokio::test]
    async fn test_duplicate_request_broadcasts_once() {
        let shutdown = GracefulShutdown::with_defaults();
        let mut rx = shutdown.subscribe();
        assert!(!shutdown.is_shutdown_requested());

        shutdown.request_shutdown(ShutdownSignal::Graceful);
        shutdown.request_shutdown(ShutdownSignal::Urgent);

        assert!(shutdown.is_shutdown_requested());
        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Graceful);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_execute_reaches_complete() {
        let shutdown = GracefulShutdown::with_defaults();
        shutdown.request_shutdown(ShutdownSignal::Graceful);
        tokio_test::assert_ok!(shutdown.execute(async {}).await);
        assert_eq!(shutdown.current_phase(), ShutdownPhase::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_times_out() {
        let shutdown = GracefulShutdown::new(ShutdownConfig {
            stop_timeout_secs: 1,
            urgent_timeout_secs: 1,
        });
        let result = shutdown.execute(std::future::pending::<()>()).await;
        assert_eq!(result, Err(ShutdownError::Timeout));
    }
}
