//! Agent Handle - one per configured bot, reused across start/stop cycles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::context::AgentContext;
use super::handler::handler_for;
use crate::config::{AgentConfig, MaintenanceSettings, Role};
use crate::orchestrator::OrchestratorHandle;
use crate::session::{AccountId, AgentSession, LaunchRequest, SessionRuntime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Stopped,
    Running,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Stopped => write!(f, "stopped"),
            AgentState::Running => write!(f, "running"),
        }
    }
}

/// Lifecycle owner of one agent's worker.
///
/// `Running` means a launch was requested; the live session is attached
/// once the runtime hands it back. Every start and stop bumps the
/// generation so late launch results and reports from a previous run are
/// recognised and dropped.
pub struct AgentHandle {
    config: Arc<AgentConfig>,
    state: AgentState,
    generation: u64,
    session: Option<Arc<dyn AgentSession>>,
    cancel_launch: Option<oneshot::Sender<()>>,
    auth_code: Option<String>,
    ready_pending: bool,
    started_at: Option<DateTime<Utc>>,
}

impl AgentHandle {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: AgentState::Stopped,
            generation: 0,
            session: None,
            cancel_launch: None,
            auth_code: None,
            ready_pending: false,
            started_at: None,
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

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == AgentState::Running
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Live session, if the launch has completed
    pub fn session(&self) -> Option<Arc<dyn AgentSession>> {
        self.session.clone()
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.session.as_ref().map(|s| s.account_id())
    }

    /// Whether a callback tagged with `generation` belongs to the current run
    pub fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.generation == generation
    }

    /// Transition to Running and hand the config to the runtime.
    /// No-op (returns false) if already Running.
    pub fn start(&mut self, launcher: &mut Launcher) -> bool {
        if self.is_running() {
            debug!(agent = %self.name(), index = self.index(), "start ignored, already running");
            return false;
        }

        self.generation += 1;
        self.state = AgentState::Running;
        self.started_at = Some(Utc::now());
        self.ready_pending = false;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancel_launch = Some(cancel_tx);
        launcher.launch(self, cancel_rx);

        info!(agent = %self.name(), index = self.index(), role = %self.role(), "agent starting");
        true
    }

    /// Terminate the live worker and transition to Stopped.
    /// No-op (returns false) if already Stopped; safe on a never-started handle.
    pub async fn stop(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }

        self.generation += 1;
        self.state = AgentState::Stopped;
        self.ready_pending = false;
        // Dropping the sender cancels a launch still waiting for its slot
        self.cancel_launch = None;

        if let Some(session) = self.session.take() {
            session.shutdown().await;
        }

        info!(agent = %self.name(), index = self.index(), "agent stopped");
        true
    }

    /// Attach the session produced by a launch. A session for a stale
    /// generation is handed back so the caller can shut it down.
    pub fn attach(
        &mut self,
        generation: u64,
        session: Arc<dyn AgentSession>,
    ) -> std::result::Result<(), Arc<dyn AgentSession>> {
        if !self.is_current(generation) {
            return Err(session);
        }
        self.cancel_launch = None;
        self.session = Some(session);
        Ok(())
    }

    /// The launch for `generation` failed; fall back to Stopped
    pub fn launch_failed(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.generation += 1;
        self.state = AgentState::Stopped;
        self.cancel_launch = None;
        self.ready_pending = false;
        true
    }

    /// The worker for `generation` ended by itself
    pub fn mark_exited(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.generation += 1;
        self.state = AgentState::Stopped;
        self.session = None;
        self.ready_pending = false;
        true
    }

    /// Remember a readiness report that arrived before the session was attached
    pub fn defer_ready(&mut self) {
        self.ready_pending = true;
    }

    pub fn take_deferred_ready(&mut self) -> bool {
        std::mem::take(&mut self.ready_pending)
    }

    pub fn set_auth_code(&mut self, code: String) {
        self.auth_code = Some(code);
    }

    pub fn auth_code(&self) -> Option<&str> {
        self.auth_code.as_deref()
    }
}

/// Spawns launch tasks, spacing them by the configured stagger so the
/// service never sees a burst of simultaneous logins.
pub struct Launcher {
    runtime: Arc<dyn SessionRuntime>,
    fleet: OrchestratorHandle,
    maintenance: MaintenanceSettings,
    stagger: Duration,
    next_slot: Option<Instant>,
}

impl Launcher {
    pub fn new(
        runtime: Arc<dyn SessionRuntime>,
        fleet: OrchestratorHandle,
        maintenance: MaintenanceSettings,
        stagger: Duration,
    ) -> Self {
        Self {
            runtime,
            fleet,
            maintenance,
            stagger,
            next_slot: None,
        }
    }

    /// Reserve the next launch slot and return how long to wait for it
    fn reserve_slot(&mut self) -> Duration {
        let now = Instant::now();
        let slot = match self.next_slot {
            Some(next) if next > now => next,
            _ => now,
        };
        self.next_slot = Some(slot + self.stagger);
        slot.saturating_duration_since(now)
    }

    fn launch(&mut self, handle: &AgentHandle, mut cancel: oneshot::Receiver<()>) {
        let delay = self.reserve_slot();
        let index = handle.index();
        let generation = handle.generation();

        let context = AgentContext::new(handle.config.clone(), generation, self.fleet.clone());
        let handler = handler_for(handle.role(), context.clone(), self.maintenance.clone());
        let request = LaunchRequest {
            config: handle.config.clone(),
            auth_code: handle.auth_code.clone(),
            context,
            handler,
        };

        let runtime = self.runtime.clone();
        let fleet = self.fleet.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = &mut cancel => {
                        debug!(index, generation, "launch cancelled before its slot");
                        return;
                    }
                }
            }

            let result = runtime.launch(request).await;
            if let Err(e) = &result {
                warn!(index, generation, error = %e, "agent launch failed");
            }
            fleet.launched(index, generation, result).await;
        });
    }
}
