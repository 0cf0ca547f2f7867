//! Orchestrator - pool rotation and the collector/giver handoff
//!
//! The Orchestrator owns every AgentHandle, both role pools and the pairing
//! state. Agents, background tasks and the operator talk to it through a
//! clonable `OrchestratorHandle`; the main `run()` loop consumes one command
//! at a time, so readiness reports and trade completions never interleave.
//!
//! Handoff: InitiateCollection starts the front collector and giver. When
//! both have reported ready, the collector befriends the giver and, once the
//! relation exists, the giver offers `min(free slots, tradable items)`. A
//! completed trade retires whichever side is exhausted and rotates in the
//! next agent of that role; an empty pool stops the whole fleet.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tracing::{debug, error, info, warn};

use super::command::{AgentTarget, OrchestratorCommand};
use super::config::OrchestratorConfig;
use super::handoff::{
    spawn_friendship_wait, spawn_reevaluation, spawn_trade_timer, FriendshipPolling,
};
use super::state::{
    AgentStatusSnapshot, ApprovedSet, FleetSnapshot, HandoffPhase, PairingState,
};
use crate::agent::{AgentHandle, Launcher, RolePool};
use crate::config::{AgentConfig, FleetConfig, MaintenanceSettings, Role};
use crate::coordination::ShutdownSignal;
use crate::error::{FleetError, Result};
use crate::session::{AccountId, AgentSession, SessionRuntime};

/// Clonable handle given to agents, background tasks and the operator shell
#[derive(Clone)]
pub struct OrchestratorHandle {
    command_tx: mpsc::Sender<OrchestratorCommand>,
    approved: Arc<RwLock<ApprovedSet>>,
}

impl OrchestratorHandle {
    async fn send(&self, command: OrchestratorCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| FleetError::ChannelClosed("orchestrator command channel closed".into()))
    }

    /// Start the front collector and giver
    pub async fn initiate_collection(&self) -> Result<()> {
        self.send(OrchestratorCommand::InitiateCollection).await
    }

    pub async fn report_ready(&self, index: usize, generation: u64) -> Result<()> {
        self.send(OrchestratorCommand::ReportReady { index, generation })
            .await
    }

    pub async fn report_trade_success(&self, index: usize, generation: u64) -> Result<()> {
        self.send(OrchestratorCommand::ReportTradeSuccess { index, generation })
            .await
    }

    pub async fn report_exited(&self, index: usize, generation: u64) -> Result<()> {
        self.send(OrchestratorCommand::AgentExited { index, generation })
            .await
    }

    /// Deliver a launch result. If the orchestrator is gone, a freshly
    /// launched session is shut down instead of leaking.
    pub(crate) async fn launched(
        &self,
        index: usize,
        generation: u64,
        result: Result<Arc<dyn AgentSession>>,
    ) {
        let command = OrchestratorCommand::Launched {
            index,
            generation,
            result,
        };
        if let Err(mpsc::error::SendError(command)) = self.command_tx.send(command).await {
            if let OrchestratorCommand::Launched {
                result: Ok(session),
                ..
            } = command
            {
                session.shutdown().await;
            }
        }
    }

    pub(crate) async fn friendship_established(&self, epoch: u64) -> Result<()> {
        self.send(OrchestratorCommand::FriendshipEstablished { epoch })
            .await
    }

    pub(crate) async fn trade_timed_out(&self, epoch: u64) -> Result<()> {
        self.send(OrchestratorCommand::TradeTimedOut { epoch }).await
    }

    pub async fn start(&self, target: AgentTarget) -> Result<()> {
        self.send(OrchestratorCommand::Start(target)).await
    }

    pub async fn stop(&self, target: AgentTarget) -> Result<()> {
        self.send(OrchestratorCommand::Stop(target)).await
    }

    /// Inject an out-of-band authentication code
    pub async fn authenticate(&self, index: usize, code: String) -> Result<()> {
        self.send(OrchestratorCommand::Authenticate { index, code })
            .await
    }

    /// Forward a free-form command to a running agent
    pub async fn send_command(&self, index: usize, command: String) -> Result<()> {
        self.send(OrchestratorCommand::Forward { index, command })
            .await
    }

    /// Stop every agent regardless of state
    pub async fn stop_all(&self) -> Result<()> {
        self.send(OrchestratorCommand::StopAll).await
    }

    /// Fleet view taken after every previously sent command was processed
    pub async fn snapshot(&self) -> Result<FleetSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(OrchestratorCommand::Snapshot(tx)).await?;
        rx.await
            .map_err(|_| FleetError::ChannelClosed("snapshot reply dropped".into()))
    }

    pub async fn is_approved(&self, account: AccountId) -> bool {
        self.approved.read().await.contains(account)
    }

    pub async fn approved_count(&self) -> usize {
        self.approved.read().await.len()
    }
}

/// The Orchestrator - owns fleet state and runs the command loop
pub struct Orchestrator {
    config: OrchestratorConfig,
    handles: Vec<AgentHandle>,
    collectors: RolePool,
    givers: RolePool,
    pairing: PairingState,
    approved: Arc<RwLock<ApprovedSet>>,
    launcher: Launcher,
    drained: bool,
    closing: watch::Sender<bool>,

    command_tx: mpsc::Sender<OrchestratorCommand>,
    command_rx: mpsc::Receiver<OrchestratorCommand>,
}

impl Orchestrator {
    /// Build the fleet. Agents are queued into their role pool in the order
    /// given; each agent's index is its position.
    pub fn new(
        config: OrchestratorConfig,
        agents: Vec<AgentConfig>,
        runtime: Arc<dyn SessionRuntime>,
        maintenance: MaintenanceSettings,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let approved = Arc::new(RwLock::new(ApprovedSet::new()));
        let (closing, _) = watch::channel(false);

        let handle = OrchestratorHandle {
            command_tx: command_tx.clone(),
            approved: approved.clone(),
        };
        let launcher = Launcher::new(runtime, handle, maintenance, config.stagger());

        let mut collectors = RolePool::new(Role::Collector);
        let mut givers = RolePool::new(Role::Giver);
        let mut handles = Vec::with_capacity(agents.len());
        for (position, mut agent) in agents.into_iter().enumerate() {
            agent.index = position;
            match agent.role {
                Role::Collector => collectors.push_back(position),
                Role::Giver => givers.push_back(position),
            };
            handles.push(AgentHandle::new(agent));
        }

        Self {
            config,
            handles,
            collectors,
            givers,
            pairing: PairingState::new(),
            approved,
            launcher,
            drained: false,
            closing,
            command_tx,
            command_rx,
        }
    }

    /// Build from a validated settings file
    pub fn from_config(config: &FleetConfig, runtime: Arc<dyn SessionRuntime>) -> Result<Self> {
        Ok(Self::new(
            config.orchestrator.clone(),
            config.agents()?,
            runtime,
            config.maintenance(),
        ))
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            command_tx: self.command_tx.clone(),
            approved: self.approved.clone(),
        }
    }

    pub fn agent_count(&self) -> usize {
        self.handles.len()
    }

    /// Main orchestrator loop - runs until a shutdown signal arrives
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<ShutdownSignal>) {
        info!(
            agents = self.handles.len(),
            collectors = self.collectors.len(),
            givers = self.givers.len(),
            "orchestrator starting main loop"
        );

        loop {
            tokio::select! {
                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command).await;
                }

                signal = shutdown_rx.recv() => {
                    match signal {
                        Ok(signal) => info!(%signal, "orchestrator: shutdown signal received"),
                        Err(e) => warn!(error = %e, "orchestrator: shutdown channel closed"),
                    }
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("orchestrator: main loop exited");
    }

    async fn handle_command(&mut self, command: OrchestratorCommand) {
        debug!(command = command.name(), "orchestrator command");
        match command {
            OrchestratorCommand::Launched {
                index,
                generation,
                result,
            } => self.on_launched(index, generation, result).await,
            OrchestratorCommand::ReportReady { index, generation } => {
                self.report_ready(index, generation).await
            }
            OrchestratorCommand::ReportTradeSuccess { index, generation } => {
                self.report_trade_success(index, generation).await
            }
            OrchestratorCommand::AgentExited { index, generation } => {
                self.on_exited(index, generation)
            }
            OrchestratorCommand::FriendshipEstablished { epoch } => {
                self.request_transfer(epoch).await
            }
            OrchestratorCommand::TradeTimedOut { epoch } => self.on_trade_timeout(epoch).await,
            OrchestratorCommand::InitiateCollection => self.initiate_collection().await,
            OrchestratorCommand::Start(target) => {
                for index in self.resolve(&target) {
                    self.start_agent(index);
                }
            }
            OrchestratorCommand::Stop(target) => {
                for index in self.resolve(&target) {
                    self.stop_agent(index).await;
                }
            }
            OrchestratorCommand::Authenticate { index, code } => {
                self.authenticate(index, code).await
            }
            OrchestratorCommand::Forward { index, command } => {
                self.forward(index, command).await
            }
            OrchestratorCommand::StopAll => self.stop_all().await,
            OrchestratorCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot().await);
            }
        }
    }

    // ------------------------------------------------------------------
    // Agent lifecycle
    // ------------------------------------------------------------------

    fn start_agent(&mut self, index: usize) {
        if let Some(handle) = self.handles.get_mut(index) {
            handle.start(&mut self.launcher);
        }
    }

    async fn stop_agent(&mut self, index: usize) {
        if let Some(role) = self.pairing.holds(index) {
            self.pairing.clear(role);
        }
        if let Some(handle) = self.handles.get_mut(index) {
            handle.stop().await;
        }
    }

    /// Stop every handle and clear the pairing. Safe to call repeatedly.
    async fn stop_all(&mut self) {
        info!("Shutting down all agent workers");
        self.pairing.clear_all();
        join_all(self.handles.iter_mut().map(|handle| handle.stop())).await;
    }

    async fn shutdown(&mut self) {
        self.closing.send_replace(true);
        self.stop_all().await;
    }

    async fn on_launched(
        &mut self,
        index: usize,
        generation: u64,
        result: Result<Arc<dyn AgentSession>>,
    ) {
        let Some(handle) = self.handles.get_mut(index) else {
            return;
        };

        match result {
            Ok(session) => {
                let account = session.account_id();
                match handle.attach(generation, session) {
                    Ok(()) => {
                        info!(agent = %handle.name(), index, %account, "agent session attached");
                        if handle.take_deferred_ready() {
                            self.report_ready(index, generation).await;
                        }
                    }
                    Err(stale) => {
                        debug!(index, generation, "discarding session from a cancelled launch");
                        stale.shutdown().await;
                    }
                }
            }
            Err(e) => {
                if handle.launch_failed(generation) {
                    error!(agent = %handle.name(), index, error = %e, "agent failed to start");
                }
            }
        }
    }

    fn on_exited(&mut self, index: usize, generation: u64) {
        let Some(handle) = self.handles.get_mut(index) else {
            return;
        };
        if !handle.mark_exited(generation) {
            return;
        }
        warn!(agent = %handle.name(), index, "agent worker exited");
        if let Some(role) = self.pairing.holds(index) {
            self.pairing.clear(role);
        }
    }

    // ------------------------------------------------------------------
    // Handoff state machine
    // ------------------------------------------------------------------

    async fn initiate_collection(&mut self) {
        let Some(collector) = self.collectors.front() else {
            info!("no collecting agents waiting; staying idle");
            return;
        };

        self.drained = false;
        self.start_agent(collector);

        match self.givers.front() {
            Some(giver) => self.start_agent(giver),
            None => {
                self.stop_all().await;
                self.drained = true;
                warn!("There are no giving agents available!");
            }
        }
    }

    async fn report_ready(&mut self, index: usize, generation: u64) {
        let Some(handle) = self.handles.get_mut(index) else {
            warn!(index, "readiness report for unknown agent index");
            return;
        };
        if !handle.is_current(generation) {
            debug!(index, generation, "ignoring readiness report from a previous run");
            return;
        }
        let Some(session) = handle.session() else {
            debug!(index, "readiness report arrived before launch completed; deferring");
            handle.defer_ready();
            return;
        };

        let role = handle.role();
        let name = handle.name().to_string();
        let account = session.account_id();

        if self.approved.write().await.approve(account) {
            debug!(agent = %name, %account, "identity approved");
        }

        // Only the front of a pool may be active; retirement pops the front
        if self.pool(role).front() != Some(index) {
            info!(agent = %name, %role, "agent is not next in its pool; not pairing it");
            return;
        }

        self.drained = false;
        self.pairing.set(role, index);
        info!(agent = %name, %role, %account, "agent ready");

        self.evaluate_pair().await;
    }

    /// Both roles present: befriend, size the transfer, then either wait for
    /// the friend relation or retire straight away when there is nothing to move.
    async fn evaluate_pair(&mut self) {
        let Some((c, g)) = self.pairing.pair() else {
            return;
        };
        if self.pairing.in_flight() {
            debug!(epoch = self.pairing.epoch(), "handoff already in flight");
            return;
        }
        let (Some(collector), Some(giver)) = (self.handles[c].session(), self.handles[g].session())
        else {
            return;
        };

        let collector_id = collector.account_id();
        let giver_id = giver.account_id();
        let epoch = self.pairing.epoch();

        let befriended = match giver.is_friend(collector_id).await {
            Ok(known) => known,
            Err(e) => {
                warn!(giver = %giver_id, error = %e, "friend relation query failed; sending the request anyway");
                false
            }
        };
        if !befriended {
            info!(collector = %collector_id, giver = %giver_id, "sending friend request");
            if let Err(e) = collector.add_friend(giver_id).await {
                warn!(collector = %collector_id, giver = %giver_id, error = %e, "friend request failed");
            }
        }

        let inventories = match (collector.inventory().await, giver.inventory().await) {
            (Ok(ci), Ok(gi)) => Ok((ci, gi)),
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        let (collector_inventory, giver_inventory) = match inventories {
            Ok(inventories) => inventories,
            Err(e) => {
                warn!(epoch, error = %e, "inventory fetch failed; re-evaluating later");
                self.schedule_reevaluation(vec![collector, giver]);
                return;
            }
        };

        let free_slots = collector_inventory.free_slots();
        let tradable = giver_inventory.tradable_count;
        if free_slots == 0 || tradable == 0 {
            info!(free_slots, tradable, "nothing to transfer; retiring exhausted agents");
            self.retire().await;
            return;
        }

        let amount = free_slots.min(tradable);
        info!(epoch, amount, free_slots, tradable, "handoff sized; waiting for friend relation");
        let timing = FriendshipPolling {
            poll: self.config.friend_poll_interval(),
            resend: self.config.friend_resend_interval(),
        };
        let task = spawn_friendship_wait(
            self.handle(),
            epoch,
            collector,
            giver,
            timing,
            self.closing.subscribe(),
        );
        self.pairing.begin_befriending(amount, task);
    }

    async fn request_transfer(&mut self, epoch: u64) {
        if epoch != self.pairing.epoch() || !self.pairing.is_befriending() {
            debug!(epoch, current = self.pairing.epoch(), "stale friendship confirmation");
            return;
        }
        let (Some((c, g)), Some(amount)) = (self.pairing.pair(), self.pairing.requested_amount())
        else {
            return;
        };
        let (Some(collector), Some(giver)) = (self.handles[c].session(), self.handles[g].session())
        else {
            self.pairing.settle();
            return;
        };

        let recipient = collector.account_id();
        match giver.transfer_items(amount, recipient).await {
            Ok(()) => {
                let timer = self.config.trade_timeout_enabled.then(|| {
                    spawn_trade_timer(
                        self.handle(),
                        epoch,
                        self.handles[g].config().maximum_trade_time,
                        self.closing.subscribe(),
                    )
                });
                self.pairing.begin_transfer(amount, timer);
                info!(epoch, amount, %recipient, giver = %giver.account_id(), "transfer requested");
            }
            Err(e) => {
                warn!(epoch, amount, error = %e, "transfer request failed; re-evaluating later");
                self.schedule_reevaluation(vec![collector, giver]);
            }
        }
    }

    /// Keep the pair and have both sides report again after the retry delay
    fn schedule_reevaluation(&mut self, sessions: Vec<Arc<dyn AgentSession>>) {
        let task = spawn_reevaluation(sessions, self.config.retry_delay(), self.closing.subscribe());
        self.pairing.arm_retry(task);
    }

    async fn report_trade_success(&mut self, index: usize, generation: u64) {
        let Some(handle) = self.handles.get(index) else {
            return;
        };
        if !handle.is_current(generation) {
            debug!(index, generation, "ignoring trade report from a previous run");
            return;
        }
        if self.pairing.holds(index).is_none() {
            debug!(index, "trade success from an agent outside the active pair");
            return;
        }
        self.retire().await;
    }

    async fn on_trade_timeout(&mut self, epoch: u64) {
        if epoch != self.pairing.epoch() || !self.pairing.is_transferring() {
            return;
        }
        warn!(epoch, "trade did not complete within the maximum trade time; re-evaluating");
        self.retire().await;
    }

    /// Retirement procedure: refresh both inventories, retire the exhausted
    /// side(s), rotate in successors and ask survivors to report again.
    async fn retire(&mut self) {
        let Some((c, g)) = self.pairing.pair() else {
            warn!("retirement requested without a complete pair");
            return;
        };
        self.pairing.settle();

        let (Some(collector), Some(giver)) = (self.handles[c].session(), self.handles[g].session())
        else {
            return;
        };
        let inventories = match (collector.inventory().await, giver.inventory().await) {
            (Ok(ci), Ok(gi)) => Ok((ci, gi)),
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        let (collector_inventory, giver_inventory) = match inventories {
            Ok(inventories) => inventories,
            Err(e) => {
                warn!(error = %e, "inventory refresh failed; keeping the current pair");
                self.schedule_reevaluation(vec![collector, giver]);
                return;
            }
        };

        let giver_retired = !giver_inventory.has_tradable();
        if giver_retired {
            info!(agent = %self.handles[g].name(), "giver has no tradable items left; retiring");
            self.retire_agent(Role::Giver, g).await;
        }

        let collector_retired = collector_inventory.is_full();
        if collector_retired {
            info!(agent = %self.handles[c].name(), "collector is full; retiring");
            self.retire_agent(Role::Collector, c).await;
        }

        if self.rotate(Role::Collector, c, collector_retired).await {
            return;
        }
        self.rotate(Role::Giver, g, giver_retired).await;
    }

    async fn retire_agent(&mut self, role: Role, index: usize) {
        self.pairing.clear(role);
        self.handles[index].stop().await;

        let pool = self.pool_mut(role);
        match pool.front() {
            Some(front) if front == index => {
                pool.pop_front();
            }
            Some(front) => {
                warn!(%role, retired = index, front, "retired agent was not at the front of its pool");
                pool.remove(index);
            }
            None => warn!(%role, index, "retired agent's pool was already empty"),
        }
    }

    /// Returns true if the fleet was drained
    async fn rotate(&mut self, role: Role, index: usize, retired: bool) -> bool {
        if !retired {
            if let Some(session) = self.handles[index].session() {
                session.request_report().await;
            }
            return false;
        }

        match self.pool(role).front() {
            Some(next) => {
                info!(%role, agent = %self.handles[next].name(), "rotating in next agent");
                self.start_agent(next);
                false
            }
            None => {
                self.stop_all().await;
                self.drained = true;
                warn!(
                    "There are no more {} agents available!",
                    match role {
                        Role::Collector => "collecting",
                        Role::Giver => "giving",
                    }
                );
                true
            }
        }
    }

    // ------------------------------------------------------------------
    // Operator commands
    // ------------------------------------------------------------------

    /// Index targets out of range warn and resolve to nothing; name targets
    /// may resolve to nothing silently.
    fn resolve(&self, target: &AgentTarget) -> Vec<usize> {
        match target {
            AgentTarget::Index(index) if *index < self.handles.len() => vec![*index],
            AgentTarget::Index(index) => {
                warn!("Invalid agent index: {}", index);
                Vec::new()
            }
            AgentTarget::Name(name) => {
                let matches: Vec<usize> = self
                    .handles
                    .iter()
                    .filter(|h| h.config().matches_name(name))
                    .map(|h| h.index())
                    .collect();
                if matches.is_empty() {
                    debug!(name = %name, "no agent matches name");
                }
                matches
            }
        }
    }

    async fn authenticate(&mut self, index: usize, code: String) {
        let Some(handle) = self.handles.get_mut(index) else {
            warn!("Invalid agent index: {}", index);
            return;
        };
        if let Some(session) = handle.session() {
            session.set_auth_code(&code).await;
        }
        info!(agent = %handle.name(), index, "authentication code set");
        handle.set_auth_code(code);
    }

    async fn forward(&mut self, index: usize, command: String) {
        let Some(handle) = self.handles.get(index) else {
            warn!("Invalid agent index: {}", index);
            return;
        };
        if !handle.is_running() {
            warn!("Agent at index {} is not running. Use the 'start' command first", index);
            return;
        }
        let Some(session) = handle.session() else {
            warn!(agent = %handle.name(), "agent is still logging in; command dropped");
            return;
        };

        debug!(agent = %handle.name(), index, command = %command, "forwarding command");
        if let Err(e) = session.handle_command(&command).await {
            warn!(agent = %handle.name(), error = %e, "agent rejected command");
        }
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    fn pool(&self, role: Role) -> &RolePool {
        match role {
            Role::Collector => &self.collectors,
            Role::Giver => &self.givers,
        }
    }

    fn pool_mut(&mut self, role: Role) -> &mut RolePool {
        match role {
            Role::Collector => &mut self.collectors,
            Role::Giver => &mut self.givers,
        }
    }

    fn phase(&self) -> HandoffPhase {
        if self.pairing.is_transferring() {
            HandoffPhase::Transferring
        } else if self.pairing.is_befriending() {
            HandoffPhase::Befriending
        } else if self.drained {
            HandoffPhase::Drained
        } else if !self.pairing.is_empty() || self.handles.iter().any(|h| h.is_running()) {
            HandoffPhase::AwaitingPair
        } else {
            HandoffPhase::Idle
        }
    }

    async fn snapshot(&self) -> FleetSnapshot {
        FleetSnapshot {
            phase: self.phase(),
            agents: self
                .handles
                .iter()
                .map(|h| AgentStatusSnapshot {
                    index: h.index(),
                    username: h.name().to_string(),
                    role: h.role().to_string(),
                    state: h.state(),
                    account: h.account_id(),
                    started_at: h.started_at(),
                })
                .collect(),
            collector_pool: self.collectors.iter().collect(),
            giver_pool: self.givers.iter().collect(),
            active_collector: self.pairing.collector(),
            active_giver: self.pairing.giver(),
            approved_count: self.approved.read().await.len(),
            pairing_epoch: self.pairing.epoch(),
            taken_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentState;
    use crate::config::FleetConfig;
    use crate::session::{DryRunRuntime, DryRunWorld};

    const FLEET: &str = r#"{
        "orchestrator": { "stagger_ms": 0, "friend_poll_ms": 10 },
        "bots": [
            { "username": "Collector1", "password": "p", "role": "collector" },
            { "username": "Giver1", "password": "p", "role": "giver" },
            { "username": "Giver2", "password": "p", "role": "giver" }
        ]
    }"#;

    fn orchestrator() -> Orchestrator {
        let config = FleetConfig::from_json_str(FLEET).unwrap();
        let world = DryRunWorld::new();
        let runtime = Arc::new(DryRunRuntime::new(world));
        Orchestrator::from_config(&config, runtime).unwrap()
    }

    #[test]
    fn test_pools_follow_config_order() {
        let orch = orchestrator();
        assert_eq!(orch.collectors.iter().collect::<Vec<_>>(), vec![0]);
        assert_eq!(orch.givers.iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(orch.agent_count(), 3);
    }

    #[tokio::test]
    async fn test_stop_on_never_started_handle_is_noop() {
        let mut orch = orchestrator();
        orch.stop_agent(1).await;
        assert_eq!(orch.handles[1].state(), AgentState::Stopped);
        assert_eq!(orch.handles[1].generation(), 0);

        // global stop is safe more than once
        orch.stop_all().await;
        orch.stop_all().await;
        assert!(orch.handles.iter().all(|h| h.state() == AgentState::Stopped));
    }

    #[tokio::test]
    async fn test_out_of_range_index_changes_nothing() {
        let mut orch = orchestrator();
        assert!(orch.resolve(&AgentTarget::Index(9)).is_empty());

        orch.forward(9, "status".into()).await;
        orch.authenticate(9, "ABCDE".into()).await;
        assert!(orch.handles.iter().all(|h| h.state() == AgentState::Stopped));
        assert!(orch.handles.iter().all(|h| h.auth_code().is_none()));
    }

    #[tokio::test]
    async fn test_forward_to_stopped_agent_is_dropped() {
        let mut orch = orchestrator();
        orch.forward(0, "status".into()).await;
        assert_eq!(orch.handles[0].state(), AgentState::Stopped);
    }

    #[test]
    fn test_name_resolution_is_case_insensitive() {
        let orch = orchestrator();
        assert_eq!(orch.resolve(&AgentTarget::Name("giver2".into())), vec![2]);
        assert_eq!(orch.resolve(&AgentTarget::Name("GIVER1".into())), vec![1]);
        assert!(orch.resolve(&AgentTarget::Name("nobody".into())).is_empty());
    }

    #[tokio::test]
    async fn test_auth_code_kept_for_next_launch() {
        let mut orch = orchestrator();
        orch.authenticate(1, "F7K2Q".into()).await;
        assert_eq!(orch.handles[1].auth_code(), Some("F7K2Q"));
    }

    #[tokio::test]
    async fn test_retiring_a_non_front_agent_leaves_the_front_queued() {
        let mut orch = orchestrator();
        orch.retire_agent(Role::Giver, 2).await;
        assert_eq!(orch.givers.iter().collect::<Vec<_>>(), vec![1]);

        orch.retire_agent(Role::Giver, 1).await;
        assert!(orch.givers.is_empty());
    }

    #[tokio::test]
    async fn test_initiate_with_no_givers_drains() {
        let json = r#"{
            "orchestrator": { "stagger_ms": 0 },
            "bots": [ { "username": "c", "password": "p", "role": "collector" } ]
        }"#;
        let config = FleetConfig::from_json_str(json).unwrap();
        let runtime = Arc::new(DryRunRuntime::new(DryRunWorld::new()));
        let mut orch = Orchestrator::from_config(&config, runtime).unwrap();

        orch.initiate_collection().await;
        assert_eq!(orch.handles[0].state(), AgentState::Stopped);
        assert!(orch.pairing.is_empty());
        assert_eq!(orch.phase(), HandoffPhase::Drained);
    }
}
