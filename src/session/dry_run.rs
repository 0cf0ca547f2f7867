//! Dry-run runtime - an in-memory stand-in for the trading service
//!
//! Accounts, inventories, the friend graph and trade offers live in a shared
//! `DryRunWorld`. Sessions drive their role handler exactly like a real
//! worker would: login completion after a delay, friend requests routed to
//! the other account's handler, offers accepted or declined by the
//! recipient. The world also records everything that happened so tests can
//! assert on it, and exposes a few knobs (held friend requests, held trades,
//! rejected logins) to exercise the slow and failing paths.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    AccountId, AgentSession, InventorySnapshot, LaunchRequest, MaintenanceTask, OfferDecision,
    SessionRuntime, TradeOffer,
};
use crate::agent::{AgentContext, RoleHandler};
use crate::config::{DryRunConfig, Role};
use crate::error::{FleetError, Result};

const FIRST_ACCOUNT_ID: u64 = 76561198000000001;

/// One completed item transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRecord {
    pub from: AccountId,
    pub to: AccountId,
    pub count: usize,
}

#[derive(Default)]
struct WorldState {
    accounts: HashMap<AccountId, InventorySnapshot>,
    usernames: HashMap<String, AccountId>,
    next_account: u64,
    friends: HashSet<(AccountId, AccountId)>,
    live: HashMap<AccountId, Arc<DryRunSession>>,
    transfers: Vec<TransferRecord>,
    messages: Vec<(AccountId, AccountId, String)>,
    commands: Vec<(AccountId, String)>,
    maintenance: Vec<(AccountId, MaintenanceTask)>,
    rejected_logins: HashSet<String>,
    hold_friend_requests: bool,
    pending_friend_requests: Vec<(AccountId, AccountId)>,
    hold_trades: bool,
    pending_trades: Vec<(AccountId, AccountId, TradeOffer)>,
    logins: usize,
    reannounced: HashMap<AccountId, usize>,
}

fn friend_key(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Shared state of the simulated service
#[derive(Clone)]
pub struct DryRunWorld {
    state: Arc<Mutex<WorldState>>,
    defaults: DryRunConfig,
    next_offer: Arc<AtomicU64>,
}

impl Default for DryRunWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl DryRunWorld {
    pub fn new() -> Self {
        Self::with_defaults(DryRunConfig::default())
    }

    /// Inventories for accounts that weren't seeded come from `defaults`
    pub fn with_defaults(defaults: DryRunConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(WorldState {
                next_account: FIRST_ACCOUNT_ID,
                ..WorldState::default()
            })),
            defaults,
            next_offer: Arc::new(AtomicU64::new(1)),
        }
    }

    fn default_inventory(&self, role: Role) -> InventorySnapshot {
        let d = &self.defaults;
        match role {
            Role::Collector => InventorySnapshot::new(d.collector_capacity, d.collector_items, 0),
            Role::Giver => InventorySnapshot::new(
                d.collector_capacity.max(d.giver_items),
                d.giver_items,
                d.giver_items,
            ),
        }
    }

    fn account_in(state: &mut WorldState, username: &str) -> (AccountId, bool) {
        let key = username.to_ascii_lowercase();
        if let Some(&id) = state.usernames.get(&key) {
            return (id, false);
        }
        let id = AccountId(state.next_account);
        state.next_account += 1;
        state.usernames.insert(key, id);
        (id, true)
    }

    /// Set the inventory of `username`'s account, creating it if needed
    pub async fn seed(&self, username: &str, inventory: InventorySnapshot) -> AccountId {
        let mut state = self.state.lock().await;
        let (id, _) = Self::account_in(&mut state, username);
        state.accounts.insert(id, inventory);
        id
    }

    pub async fn account_of(&self, username: &str) -> Option<AccountId> {
        self.state
            .lock()
            .await
            .usernames
            .get(&username.to_ascii_lowercase())
            .copied()
    }

    pub async fn inventory_of(&self, account: AccountId) -> Option<InventorySnapshot> {
        self.state.lock().await.accounts.get(&account).copied()
    }

    pub async fn are_friends(&self, a: AccountId, b: AccountId) -> bool {
        self.state.lock().await.friends.contains(&friend_key(a, b))
    }

    pub async fn make_friends(&self, a: AccountId, b: AccountId) {
        self.state.lock().await.friends.insert(friend_key(a, b));
    }

    pub async fn transfers(&self) -> Vec<TransferRecord> {
        self.state.lock().await.transfers.clone()
    }

    pub async fn messages(&self) -> Vec<(AccountId, AccountId, String)> {
        self.state.lock().await.messages.clone()
    }

    pub async fn commands(&self) -> Vec<(AccountId, String)> {
        self.state.lock().await.commands.clone()
    }

    pub async fn maintenance_log(&self) -> Vec<(AccountId, MaintenanceTask)> {
        self.state.lock().await.maintenance.clone()
    }

    /// Number of successful logins so far
    pub async fn login_count(&self) -> usize {
        self.state.lock().await.logins
    }

    /// Readiness reports delivered because the orchestrator asked `account`
    /// to announce itself again
    pub async fn reannounce_count(&self, account: AccountId) -> usize {
        self.state
            .lock()
            .await
            .reannounced
            .get(&account)
            .copied()
            .unwrap_or(0)
    }

    pub async fn is_online(&self, account: AccountId) -> bool {
        self.state.lock().await.live.contains_key(&account)
    }

    pub async fn session(&self, account: AccountId) -> Option<Arc<DryRunSession>> {
        self.state.lock().await.live.get(&account).cloned()
    }

    /// Make logins for `username` fail
    pub async fn reject_login(&self, username: &str) {
        self.state
            .lock()
            .await
            .rejected_logins
            .insert(username.to_ascii_lowercase());
    }

    /// Queue friend requests instead of delivering them
    pub async fn hold_friend_requests(&self, hold: bool) {
        self.state.lock().await.hold_friend_requests = hold;
    }

    /// Deliver every queued friend request
    pub async fn release_friend_requests(&self) {
        let pending = {
            let mut state = self.state.lock().await;
            state.hold_friend_requests = false;
            std::mem::take(&mut state.pending_friend_requests)
        };
        for (from, to) in pending {
            self.deliver_friend_request(from, to).await;
        }
    }

    /// Queue trade offers instead of delivering them
    pub async fn hold_trades(&self, hold: bool) {
        self.state.lock().await.hold_trades = hold;
    }

    pub async fn pending_trade_count(&self) -> usize {
        self.state.lock().await.pending_trades.len()
    }

    /// Deliver every queued trade offer
    pub async fn release_trades(&self) {
        let pending = {
            let mut state = self.state.lock().await;
            state.hold_trades = false;
            std::mem::take(&mut state.pending_trades)
        };
        for (from, to, offer) in pending {
            self.deliver_offer(from, to, offer).await;
        }
    }

    /// Simulate the service dropping `account`'s worker
    pub async fn disconnect(&self, account: AccountId) {
        let session = self.state.lock().await.live.remove(&account);
        if let Some(session) = session {
            if session.running.swap(false, Ordering::SeqCst) {
                warn!(%account, "dry-run: session disconnected");
                if let Err(e) = session.context.report_exited().await {
                    debug!(%account, error = %e, "exit report not delivered");
                }
            }
        }
    }

    async fn unregister(&self, account: AccountId) {
        self.state.lock().await.live.remove(&account);
    }

    async fn deliver_friend_request(&self, from: AccountId, to: AccountId) {
        let (sender, recipient) = {
            let state = self.state.lock().await;
            (state.live.get(&from).cloned(), state.live.get(&to).cloned())
        };
        let Some(recipient) = recipient else {
            debug!(%from, %to, "dry-run: friend request to offline account queued");
            self.state
                .lock()
                .await
                .pending_friend_requests
                .push((from, to));
            return;
        };

        if !recipient.handler.on_friend_add(from).await {
            info!(%from, %to, "dry-run: friend request declined");
            return;
        }
        self.make_friends(from, to).await;

        tokio::spawn(async move {
            recipient
                .handler
                .on_friend_accepted(recipient.as_ref(), from)
                .await;
        });
        if let Some(sender) = sender {
            tokio::spawn(async move {
                sender.handler.on_friend_accepted(sender.as_ref(), to).await;
            });
        }
    }

    async fn deliver_offer(&self, from: AccountId, to: AccountId, offer: TradeOffer) {
        let Some(recipient) = self.session(to).await else {
            info!(%from, %to, offer_id = %offer.offer_id, "dry-run: recipient offline, offer dropped");
            return;
        };

        match recipient.handler.on_trade_offer(&offer).await {
            OfferDecision::Accept => {}
            OfferDecision::Decline => {
                info!(%from, %to, offer_id = %offer.offer_id, "dry-run: offer declined");
                return;
            }
        }

        let moved = {
            let mut state = self.state.lock().await;
            let available = state.accounts.get(&from).map_or(0, |i| i.tradable_count);
            let room = state.accounts.get(&to).map_or(0, |i| i.free_slots());
            let moved = offer.items_to_receive.min(available).min(room);
            if let Some(giver) = state.accounts.get_mut(&from) {
                giver.item_count = giver.item_count.saturating_sub(moved);
                giver.tradable_count = giver.tradable_count.saturating_sub(moved);
            }
            if let Some(collector) = state.accounts.get_mut(&to) {
                collector.item_count += moved;
                collector.tradable_count += moved;
            }
            state.transfers.push(TransferRecord {
                from,
                to,
                count: moved,
            });
            moved
        };

        let trade_id = format!("dry-trade-{}", offer.offer_id);
        debug!(%from, %to, moved, trade_id = %trade_id, "dry-run: trade completed");
        recipient.handler.on_offer_accepted(&offer, &trade_id).await;
    }
}

/// Launches `DryRunSession`s into a shared world
pub struct DryRunRuntime {
    world: DryRunWorld,
    login_delay: Duration,
}

impl DryRunRuntime {
    pub fn new(world: DryRunWorld) -> Self {
        Self {
            world,
            login_delay: Duration::ZERO,
        }
    }

    /// Simulated time between launch and login completion
    pub fn with_login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = delay;
        self
    }

    pub fn from_config(config: &DryRunConfig) -> Self {
        Self::new(DryRunWorld::with_defaults(config.clone()))
            .with_login_delay(Duration::from_millis(config.login_delay_ms))
    }

    pub fn world(&self) -> &DryRunWorld {
        &self.world
    }
}

#[async_trait]
impl SessionRuntime for DryRunRuntime {
    async fn launch(&self, request: LaunchRequest) -> Result<Arc<dyn AgentSession>> {
        let LaunchRequest {
            config,
            auth_code,
            context,
            handler,
        } = request;

        let account = {
            let mut state = self.world.state.lock().await;
            if state
                .rejected_logins
                .contains(&config.username.to_ascii_lowercase())
            {
                return Err(FleetError::Session(format!(
                    "login rejected for {}",
                    config.username
                )));
            }
            let (account, created) = DryRunWorld::account_in(&mut state, &config.username);
            if created || !state.accounts.contains_key(&account) {
                let inventory = self.world.default_inventory(config.role);
                state.accounts.insert(account, inventory);
            }
            state.logins += 1;
            account
        };

        let session = Arc::new(DryRunSession {
            account,
            world: self.world.clone(),
            context,
            handler,
            running: AtomicBool::new(true),
            auth_code: Mutex::new(auth_code),
        });
        self.world
            .state
            .lock()
            .await
            .live
            .insert(account, session.clone());
        info!(agent = %config.username, %account, "dry-run: session launched");

        let login = session.clone();
        let delay = self.login_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if login.is_running() {
                login.handler.on_login_completed(login.as_ref()).await;
            }
        });

        Ok(session)
    }
}

/// A logged-in account in the dry-run world
pub struct DryRunSession {
    account: AccountId,
    world: DryRunWorld,
    context: AgentContext,
    handler: Arc<dyn RoleHandler>,
    running: AtomicBool,
    auth_code: Mutex<Option<String>>,
}

impl DryRunSession {
    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(FleetError::NotRunning {
                index: self.context.index(),
            })
        }
    }

    pub async fn auth_code(&self) -> Option<String> {
        self.auth_code.lock().await.clone()
    }

    pub fn role(&self) -> Role {
        self.handler.role()
    }
}

#[async_trait]
impl AgentSession for DryRunSession {
    fn account_id(&self) -> AccountId {
        self.account
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn is_friend(&self, other: AccountId) -> Result<bool> {
        self.ensure_running()?;
        Ok(self.world.are_friends(self.account, other).await)
    }

    async fn add_friend(&self, other: AccountId) -> Result<()> {
        self.ensure_running()?;
        if self.world.are_friends(self.account, other).await {
            return Ok(());
        }

        let held = {
            let mut state = self.world.state.lock().await;
            let request = (self.account, other);
            if state.hold_friend_requests && !state.pending_friend_requests.contains(&request) {
                state.pending_friend_requests.push(request);
            }
            state.hold_friend_requests
        };
        if held {
            debug!(from = %self.account, to = %other, "dry-run: friend request held");
            return Ok(());
        }

        self.world.deliver_friend_request(self.account, other).await;
        Ok(())
    }

    async fn inventory(&self) -> Result<InventorySnapshot> {
        self.ensure_running()?;
        self.world
            .inventory_of(self.account)
            .await
            .ok_or_else(|| FleetError::Session(format!("no inventory for {}", self.account)))
    }

    async fn transfer_items(&self, count: usize, recipient: AccountId) -> Result<()> {
        self.ensure_running()?;
        if !self.world.are_friends(self.account, recipient).await {
            return Err(FleetError::Session(format!(
                "{} is not friends with {}",
                self.account, recipient
            )));
        }

        let offer = TradeOffer {
            offer_id: self.world.next_offer.fetch_add(1, Ordering::SeqCst).to_string(),
            sender: self.account,
            items_to_receive: count,
            items_to_give: 0,
        };
        debug!(from = %self.account, to = %recipient, count, offer_id = %offer.offer_id, "dry-run: offer sent");

        {
            let mut state = self.world.state.lock().await;
            if state.hold_trades {
                state.pending_trades.push((self.account, recipient, offer));
                return Ok(());
            }
        }

        let world = self.world.clone();
        let from = self.account;
        tokio::spawn(async move {
            world.deliver_offer(from, recipient, offer).await;
        });
        Ok(())
    }

    async fn send_message(&self, to: AccountId, message: &str) -> Result<()> {
        self.ensure_running()?;
        self.world
            .state
            .lock()
            .await
            .messages
            .push((self.account, to, message.to_string()));
        Ok(())
    }

    async fn run_maintenance(&self, task: MaintenanceTask) -> Result<()> {
        self.ensure_running()?;
        self.world
            .state
            .lock()
            .await
            .maintenance
            .push((self.account, task));
        Ok(())
    }

    async fn set_auth_code(&self, code: &str) {
        *self.auth_code.lock().await = Some(code.to_string());
    }

    async fn handle_command(&self, command: &str) -> Result<()> {
        self.ensure_running()?;
        self.world
            .state
            .lock()
            .await
            .commands
            .push((self.account, command.to_string()));
        Ok(())
    }

    async fn request_report(&self) {
        if !self.is_running() {
            return;
        }
        // delivered asynchronously, the way the service answers a request
        let context = self.context.clone();
        let world = self.world.clone();
        let account = self.account;
        tokio::spawn(async move {
            match context.report_ready().await {
                Ok(()) => {
                    *world
                        .state
                        .lock()
                        .await
                        .reannounced
                        .entry(account)
                        .or_default() += 1;
                }
                Err(e) => warn!(%account, error = %e, "dry-run: readiness report not delivered"),
            }
        });
    }

    async fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.world.unregister(self.account).await;
            debug!(account = %self.account, "dry-run: session shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accounts_are_stable_per_username() {
        let world = DryRunWorld::new();
        let a = world.seed("Alpha", InventorySnapshot::new(5, 0, 0)).await;
        let again = world.seed("alpha", InventorySnapshot::new(5, 1, 0)).await;
        let b = world.seed("Beta", InventorySnapshot::new(5, 0, 0)).await;

        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(world.account_of("ALPHA").await, Some(a));
        assert_eq!(world.inventory_of(a).await.unwrap().item_count, 1);
    }

    #[tokio::test]
    async fn test_friend_graph_is_symmetric() {
        let world = DryRunWorld::new();
        let a = AccountId(1);
        let b = AccountId(2);
        assert!(!world.are_friends(a, b).await);
        world.make_friends(b, a).await;
        assert!(world.are_friends(a, b).await);
    }

    #[test]
    fn test_default_inventories() {
        let world = DryRunWorld::new();
        let collector = world.default_inventory(Role::Collector);
        let giver = world.default_inventory(Role::Giver);
        assert_eq!(collector.free_slots(), 50);
        assert_eq!(giver.tradable_count, 10);
    }
}
