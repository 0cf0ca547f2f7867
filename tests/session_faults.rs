//! Transient session errors during a handoff must not wedge the pair.

mod common;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{settings, spawn_with_runtime, wait_until};
use itemfleet::session::{
    DryRunRuntime, DryRunWorld, LaunchRequest, MaintenanceTask, TransferRecord,
};
use itemfleet::{
    AccountId, AgentSession, FleetError, HandoffPhase, InventorySnapshot, Result, SessionRuntime,
};

/// Number of upcoming calls to fail, per operation
#[derive(Default)]
struct Faults {
    is_friend: AtomicUsize,
    add_friend: AtomicUsize,
    inventory: AtomicUsize,
    transfer: AtomicUsize,
}

fn trip(counter: &AtomicUsize, what: &str) -> Result<()> {
    match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1)) {
        Ok(_) => Err(FleetError::Session(format!("{what}: service unavailable"))),
        Err(_) => Ok(()),
    }
}

/// Dry-run runtime whose sessions fail a configured number of calls
struct FlakyRuntime {
    inner: DryRunRuntime,
    faults: Arc<Faults>,
}

#[async_trait]
impl SessionRuntime for FlakyRuntime {
    async fn launch(&self, request: LaunchRequest) -> Result<Arc<dyn AgentSession>> {
        let inner = self.inner.launch(request).await?;
        Ok(Arc::new(FlakySession {
            inner,
            faults: self.faults.clone(),
        }))
    }
}

struct FlakySession {
    inner: Arc<dyn AgentSession>,
    faults: Arc<Faults>,
}

#[async_trait]
impl AgentSession for FlakySession {
    fn account_id(&self) -> AccountId {
        self.inner.account_id()
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    async fn is_friend(&self, other: AccountId) -> Result<bool> {
        trip(&self.faults.is_friend, "is_friend")?;
        self.inner.is_friend(other).await
    }

    async fn add_friend(&self, other: AccountId) -> Result<()> {
        trip(&self.faults.add_friend, "add_friend")?;
        self.inner.add_friend(other).await
    }

    async fn inventory(&self) -> Result<InventorySnapshot> {
        trip(&self.faults.inventory, "inventory")?;
        self.inner.inventory().await
    }

    async fn transfer_items(&self, count: usize, recipient: AccountId) -> Result<()> {
        trip(&self.faults.transfer, "transfer_items")?;
        self.inner.transfer_items(count, recipient).await
    }

    async fn send_message(&self, to: AccountId, message: &str) -> Result<()> {
        self.inner.send_message(to, message).await
    }

    async fn run_maintenance(&self, task: MaintenanceTask) -> Result<()> {
        self.inner.run_maintenance(task).await
    }

    async fn set_auth_code(&self, code: &str) {
        self.inner.set_auth_code(code).await
    }

    async fn handle_command(&self, command: &str) -> Result<()> {
        self.inner.handle_command(command).await
    }

    async fn request_report(&self) {
        self.inner.request_report().await
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await
    }
}

/// One collector with 10 free slots and one giver holding 3 tradable items
async fn run_pair_with(faults: Faults) -> (DryRunWorld, AccountId, AccountId) {
    let world = DryRunWorld::new();
    let c1 = world.seed("C1", InventorySnapshot::new(10, 0, 0)).await;
    let g1 = world.seed("G1", InventorySnapshot::new(10, 3, 3)).await;

    let runtime = Arc::new(FlakyRuntime {
        inner: DryRunRuntime::new(world.clone()),
        faults: Arc::new(faults),
    });
    let config = settings(&[("C1", "collector"), ("G1", "giver")], "");
    let fleet = spawn_with_runtime(&config, world.clone(), runtime);
    fleet.fleet.initiate_collection().await.unwrap();

    wait_until(&fleet.fleet, "drained fleet", |s| s.phase == HandoffPhase::Drained).await;
    assert_eq!(
        world.transfers().await,
        vec![TransferRecord { from: g1, to: c1, count: 3 }]
    );
    fleet.stop().await;
    (world, c1, g1)
}

#[tokio::test]
async fn failed_friend_query_still_sends_the_request() {
    let faults = Faults::default();
    faults.is_friend.store(1, Ordering::SeqCst);

    let (world, c1, g1) = run_pair_with(faults).await;
    assert!(world.are_friends(c1, g1).await);
}

#[tokio::test]
async fn failed_friend_request_is_sent_again() {
    let faults = Faults::default();
    faults.add_friend.store(1, Ordering::SeqCst);

    let (world, c1, g1) = run_pair_with(faults).await;
    assert!(world.are_friends(c1, g1).await);
}

#[tokio::test]
async fn failed_inventory_fetch_re_evaluates_the_pair() {
    let faults = Faults::default();
    faults.inventory.store(1, Ordering::SeqCst);

    let (world, c1, g1) = run_pair_with(faults).await;
    assert!(world.reannounce_count(c1).await >= 1);
    assert!(world.reannounce_count(g1).await >= 1);
}

#[tokio::test]
async fn failed_transfer_request_re_evaluates_the_pair() {
    let faults = Faults::default();
    faults.transfer.store(1, Ordering::SeqCst);

    let (world, _, g1) = run_pair_with(faults).await;
    // the retired giver only re-announces when asked to after the failure
    assert!(world.reannounce_count(g1).await >= 1);
}
