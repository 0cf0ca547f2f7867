#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use itemfleet::session::{DryRunRuntime, DryRunWorld};
use itemfleet::{
    FleetConfig, FleetSnapshot, Orchestrator, OrchestratorHandle, SessionRuntime, ShutdownSignal,
};

pub struct TestFleet {
    pub fleet: OrchestratorHandle,
    pub world: DryRunWorld,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    task: JoinHandle<()>,
}

impl TestFleet {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(ShutdownSignal::Graceful);
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

/// Settings with no stagger, fast friend polling and short retry delays.
/// `bots` is `(username, role)` in pool order.
pub fn settings(bots: &[(&str, &str)], bot_extra: &str) -> FleetConfig {
    let entries: Vec<String> = bots
        .iter()
        .map(|(name, role)| {
            format!(
                r#"{{ "username": "{name}", "password": "pw", "role": "{role}", "friend_accept_grace_ms": 0 {bot_extra} }}"#
            )
        })
        .collect();
    let json = format!(
        r#"{{
            "orchestrator": {{ "stagger_ms": 0, "friend_poll_ms": 10, "friend_resend_ms": 50, "retry_ms": 20 }},
            "bots": [ {} ]
        }}"#,
        entries.join(",")
    );
    FleetConfig::from_json_str(&json).expect("valid test settings")
}

pub fn spawn(config: &FleetConfig, world: DryRunWorld) -> TestFleet {
    let runtime = Arc::new(DryRunRuntime::new(world.clone()));
    spawn_with_runtime(config, world, runtime)
}

/// Like `spawn`, for runtimes that wrap the dry-run one
pub fn spawn_with_runtime(
    config: &FleetConfig,
    world: DryRunWorld,
    runtime: Arc<dyn SessionRuntime>,
) -> TestFleet {
    let orchestrator = Orchestrator::from_config(config, runtime).expect("orchestrator");
    let fleet = orchestrator.handle();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    let task = tokio::spawn(orchestrator.run(shutdown_rx));
    TestFleet {
        fleet,
        world,
        shutdown_tx,
        task,
    }
}

/// Poll snapshots until `done` holds, panicking after five seconds
pub async fn wait_until<F>(fleet: &OrchestratorHandle, what: &str, done: F) -> FleetSnapshot
where
    F: Fn(&FleetSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = fleet.snapshot().await.expect("orchestrator alive");
        if done(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}: {snapshot:#?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
