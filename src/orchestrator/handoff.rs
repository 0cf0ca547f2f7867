//! Handoff background tasks
//!
//! These tasks run outside the orchestrator loop and report back through the
//! command channel, tagged with the pairing epoch they were started for.
//! The loop aborts them when the pairing changes; they also exit as soon as
//! the orchestrator starts closing.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::orchestrator::OrchestratorHandle;
use crate::session::AgentSession;

/// Timing for the friendship wait
#[derive(Debug, Clone, Copy)]
pub(crate) struct FriendshipPolling {
    pub poll: Duration,
    pub resend: Duration,
}

/// Poll the giver's friends list until the collector shows up, then post
/// `FriendshipEstablished`. The collector's friend request is sent again
/// every `resend` while the relation is missing. There is no overall timeout.
pub(crate) fn spawn_friendship_wait(
    fleet: OrchestratorHandle,
    epoch: u64,
    collector: Arc<dyn AgentSession>,
    giver: Arc<dyn AgentSession>,
    timing: FriendshipPolling,
    mut closing: watch::Receiver<bool>,
) -> AbortHandle {
    let task = tokio::spawn(async move {
        let collector_id = collector.account_id();
        let giver_id = giver.account_id();

        let mut tick = tokio::time::interval(timing.poll);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut resend = tokio::time::interval_at(Instant::now() + timing.resend, timing.resend);
        resend.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match giver.is_friend(collector_id).await {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(e) => warn!(epoch, collector = %collector_id, error = %e, "friend relation query failed"),
                    }
                }
                _ = resend.tick() => {
                    debug!(epoch, collector = %collector_id, giver = %giver_id, "re-sending friend request");
                    if let Err(e) = collector.add_friend(giver_id).await {
                        warn!(epoch, collector = %collector_id, giver = %giver_id, error = %e, "friend request failed");
                    }
                }
                changed = closing.changed() => {
                    if changed.is_err() || *closing.borrow() {
                        debug!(epoch, "friendship wait cancelled");
                        return;
                    }
                }
            }
        }

        debug!(epoch, collector = %collector_id, "friend relation confirmed");
        if fleet.friendship_established(epoch).await.is_err() {
            debug!(epoch, "orchestrator gone before friendship was reported");
        }
    });
    task.abort_handle()
}

/// Post `TradeTimedOut` if the trade for `epoch` hasn't finished in time
pub(crate) fn spawn_trade_timer(
    fleet: OrchestratorHandle,
    epoch: u64,
    timeout: Duration,
    mut closing: watch::Receiver<bool>,
) -> AbortHandle {
    let task = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                if fleet.trade_timed_out(epoch).await.is_err() {
                    debug!(epoch, "orchestrator gone before trade timeout was reported");
                }
            }
            _ = async { let _ = closing.wait_for(|closed| *closed).await; } => {}
        }
    });
    task.abort_handle()
}

/// After `delay`, ask each session to report readiness again so the loop
/// re-evaluates a pair whose last evaluation hit a session error.
pub(crate) fn spawn_reevaluation(
    sessions: Vec<Arc<dyn AgentSession>>,
    delay: Duration,
    mut closing: watch::Receiver<bool>,
) -> AbortHandle {
    let task = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                for session in &sessions {
                    session.request_report().await;
                }
            }
            _ = async { let _ = closing.wait_for(|closed| *closed).await; } => {}
        }
    });
    task.abort_handle()
}
