//! Role handlers - per-role reaction to session events
//!
//! The runtime delivers service events (login, incoming offers, friend
//! requests, chat) to the handler it was given at launch. The set of roles
//! is closed; `handler_for` picks the implementation.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::context::AgentContext;
use crate::config::{MaintenanceSettings, Role};
use crate::session::{AccountId, AgentSession, OfferDecision, TradeOffer};

/// Capabilities every role handler provides to the runtime
#[async_trait]
pub trait RoleHandler: Send + Sync {
    fn role(&self) -> Role;

    /// Login finished: run housekeeping, then report ready
    async fn on_login_completed(&self, session: &dyn AgentSession);

    /// Decide on an incoming trade offer
    async fn on_trade_offer(&self, offer: &TradeOffer) -> OfferDecision;

    /// The runtime accepted an offer this handler approved
    async fn on_offer_accepted(&self, offer: &TradeOffer, trade_id: &str);

    /// Decide on an incoming friend request
    async fn on_friend_add(&self, sender: AccountId) -> bool;

    /// A friend request sent by or to this agent went through
    async fn on_friend_accepted(&self, session: &dyn AgentSession, friend: AccountId);

    async fn on_message(&self, session: &dyn AgentSession, sender: AccountId, message: &str);

    fn on_group_invite(&self) -> bool {
        false
    }

    /// Live (non-offer) trade requests are never used
    fn on_trade_request(&self, _sender: AccountId) -> bool {
        false
    }
}

/// Build the handler for `role`
pub fn handler_for(
    role: Role,
    context: AgentContext,
    maintenance: MaintenanceSettings,
) -> Arc<dyn RoleHandler> {
    let core = HandlerCore {
        context,
        maintenance,
    };
    match role {
        Role::Collector => Arc::new(CollectorHandler { core }),
        Role::Giver => Arc::new(GiverHandler { core }),
    }
}

struct HandlerCore {
    context: AgentContext,
    maintenance: MaintenanceSettings,
}

impl HandlerCore {
    async fn login_sequence(&self, session: &dyn AgentSession) {
        for task in self.maintenance.tasks() {
            if let Err(e) = session.run_maintenance(task.clone()).await {
                warn!(agent = %self.context.name(), ?task, error = %e, "maintenance task failed");
            }
        }

        debug!(agent = %self.context.name(), "logged in, reporting to orchestrator");
        if let Err(e) = self.context.report_ready().await {
            warn!(agent = %self.context.name(), error = %e, "failed to report ready");
        }
    }

    async fn decide_offer(&self, offer: &TradeOffer) -> OfferDecision {
        if self.context.trusts(offer.sender).await {
            OfferDecision::Accept
        } else {
            info!(
                agent = %self.context.name(),
                offer_id = %offer.offer_id,
                sender = %offer.sender,
                "declining trade offer from untrusted user"
            );
            OfferDecision::Decline
        }
    }

    async fn reply(&self, session: &dyn AgentSession, to: AccountId) {
        let Some(response) = self.context.config().chat_response.as_deref() else {
            return;
        };
        if let Err(e) = session.send_message(to, response).await {
            warn!(agent = %self.context.name(), %to, error = %e, "failed to send chat response");
        }
    }

    async fn answer_message(&self, session: &dyn AgentSession, sender: AccountId, message: &str) {
        debug!(agent = %self.context.name(), %sender, text = message, "chat message");
        if !self.context.is_admin(sender) {
            self.reply(session, sender).await;
        }
    }
}

/// Receives items; its trades drive the handoff forward
pub struct CollectorHandler {
    core: HandlerCore,
}

#[async_trait]
impl RoleHandler for CollectorHandler {
    fn role(&self) -> Role {
        Role::Collector
    }

    async fn on_login_completed(&self, session: &dyn AgentSession) {
        self.core.login_sequence(session).await;
    }

    async fn on_trade_offer(&self, offer: &TradeOffer) -> OfferDecision {
        self.core.decide_offer(offer).await
    }

    async fn on_offer_accepted(&self, offer: &TradeOffer, trade_id: &str) {
        info!(
            agent = %self.core.context.name(),
            trade_id,
            items = offer.items_to_receive,
            "accepted trade offer"
        );
        if let Err(e) = self.core.context.report_trade_success().await {
            warn!(agent = %self.core.context.name(), error = %e, "failed to report trade success");
        }
    }

    async fn on_friend_add(&self, sender: AccountId) -> bool {
        self.core.context.trusts(sender).await
    }

    async fn on_friend_accepted(&self, _session: &dyn AgentSession, friend: AccountId) {
        debug!(agent = %self.core.context.name(), %friend, "friend accepted");
    }

    async fn on_message(&self, session: &dyn AgentSession, sender: AccountId, message: &str) {
        self.core.answer_message(session, sender, message).await;
    }
}

/// Sends its tradable items to the active collector
pub struct GiverHandler {
    core: HandlerCore,
}

#[async_trait]
impl RoleHandler for GiverHandler {
    fn role(&self) -> Role {
        Role::Giver
    }

    async fn on_login_completed(&self, session: &dyn AgentSession) {
        self.core.login_sequence(session).await;
    }

    async fn on_trade_offer(&self, offer: &TradeOffer) -> OfferDecision {
        info!(agent = %self.core.context.name(), sender = %offer.sender, "received a trade offer");
        self.core.decide_offer(offer).await
    }

    async fn on_offer_accepted(&self, _offer: &TradeOffer, trade_id: &str) {
        info!(agent = %self.core.context.name(), trade_id, "accepted trade offer");
    }

    /// Approvals granted during pairing make the collector a trusted sender
    async fn on_friend_add(&self, sender: AccountId) -> bool {
        let approved = self.core.context.trusts(sender).await;
        debug!(agent = %self.core.context.name(), %sender, approved, "friend request");
        approved
    }

    async fn on_friend_accepted(&self, session: &dyn AgentSession, friend: AccountId) {
        // The service drops messages sent right after the friendship forms
        let grace = self.core.context.config().friend_accept_grace;
        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }
        self.core.reply(session, friend).await;
    }

    async fn on_message(&self, session: &dyn AgentSession, sender: AccountId, message: &str) {
        self.core.answer_message(session, sender, message).await;
    }
}
