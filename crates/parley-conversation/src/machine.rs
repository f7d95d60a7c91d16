// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation state machine.
//!
//! ```text
//! bot --request--> handover_pending --claim--> human --close--> closed
//!  ^                      |                                       |
//!  +----timeout_return----+              new inbound: fresh bot row
//! ```
//!
//! Every transition is a guarded update on the expected `from` mode with its
//! handover event written first in the same transaction. A concurrent loser
//! gets [`ParleyError::InvalidTransition`] and nothing is written.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parley_config::model::HandoverConfig;
use parley_core::ParleyError;
use parley_core::types::{
    Actor, Conversation, ConversationMode, HandoverAction, HandoverEvent, format_timestamp,
    timestamp_after,
};
use parley_storage::queries::{conversations, handover};
use parley_storage::{Database, InboundTouch, ModeChange};
use tracing::{debug, info, warn};

use crate::intent::{HandoverIntent, PhraseIntent};

/// An inbound user message as seen by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub contact_id: i64,
    pub tenant_id: String,
    pub phone_number_id: Option<String>,
    /// Message text, if the message has any.
    pub text: Option<String>,
    pub at: DateTime<Utc>,
}

/// Result of handling an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundOutcome {
    pub conversation: Conversation,
    /// Set when a closed conversation was replaced by a fresh one.
    pub previous_id: Option<String>,
    /// Whether this message moved the conversation to `handover_pending`.
    pub handover_requested: bool,
    /// Whether the bot engine may auto-reply to this message.
    pub bot_may_reply: bool,
}

/// Drives conversation modes.
#[derive(Clone)]
pub struct ConversationService {
    db: Database,
    intent: Arc<dyn HandoverIntent>,
    session_window_secs: i64,
    pending_timeout: Duration,
}

impl ConversationService {
    pub fn new(db: Database, intent: Arc<dyn HandoverIntent>, config: &HandoverConfig) -> Self {
        Self {
            db,
            intent,
            session_window_secs: config.session_window_secs,
            pending_timeout: Duration::from_secs(config.pending_timeout_secs),
        }
    }

    /// Build with the phrase/regex matcher from config.
    pub fn from_config(db: Database, config: &HandoverConfig) -> Result<Self, ParleyError> {
        let intent = PhraseIntent::from_config(config)?;
        Ok(Self::new(db, Arc::new(intent), config))
    }

    pub fn pending_timeout(&self) -> Duration {
        self.pending_timeout
    }

    /// Record an inbound user message.
    ///
    /// Opens a conversation if none is live, replaces a closed one, extends
    /// the session window, and requests a handover when a `bot` conversation
    /// receives text matching the handover intent.
    pub async fn handle_inbound(&self, event: InboundEvent) -> Result<InboundOutcome, ParleyError> {
        let at = format_timestamp(event.at);
        let touched = conversations::touch_inbound(
            &self.db,
            InboundTouch {
                contact_id: event.contact_id,
                tenant_id: event.tenant_id.clone(),
                phone_number_id: event.phone_number_id.clone(),
                at: at.clone(),
                session_expires_at: timestamp_after(event.at, self.session_window_secs),
            },
        )
        .await?;
        if let Some(previous) = &touched.previous_id {
            info!(
                previous_id = %previous,
                conversation_id = %touched.conversation.id,
                "closed conversation reopened as bot"
            );
        }

        let mut conversation = touched.conversation;
        let mut handover_requested = false;
        let wants_human = event
            .text
            .as_deref()
            .is_some_and(|text| self.intent.matches(text));
        if conversation.mode == ConversationMode::Bot && wants_human {
            match self
                .transition(
                    &conversation.id,
                    ConversationMode::Bot,
                    ConversationMode::HandoverPending,
                    HandoverAction::Request,
                    Actor::Bot,
                    None,
                    &at,
                )
                .await
            {
                Ok(updated) => {
                    conversation = updated;
                    handover_requested = true;
                }
                Err(ParleyError::InvalidTransition { .. }) => {
                    debug!(conversation_id = %conversation.id, "handover already moved on");
                    conversation = self.get(&conversation.id).await?;
                }
                Err(e) => return Err(e),
            }
        }

        let bot_may_reply = conversation.bot_may_reply(event.at);
        Ok(InboundOutcome {
            conversation,
            previous_id: touched.previous_id,
            handover_requested,
            bot_may_reply,
        })
    }

    /// `bot -> handover_pending`.
    pub async fn request_handover(
        &self,
        conversation_id: &str,
        actor: Actor,
    ) -> Result<Conversation, ParleyError> {
        self.transition(
            conversation_id,
            ConversationMode::Bot,
            ConversationMode::HandoverPending,
            HandoverAction::Request,
            actor,
            None,
            &now(),
        )
        .await
    }

    /// `handover_pending -> human`, assigning the agent.
    pub async fn claim(
        &self,
        conversation_id: &str,
        agent_id: &str,
        agent_label: &str,
    ) -> Result<Conversation, ParleyError> {
        self.transition(
            conversation_id,
            ConversationMode::HandoverPending,
            ConversationMode::Human,
            HandoverAction::Claim,
            Actor::agent(agent_id, agent_label),
            Some(agent_label.to_string()),
            &now(),
        )
        .await
    }

    /// `human -> closed`.
    pub async fn close(&self, conversation_id: &str, actor: Actor) -> Result<Conversation, ParleyError> {
        self.transition(
            conversation_id,
            ConversationMode::Human,
            ConversationMode::Closed,
            HandoverAction::Close,
            actor,
            None,
            &now(),
        )
        .await
    }

    /// `handover_pending -> bot` after the claim window lapsed.
    pub async fn expire_pending(&self, conversation_id: &str) -> Result<Conversation, ParleyError> {
        self.transition(
            conversation_id,
            ConversationMode::HandoverPending,
            ConversationMode::Bot,
            HandoverAction::TimeoutReturn,
            Actor::System,
            None,
            &now(),
        )
        .await
    }

    /// Return every pending handover older than the timeout to the bot.
    ///
    /// Conversations claimed in the meantime are left alone. Returns how many
    /// were returned.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, ParleyError> {
        let timeout = chrono::Duration::from_std(self.pending_timeout)
            .map_err(|e| ParleyError::Internal(format!("pending timeout out of range: {e}")))?;
        let cutoff = format_timestamp(now - timeout);

        let mut returned = 0;
        for id in conversations::list_stale_pending(&self.db, &cutoff).await? {
            match self.expire_pending(&id).await {
                Ok(_) => returned += 1,
                Err(ParleyError::InvalidTransition { .. }) => {
                    debug!(conversation_id = %id, "pending handover claimed before expiry");
                }
                Err(e) => return Err(e),
            }
        }
        if returned > 0 {
            info!(returned, "timed-out handovers returned to bot");
        }
        Ok(returned)
    }

    /// Stamp `last_agent_msg_at` on a live conversation.
    pub async fn record_agent_message(
        &self,
        conversation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ParleyError> {
        if conversations::record_agent_message(&self.db, conversation_id, &format_timestamp(at))
            .await?
        {
            Ok(())
        } else {
            Err(not_found(conversation_id))
        }
    }

    /// Persist the opaque bot-flow state unchanged.
    pub async fn save_flow_state(
        &self,
        conversation_id: &str,
        flow_state: Option<Vec<u8>>,
    ) -> Result<(), ParleyError> {
        if conversations::save_flow_state(&self.db, conversation_id, flow_state).await? {
            Ok(())
        } else {
            Err(not_found(conversation_id))
        }
    }

    /// The stored bot-flow state, byte for byte.
    pub async fn flow_state(&self, conversation_id: &str) -> Result<Option<Vec<u8>>, ParleyError> {
        Ok(self.get(conversation_id).await?.flow_state)
    }

    pub async fn get(&self, conversation_id: &str) -> Result<Conversation, ParleyError> {
        conversations::get_conversation(&self.db, conversation_id)
            .await?
            .ok_or_else(|| not_found(conversation_id))
    }

    /// The handover audit log, oldest first.
    pub async fn events(&self, conversation_id: &str) -> Result<Vec<HandoverEvent>, ParleyError> {
        handover::list_events(&self.db, conversation_id).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn transition(
        &self,
        conversation_id: &str,
        from: ConversationMode,
        to: ConversationMode,
        action: HandoverAction,
        actor: Actor,
        assigned_to_label: Option<String>,
        at: &str,
    ) -> Result<Conversation, ParleyError> {
        let result = conversations::change_mode(
            &self.db,
            conversation_id,
            ModeChange {
                from,
                to,
                action,
                actor,
                assigned_to_label,
                at: at.to_string(),
            },
        )
        .await;

        match &result {
            Ok(_) => {
                parley_prometheus::record_handover(&action.to_string());
                info!(conversation_id, %from, %to, %action, "conversation transitioned");
            }
            Err(ParleyError::InvalidTransition { mode, .. }) => {
                warn!(conversation_id, %mode, %action, "invalid transition rejected");
            }
            Err(_) => {}
        }
        result
    }
}

fn now() -> String {
    format_timestamp(Utc::now())
}

fn not_found(conversation_id: &str) -> ParleyError {
    ParleyError::NotFound {
        entity: "conversation",
        id: conversation_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::parse_timestamp;
    use parley_test_utils::TestHarness;
    use parley_test_utils::harness::{PHONE_ID, TENANT_ID};

    async fn setup() -> (TestHarness, ConversationService, i64) {
        let harness = TestHarness::builder().build().await.unwrap();
        let contact = harness.add_contact("15550100", &[]).await.unwrap();
        let service =
            ConversationService::from_config(harness.db.clone(), &harness.config.handover).unwrap();
        (harness, service, contact)
    }

    fn inbound(contact_id: i64, text: &str) -> InboundEvent {
        InboundEvent {
            contact_id,
            tenant_id: TENANT_ID.to_string(),
            phone_number_id: Some(PHONE_ID.to_string()),
            text: Some(text.to_string()),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn first_inbound_opens_bot_conversation_with_session() {
        let (_h, service, contact) = setup().await;
        let event = inbound(contact, "hello");
        let outcome = service.handle_inbound(event.clone()).await.unwrap();

        assert_eq!(outcome.conversation.mode, ConversationMode::Bot);
        assert!(outcome.bot_may_reply);
        assert!(!outcome.handover_requested);
        assert!(outcome.previous_id.is_none());

        let expires = parse_timestamp(outcome.conversation.session_expires_at.as_deref().unwrap())
            .unwrap();
        assert_eq!((expires - event.at).num_seconds(), 86_400);
        assert!(outcome.conversation.last_user_msg_at.is_some());
    }

    #[tokio::test]
    async fn intent_requests_handover_and_silences_bot() {
        let (_h, service, contact) = setup().await;
        let outcome = service
            .handle_inbound(inbound(contact, "I want to talk to a person"))
            .await
            .unwrap();
        assert!(outcome.handover_requested);
        assert_eq!(outcome.conversation.mode, ConversationMode::HandoverPending);
        assert!(!outcome.bot_may_reply);

        let events = service.events(&outcome.conversation.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, HandoverAction::Request);
        assert_eq!(events[0].actor, Actor::Bot);

        // A second request while pending is not a new event.
        let again = service
            .handle_inbound(inbound(contact, "human please"))
            .await
            .unwrap();
        assert!(!again.handover_requested);
        assert_eq!(service.events(&outcome.conversation.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn full_lifecycle_and_reopen() {
        let (_h, service, contact) = setup().await;
        let conv = service.handle_inbound(inbound(contact, "hi")).await.unwrap().conversation;

        service.request_handover(&conv.id, Actor::Bot).await.unwrap();
        let human = service.claim(&conv.id, "agent-7", "Dana").await.unwrap();
        assert_eq!(human.mode, ConversationMode::Human);
        assert_eq!(human.assigned_to_label.as_deref(), Some("Dana"));

        let closed = service
            .close(&conv.id, Actor::agent("agent-7", "Dana"))
            .await
            .unwrap();
        assert_eq!(closed.mode, ConversationMode::Closed);

        let reopened = service.handle_inbound(inbound(contact, "one more thing")).await.unwrap();
        assert_eq!(reopened.conversation.mode, ConversationMode::Bot);
        assert_ne!(reopened.conversation.id, conv.id);
        assert_eq!(reopened.previous_id.as_deref(), Some(conv.id.as_str()));

        let actions: Vec<HandoverAction> = service
            .events(&conv.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(
            actions,
            vec![HandoverAction::Request, HandoverAction::Claim, HandoverAction::Close]
        );
        assert!(service.events(&reopened.conversation.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn request_on_human_is_rejected_without_event() {
        let (_h, service, contact) = setup().await;
        let conv = service.handle_inbound(inbound(contact, "hi")).await.unwrap().conversation;
        service.request_handover(&conv.id, Actor::Bot).await.unwrap();
        service.claim(&conv.id, "a1", "Sam").await.unwrap();

        let err = service.request_handover(&conv.id, Actor::Bot).await.unwrap_err();
        assert!(matches!(err, ParleyError::InvalidTransition { .. }));
        assert_eq!(service.events(&conv.id).await.unwrap().len(), 2);
        assert_eq!(service.get(&conv.id).await.unwrap().mode, ConversationMode::Human);

        let err = service.claim("missing", "a1", "Sam").await.unwrap_err();
        assert!(matches!(err, ParleyError::NotFound { .. }));
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let (_h, service, contact) = setup().await;
        let conv = service.handle_inbound(inbound(contact, "agent")).await.unwrap().conversation;

        let (a, b) = tokio::join!(
            service.claim(&conv.id, "a1", "Sam"),
            service.claim(&conv.id, "a2", "Kim")
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let claims = service
            .events(&conv.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.action == HandoverAction::Claim)
            .count();
        assert_eq!(claims, 1);
    }

    #[tokio::test]
    async fn sweep_returns_stale_pending_to_bot() {
        let (_h, service, contact) = setup().await;
        let conv = service.handle_inbound(inbound(contact, "agent")).await.unwrap().conversation;

        assert_eq!(service.sweep_expired(Utc::now()).await.unwrap(), 0);
        let later = Utc::now() + chrono::Duration::seconds(901);
        assert_eq!(service.sweep_expired(later).await.unwrap(), 1);

        let back = service.get(&conv.id).await.unwrap();
        assert_eq!(back.mode, ConversationMode::Bot);
        let last = service.events(&conv.id).await.unwrap().pop().unwrap();
        assert_eq!(last.action, HandoverAction::TimeoutReturn);
        assert_eq!(last.actor, Actor::System);
    }

    #[tokio::test]
    async fn flow_state_round_trips_byte_for_byte() {
        let (_h, service, contact) = setup().await;
        let conv = service.handle_inbound(inbound(contact, "hi")).await.unwrap().conversation;
        let blob = vec![0u8, 159, 146, 150, 255, 0, 7];

        service.save_flow_state(&conv.id, Some(blob.clone())).await.unwrap();
        assert_eq!(service.flow_state(&conv.id).await.unwrap(), Some(blob));

        service.save_flow_state(&conv.id, None).await.unwrap();
        assert_eq!(service.flow_state(&conv.id).await.unwrap(), None);

        service.record_agent_message(&conv.id, Utc::now()).await.unwrap();
        assert!(service.get(&conv.id).await.unwrap().last_agent_msg_at.is_some());
    }
}
