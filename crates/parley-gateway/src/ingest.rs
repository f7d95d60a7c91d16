// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Routing of parsed webhook events into the core.
//!
//! Statuses go to the reconciler, customer messages to the conversation
//! state machine, echoes to the auto-mute handler. Only storage failures
//! abort a delivery, so the provider retries the whole notification; every
//! step is safe to repeat.

use parley_broadcast::{EchoEvent, EchoHandler, ReconcileReport, Reconciler};
use parley_conversation::{ConversationService, InboundEvent};
use parley_core::ParleyError;
use parley_core::types::format_timestamp;
use parley_storage::queries::{directory, messages};
use parley_storage::{Database, InboundRecord, MessageDirection, NewContact, NewMessage};
use parley_whatsapp::{InboundMessage, WebhookEvents};
use tracing::{debug, info, warn};

/// What one notification did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub statuses: ReconcileReport,
    /// Customer messages recorded for the first time.
    pub inbound: usize,
    /// Customer messages seen before or for unknown numbers.
    pub inbound_skipped: usize,
    pub handovers_requested: usize,
    pub echo_mutes: usize,
}

/// Applies webhook events.
#[derive(Clone)]
pub struct WebhookProcessor {
    db: Database,
    reconciler: Reconciler,
    conversations: ConversationService,
    echo: EchoHandler,
}

impl WebhookProcessor {
    pub fn new(
        db: Database,
        reconciler: Reconciler,
        conversations: ConversationService,
        echo: EchoHandler,
    ) -> Self {
        Self {
            db,
            reconciler,
            conversations,
            echo,
        }
    }

    pub fn conversations(&self) -> &ConversationService {
        &self.conversations
    }

    pub async fn process(&self, events: &WebhookEvents) -> Result<IngestReport, ParleyError> {
        let mut report = IngestReport {
            statuses: self.reconciler.apply_all(&events.statuses).await?,
            ..IngestReport::default()
        };

        for message in &events.inbound {
            match self.process_inbound(message).await? {
                Some(handover_requested) => {
                    report.inbound += 1;
                    if handover_requested {
                        report.handovers_requested += 1;
                    }
                }
                None => report.inbound_skipped += 1,
            }
        }

        for echo in &events.echoes {
            let event = EchoEvent {
                wa_phone_number_id: echo.phone_number_id.clone(),
                contact_wa_id: echo.to.clone(),
                at: echo.at,
            };
            if self.echo.handle(&event).await?.is_some() {
                report.echo_mutes += 1;
            }
        }

        Ok(report)
    }

    /// Returns `Some(handover_requested)` when the message was recorded,
    /// `None` when it was skipped.
    async fn process_inbound(&self, message: &InboundMessage) -> Result<Option<bool>, ParleyError> {
        if messages::find_by_wam_id(&self.db, &message.message_id)
            .await?
            .is_some()
        {
            debug!(message_id = %message.message_id, "inbound message redelivered");
            return Ok(None);
        }

        let Some(phone) = directory::find_phone_number(&self.db, &message.phone_number_id).await?
        else {
            warn!(
                wa_phone_number_id = %message.phone_number_id,
                "inbound message for unknown phone number"
            );
            return Ok(None);
        };

        let contact_id = match directory::find_contact(&self.db, &phone.tenant_id, &message.from)
            .await?
        {
            Some(contact) => contact.id,
            None => {
                let id = directory::insert_contact(
                    &self.db,
                    &NewContact {
                        tenant_id: phone.tenant_id.clone(),
                        wa_id: message.from.clone(),
                        phone_number_id: Some(phone.id.clone()),
                        tags: Vec::new(),
                        opted_out: false,
                    },
                )
                .await?;
                info!(contact_id = id, tenant_id = %phone.tenant_id, "new contact registered");
                id
            }
        };

        let outcome = self
            .conversations
            .handle_inbound(InboundEvent {
                contact_id,
                tenant_id: phone.tenant_id.clone(),
                phone_number_id: Some(phone.id.clone()),
                text: message.text.clone(),
                at: message.at,
            })
            .await?;

        let stored = NewMessage {
            contact_id,
            conversation_id: Some(outcome.conversation.id.clone()),
            wam_id: message.message_id.clone(),
            direction: MessageDirection::Inbound,
            body: message.raw.to_string(),
            sent_at: Some(format_timestamp(message.at)),
        };
        if self.reconciler.record_inbound(&stored, message.at).await? == InboundRecord::Duplicate {
            debug!(message_id = %message.message_id, "inbound message recorded concurrently");
            return Ok(None);
        }

        debug!(
            conversation_id = %outcome.conversation.id,
            mode = %outcome.conversation.mode,
            bot_may_reply = outcome.bot_may_reply,
            "inbound message recorded"
        );
        Ok(Some(outcome.handover_requested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use parley_core::types::{ConversationMode, DeliveryStatus, StatusEntry};
    use parley_broadcast::{BroadcastRequest, Dispatcher, Scheduler};
    use parley_storage::queries::{broadcasts, conversations};
    use parley_test_utils::TestHarness;
    use tokio_util::sync::CancellationToken;
    use parley_test_utils::harness::{TENANT_ID, WA_PHONE_NUMBER_ID};
    use parley_whatsapp::EchoMessage;

    fn processor(harness: &TestHarness) -> WebhookProcessor {
        WebhookProcessor::new(
            harness.db.clone(),
            Reconciler::new(harness.db.clone()),
            ConversationService::from_config(harness.db.clone(), &harness.config.handover)
                .unwrap(),
            EchoHandler::new(harness.db.clone(), &harness.config.handover),
        )
    }

    fn inbound(from: &str, id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            phone_number_id: WA_PHONE_NUMBER_ID.to_string(),
            from: from.to_string(),
            message_id: id.to_string(),
            text: Some(text.to_string()),
            at: Utc::now(),
            raw: serde_json::json!({"type": "text", "text": {"body": text}}),
        }
    }

    #[tokio::test]
    async fn inbound_registers_contact_and_opens_conversation() {
        let harness = TestHarness::builder().build().await.unwrap();
        let processor = processor(&harness);

        let events = WebhookEvents {
            inbound: vec![inbound("15550123", "wamid.IN1", "hello")],
            ..WebhookEvents::default()
        };
        let report = processor.process(&events).await.unwrap();
        assert_eq!(report.inbound, 1);
        assert_eq!(report.handovers_requested, 0);

        let contact = directory::find_contact(&harness.db, TENANT_ID, "15550123")
            .await
            .unwrap()
            .unwrap();
        let live = conversations::get_active(&harness.db, contact.id, TENANT_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live.mode, ConversationMode::Bot);

        let stored = messages::find_by_wam_id(&harness.db, "wamid.IN1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.conversation_id.as_deref(), Some(live.id.as_str()));
        assert_eq!(stored.direction, MessageDirection::Inbound);
    }

    #[tokio::test]
    async fn redelivered_inbound_is_recorded_once() {
        let harness = TestHarness::builder().build().await.unwrap();
        let processor = processor(&harness);
        let events = WebhookEvents {
            inbound: vec![inbound("15550123", "wamid.IN1", "talk to a person")],
            ..WebhookEvents::default()
        };

        let first = processor.process(&events).await.unwrap();
        assert_eq!(first.handovers_requested, 1);
        let second = processor.process(&events).await.unwrap();
        assert_eq!(second.inbound, 0);
        assert_eq!(second.inbound_skipped, 1);
    }

    #[tokio::test]
    async fn reply_lost_to_a_failed_write_is_counted_on_redelivery() {
        let harness = TestHarness::builder().with_contacts(1).build().await.unwrap();
        let broadcast_id = Scheduler::new(harness.db.clone(), &harness.config.broadcast)
            .schedule(BroadcastRequest::new("promo", "spring_sale", "en_US", &["vip"]))
            .await
            .unwrap()
            .broadcast
            .id;
        Dispatcher::new(
            harness.db.clone(),
            harness.sender.clone(),
            &harness.config.broadcast,
        )
        .dispatch_broadcast(&broadcast_id, &CancellationToken::new())
        .await
        .unwrap();

        harness
            .db
            .connection()
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TEMP TRIGGER reply_write_fails
                     BEFORE UPDATE OF reply_counted ON broadcast_contacts
                     BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
                )
            })
            .await
            .unwrap();

        let processor = processor(&harness);
        let events = WebhookEvents {
            inbound: vec![inbound(&TestHarness::wa_id(0), "wamid.R1", "thanks!")],
            ..WebhookEvents::default()
        };
        let err = processor.process(&events).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(
            messages::find_by_wam_id(&harness.db, "wamid.R1")
                .await
                .unwrap()
                .is_none()
        );

        harness
            .db
            .connection()
            .call(|conn| conn.execute_batch("DROP TRIGGER reply_write_fails"))
            .await
            .unwrap();

        let report = processor.process(&events).await.unwrap();
        assert_eq!(report.inbound, 1);
        let b = broadcasts::get_broadcast(&harness.db, &broadcast_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b.replied_count, 1);

        processor.process(&events).await.unwrap();
        let b = broadcasts::get_broadcast(&harness.db, &broadcast_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b.replied_count, 1);
    }

    #[tokio::test]
    async fn unknown_phone_number_is_skipped() {
        let harness = TestHarness::builder().build().await.unwrap();
        let mut message = inbound("15550123", "wamid.IN1", "hi");
        message.phone_number_id = "999".to_string();

        let report = processor(&harness)
            .process(&WebhookEvents {
                inbound: vec![message],
                ..WebhookEvents::default()
            })
            .await
            .unwrap();
        assert_eq!(report.inbound_skipped, 1);
        assert!(
            directory::find_contact(&harness.db, TENANT_ID, "15550123")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn echo_mutes_and_unknown_status_is_absorbed() {
        let harness = TestHarness::builder().build().await.unwrap();
        let contact = harness.add_contact("15550123", &[]).await.unwrap();
        let at = Utc::now();

        let events = WebhookEvents {
            statuses: vec![StatusEntry {
                message_id: "wamid.NOPE".to_string(),
                status: DeliveryStatus::Delivered,
                timestamp: format_timestamp(at),
            }],
            inbound: Vec::new(),
            echoes: vec![EchoMessage {
                phone_number_id: WA_PHONE_NUMBER_ID.to_string(),
                to: "15550123".to_string(),
                message_id: "wamid.ECHO".to_string(),
                at,
            }],
        };
        let report = processor(&harness).process(&events).await.unwrap();
        assert_eq!(report.statuses.unknown, 1);
        assert_eq!(report.echo_mutes, 1);

        let live = conversations::get_active(&harness.db, contact, TENANT_ID)
            .await
            .unwrap()
            .unwrap();
        assert!(live.is_muted_at(at + Duration::seconds(60)));
        assert!(!live.bot_may_reply(at + Duration::seconds(60)));
    }
}
