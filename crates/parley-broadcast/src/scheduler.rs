// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Broadcast Scheduler: recipient resolution and batch partitioning.

use parley_config::model::BroadcastConfig;
use parley_core::ParleyError;
use parley_core::types::{Broadcast, BroadcastBatch, now_timestamp};
use parley_storage::queries::{batches, broadcasts, directory};
use parley_storage::{Database, RecipientSeed};
use tracing::{debug, info};

/// Parameters of a new broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastRequest {
    pub name: String,
    pub template_name: String,
    pub language: String,
    /// Any-of tag filter. Empty selects every eligible contact.
    pub contact_tags: Vec<String>,
    /// Overrides `broadcast.batch_size` when set.
    pub batch_size: Option<usize>,
}

impl BroadcastRequest {
    pub fn new(name: &str, template_name: &str, language: &str, tags: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            template_name: template_name.to_string(),
            language: language.to_string(),
            contact_tags: tags.iter().map(|t| t.to_string()).collect(),
            batch_size: None,
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }
}

/// A persisted broadcast and its batches in claim order.
#[derive(Debug, Clone)]
pub struct ScheduledBroadcast {
    pub broadcast: Broadcast,
    pub batches: Vec<BroadcastBatch>,
}

/// Creates broadcasts and partitions their recipients.
#[derive(Clone)]
pub struct Scheduler {
    db: Database,
    default_batch_size: usize,
}

impl Scheduler {
    pub fn new(db: Database, config: &BroadcastConfig) -> Self {
        Self {
            db,
            default_batch_size: config.batch_size,
        }
    }

    /// Create a broadcast for every eligible contact.
    ///
    /// Recipients are ordered by contact id and split into batches of at most
    /// the batch size. The broadcast row, with its final `scheduled_count`, is
    /// written before any batch; each batch and its recipients are then written
    /// in one transaction. Fails with [`ParleyError::EmptyRecipientSet`] and
    /// writes nothing when no contact is eligible.
    pub async fn schedule(&self, req: BroadcastRequest) -> Result<ScheduledBroadcast, ParleyError> {
        let batch_size = req.batch_size.unwrap_or(self.default_batch_size).max(1);

        let contacts = directory::eligible_contacts(&self.db, &req.contact_tags).await?;
        if contacts.is_empty() {
            return Err(ParleyError::EmptyRecipientSet { broadcast: req.name });
        }

        let broadcast = Broadcast {
            id: uuid::Uuid::new_v4().to_string(),
            name: req.name,
            template_name: req.template_name,
            language: req.language,
            contact_tags: req.contact_tags,
            scheduled_count: contacts.len() as i64,
            processed_count: 0,
            sent_count: 0,
            delivered_count: 0,
            read_count: 0,
            failed_count: 0,
            replied_count: 0,
            created_at: now_timestamp(),
            cancelled_at: None,
        };
        broadcasts::insert_broadcast(&self.db, &broadcast).await?;

        let mut created = Vec::with_capacity(contacts.len().div_ceil(batch_size));
        for (seq, chunk) in contacts.chunks(batch_size).enumerate() {
            let seeds = chunk
                .iter()
                .map(|c| RecipientSeed {
                    contact_id: c.id,
                    recipient: c.wa_id.clone(),
                })
                .collect();
            let batch = batches::create_batch(&self.db, &broadcast.id, seq as i64, seeds).await?;
            debug!(
                broadcast_id = %broadcast.id,
                batch_id = %batch.id,
                seq,
                size = batch.scheduled_count,
                "batch created"
            );
            created.push(batch);
        }

        info!(
            broadcast_id = %broadcast.id,
            name = %broadcast.name,
            recipients = broadcast.scheduled_count,
            batches = created.len(),
            "broadcast scheduled"
        );

        Ok(ScheduledBroadcast {
            broadcast,
            batches: created,
        })
    }

    /// Cancel a broadcast: stamp `cancelled_at` and cancel every unclaimed
    /// batch. Batches already claimed finish and still count. Returns how
    /// many batches were cancelled.
    pub async fn cancel_broadcast(&self, broadcast_id: &str) -> Result<usize, ParleyError> {
        if broadcasts::get_broadcast(&self.db, broadcast_id).await?.is_none() {
            return Err(ParleyError::NotFound {
                entity: "broadcast",
                id: broadcast_id.to_string(),
            });
        }
        let cancelled = broadcasts::cancel_broadcast(&self.db, broadcast_id, &now_timestamp()).await?;
        for _ in 0..cancelled {
            parley_prometheus::record_batch("cancelled");
        }
        info!(%broadcast_id, cancelled_batches = cancelled, "broadcast cancelled");
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_test_utils::TestHarness;

    #[tokio::test]
    async fn partitions_into_fixed_size_batches() {
        let harness = TestHarness::builder().with_contacts(2500).build().await.unwrap();
        let scheduler = Scheduler::new(harness.db.clone(), &harness.config.broadcast);

        let scheduled = scheduler
            .schedule(BroadcastRequest::new("spring", "spring_sale", "en_US", &["vip"]))
            .await
            .unwrap();

        let sizes: Vec<i64> = scheduled.batches.iter().map(|b| b.scheduled_count).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert_eq!(scheduled.broadcast.scheduled_count, 2500);

        let stored = broadcasts::get_broadcast(&harness.db, &scheduled.broadcast.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.scheduled_count, 2500);
        assert_eq!(stored.sent_count + stored.failed_count, 0);
    }

    #[tokio::test]
    async fn recipients_are_ordered_by_contact_id() {
        let harness = TestHarness::builder().with_contacts(5).build().await.unwrap();
        let scheduled = Scheduler::new(harness.db.clone(), &harness.config.broadcast)
            .schedule(BroadcastRequest::new("s", "t", "en_US", &[]).with_batch_size(2))
            .await
            .unwrap();
        assert_eq!(scheduled.batches.len(), 3);

        let first = parley_storage::queries::recipients::list_for_batch(
            &harness.db,
            &scheduled.batches[0].id,
        )
        .await
        .unwrap();
        let wa_ids: Vec<&str> = first.iter().map(|r| r.recipient.as_str()).collect();
        assert_eq!(wa_ids, vec![TestHarness::wa_id(0), TestHarness::wa_id(1)]);
    }

    #[tokio::test]
    async fn empty_filter_result_writes_nothing() {
        let harness = TestHarness::builder().with_contacts(3).build().await.unwrap();
        let err = Scheduler::new(harness.db.clone(), &harness.config.broadcast)
            .schedule(BroadcastRequest::new("nobody", "t", "en_US", &["no-such-tag"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ParleyError::EmptyRecipientSet { .. }));
        assert!(broadcasts::list_broadcasts(&harness.db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelling_unknown_broadcast_is_not_found() {
        let harness = TestHarness::builder().build().await.unwrap();
        let err = Scheduler::new(harness.db.clone(), &harness.config.broadcast)
            .cancel_broadcast("missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::NotFound { .. }));
    }
}
