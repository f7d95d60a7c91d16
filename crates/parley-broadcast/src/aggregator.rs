// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Counter Aggregator: the only writer of broadcast counters outside the
//! storage transactions that pair a counter with a per-recipient stamp.

use parley_core::ParleyError;
use parley_core::types::{Broadcast, Counter};
use parley_storage::Database;
use parley_storage::queries::{broadcasts, counters};

/// Atomic increments over broadcast-level counters.
///
/// Callers own idempotency: an increment is applied every time it is called.
#[derive(Clone)]
pub struct Aggregator {
    db: Database,
}

impl Aggregator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Add `delta` to one counter in a single conditional statement.
    ///
    /// Returns `false` when the increment would push the counter past the
    /// broadcast's `scheduled` ceiling; the row is then left unchanged.
    pub async fn increment(
        &self,
        broadcast_id: &str,
        counter: Counter,
        delta: u32,
    ) -> Result<bool, ParleyError> {
        counters::increment(&self.db, broadcast_id, counter, delta).await
    }

    /// Current counter values for a broadcast.
    pub async fn snapshot(&self, broadcast_id: &str) -> Result<Broadcast, ParleyError> {
        broadcasts::get_broadcast(&self.db, broadcast_id)
            .await?
            .ok_or_else(|| ParleyError::NotFound {
                entity: "broadcast",
                id: broadcast_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{BroadcastRequest, Scheduler};
    use parley_test_utils::TestHarness;

    #[tokio::test]
    async fn increments_until_ceiling() {
        let harness = TestHarness::builder().with_contacts(2).build().await.unwrap();
        let scheduled = Scheduler::new(harness.db.clone(), &harness.config.broadcast)
            .schedule(BroadcastRequest::new("promo", "spring_sale", "en_US", &["vip"]))
            .await
            .unwrap();
        let id = scheduled.broadcast.id;

        let agg = Aggregator::new(harness.db.clone());
        assert!(agg.increment(&id, Counter::Delivered, 2).await.unwrap());
        assert!(!agg.increment(&id, Counter::Delivered, 1).await.unwrap());

        let snap = agg.snapshot(&id).await.unwrap();
        assert_eq!(snap.delivered_count, 2);
        assert_eq!(snap.scheduled_count, 2);
    }

    #[tokio::test]
    async fn snapshot_of_missing_broadcast() {
        let harness = TestHarness::builder().build().await.unwrap();
        let err = Aggregator::new(harness.db.clone())
            .snapshot("nope")
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::NotFound { entity: "broadcast", .. }));
    }
}
