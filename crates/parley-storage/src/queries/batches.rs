// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Broadcast batch creation and the claim work-queue.
//!
//! A batch moves `unclaimed -> claimed -> done`, or `unclaimed -> cancelled`.
//! The claim is a compare-and-swap on `status`, so any number of dispatch
//! workers, in any number of processes, can share one database.
//!
//! Each claim stamps a fresh `claim_token`. The holder renews its lease with
//! [`renew_lease`] and finishes with [`mark_done`]; both only apply while the
//! token still matches, so a worker whose lease expired and was reclaimed
//! loses the batch for good.

use parley_core::ParleyError;
use parley_core::types::now_timestamp;
use rusqlite::{OptionalExtension, params};
use tracing::debug;

use crate::database::Database;
use crate::models::{BroadcastBatch, RecipientSeed};
use crate::queries::parse_column;

const BATCH_COLUMNS: &str = "id, broadcast_id, status, scheduled_count, sent_count, started_at,
    ended_at, created_at, claim_token, heartbeat_at";

fn row_to_batch(row: &rusqlite::Row<'_>) -> rusqlite::Result<BroadcastBatch> {
    Ok(BroadcastBatch {
        id: row.get(0)?,
        broadcast_id: row.get(1)?,
        status: parse_column(2, row.get(2)?)?,
        scheduled_count: row.get(3)?,
        sent_count: row.get(4)?,
        started_at: row.get(5)?,
        ended_at: row.get(6)?,
        created_at: row.get(7)?,
        claim_token: row.get(8)?,
        heartbeat_at: row.get(9)?,
    })
}

/// Create one batch and all of its recipient rows in a single transaction.
///
/// `seq` orders batches within a broadcast; the claim hands them out in
/// ascending `seq`.
pub async fn create_batch(
    db: &Database,
    broadcast_id: &str,
    seq: i64,
    recipients: Vec<RecipientSeed>,
) -> Result<BroadcastBatch, ParleyError> {
    let broadcast_id = broadcast_id.to_string();
    let batch_id = uuid::Uuid::new_v4().to_string();
    let created_at = now_timestamp();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO broadcast_batches (id, broadcast_id, seq, scheduled_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![batch_id, broadcast_id, seq, recipients.len() as i64, created_at],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO broadcast_contacts
                        (id, broadcast_id, batch_id, contact_id, recipient, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for seed in &recipients {
                    stmt.execute(params![
                        uuid::Uuid::new_v4().to_string(),
                        broadcast_id,
                        batch_id,
                        seed.contact_id,
                        seed.recipient,
                        created_at,
                    ])?;
                }
            }
            let batch = tx.query_row(
                &format!("SELECT {BATCH_COLUMNS} FROM broadcast_batches WHERE id = ?1"),
                params![batch_id],
                row_to_batch,
            )?;
            tx.commit()?;
            Ok(batch)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Try to claim one specific batch.
///
/// Fails with [`ParleyError::BatchAlreadyClaimed`] when the batch is no longer
/// `unclaimed`, whoever won.
pub async fn try_claim_batch(
    db: &Database,
    batch_id: &str,
    at: &str,
) -> Result<BroadcastBatch, ParleyError> {
    let id = batch_id.to_string();
    let at = at.to_string();
    let token = uuid::Uuid::new_v4().to_string();
    let claimed = db
        .connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE broadcast_batches
                 SET status = 'claimed', started_at = ?2, heartbeat_at = ?2, claim_token = ?3
                 WHERE id = ?1 AND status = 'unclaimed'",
                params![id, at, token],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            conn.query_row(
                &format!("SELECT {BATCH_COLUMNS} FROM broadcast_batches WHERE id = ?1"),
                params![id],
                row_to_batch,
            )
            .map(Some)
        })
        .await
        .map_err(crate::database::map_tr_err)?;

    claimed.ok_or_else(|| ParleyError::BatchAlreadyClaimed {
        batch_id: batch_id.to_string(),
    })
}

/// Claim the lowest-`seq` unclaimed batch of a broadcast.
///
/// Returns `None` when nothing is left to claim. Never blocks: a lost race on
/// one candidate moves straight on to the next.
pub async fn claim_next_batch(
    db: &Database,
    broadcast_id: &str,
) -> Result<Option<BroadcastBatch>, ParleyError> {
    loop {
        let bid = broadcast_id.to_string();
        let candidate: Option<String> = db
            .connection()
            .call(move |conn| {
                conn.query_row(
                    "SELECT id FROM broadcast_batches
                     WHERE broadcast_id = ?1 AND status = 'unclaimed'
                     ORDER BY seq ASC LIMIT 1",
                    params![bid],
                    |row| row.get(0),
                )
                .optional()
            })
            .await
            .map_err(crate::database::map_tr_err)?;

        let Some(batch_id) = candidate else {
            return Ok(None);
        };

        match try_claim_batch(db, &batch_id, &now_timestamp()).await {
            Ok(batch) => return Ok(Some(batch)),
            Err(ParleyError::BatchAlreadyClaimed { batch_id }) => {
                debug!(%batch_id, "lost claim race, trying next batch");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Get a batch by ID.
pub async fn get_batch(db: &Database, id: &str) -> Result<Option<BroadcastBatch>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {BATCH_COLUMNS} FROM broadcast_batches WHERE id = ?1"),
                params![id],
                row_to_batch,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List a broadcast's batches in claim order.
pub async fn list_batches(
    db: &Database,
    broadcast_id: &str,
) -> Result<Vec<BroadcastBatch>, ParleyError> {
    let broadcast_id = broadcast_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BATCH_COLUMNS} FROM broadcast_batches
                 WHERE broadcast_id = ?1 ORDER BY seq ASC"
            ))?;
            let rows = stmt.query_map(params![broadcast_id], row_to_batch)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Move a claimed batch to `done` and stamp `ended_at`.
///
/// Returns `false` if the batch is not claimed under `claim_token`.
pub async fn mark_done(
    db: &Database,
    batch_id: &str,
    claim_token: &str,
    at: &str,
) -> Result<bool, ParleyError> {
    let id = batch_id.to_string();
    let token = claim_token.to_string();
    let at = at.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE broadcast_batches SET status = 'done', ended_at = ?3
                 WHERE id = ?1 AND status = 'claimed' AND claim_token = ?2",
                params![id, token, at],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Extend the lease on a claimed batch.
///
/// Returns `false` when the batch is no longer claimed under `claim_token`:
/// the lease expired and another worker may own the batch now.
pub async fn renew_lease(
    db: &Database,
    batch_id: &str,
    claim_token: &str,
    at: &str,
) -> Result<bool, ParleyError> {
    let id = batch_id.to_string();
    let token = claim_token.to_string();
    let at = at.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE broadcast_batches SET heartbeat_at = ?3
                 WHERE id = ?1 AND status = 'claimed' AND claim_token = ?2",
                params![id, token, at],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Return `claimed` batches whose last heartbeat is older than `stale_before`
/// to `unclaimed`.
///
/// Recovers batches held by a worker that died mid-batch. Clearing the token
/// fences the old holder out. Recipients that already reached an outcome, or
/// whose send claim is still fresh, are skipped when the batch is picked up
/// again.
pub async fn reclaim_stale_batches(
    db: &Database,
    stale_before: &str,
) -> Result<usize, ParleyError> {
    let cutoff = stale_before.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE broadcast_batches
                 SET status = 'unclaimed', started_at = NULL, heartbeat_at = NULL,
                     claim_token = NULL
                 WHERE status = 'claimed' AND COALESCE(heartbeat_at, started_at) < ?1",
                params![cutoff],
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// IDs of broadcasts that still have unclaimed batches, oldest first.
pub async fn broadcasts_with_unclaimed(db: &Database) -> Result<Vec<String>, ParleyError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT b.id FROM broadcasts b
                 WHERE b.cancelled_at IS NULL
                   AND EXISTS (SELECT 1 FROM broadcast_batches bb
                               WHERE bb.broadcast_id = b.id AND bb.status = 'unclaimed')
                 ORDER BY b.created_at ASC, b.id",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BatchStatus;
    use crate::queries::broadcasts::{cancel_broadcast, insert_broadcast, sample_broadcast};
    use crate::queries::test_support::{seed_contacts, setup_db};

    async fn seeded_batches(db: &Database, sizes: &[usize]) -> Vec<BroadcastBatch> {
        let total: usize = sizes.iter().sum();
        let contacts = seed_contacts(db, total).await;
        insert_broadcast(db, &sample_broadcast("b1", total as i64))
            .await
            .unwrap();
        let mut batches = Vec::new();
        let mut offset = 0;
        for (seq, size) in sizes.iter().enumerate() {
            let seeds = contacts[offset..offset + size]
                .iter()
                .map(|id| RecipientSeed {
                    contact_id: *id,
                    recipient: format!("r{id}"),
                })
                .collect();
            offset += size;
            batches.push(create_batch(db, "b1", seq as i64, seeds).await.unwrap());
        }
        batches
    }

    #[tokio::test]
    async fn create_batch_writes_recipients() {
        let (db, _dir) = setup_db().await;
        let batches = seeded_batches(&db, &[3, 2]).await;
        assert_eq!(batches[0].scheduled_count, 3);
        assert_eq!(batches[1].scheduled_count, 2);
        assert_eq!(batches[0].status, BatchStatus::Unclaimed);

        let count: i64 = db
            .connection()
            .call(|conn| -> Result<i64, rusqlite::Error> {
                conn.query_row("SELECT COUNT(*) FROM broadcast_contacts", [], |r| r.get(0))
            })
            .await
            .unwrap();
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn claims_in_seq_order_then_none() {
        let (db, _dir) = setup_db().await;
        let batches = seeded_batches(&db, &[1, 1]).await;

        let first = claim_next_batch(&db, "b1").await.unwrap().unwrap();
        assert_eq!(first.id, batches[0].id);
        assert_eq!(first.status, BatchStatus::Claimed);
        assert!(first.started_at.is_some());

        let second = claim_next_batch(&db, "b1").await.unwrap().unwrap();
        assert_eq!(second.id, batches[1].id);

        assert!(claim_next_batch(&db, "b1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_claim_of_same_batch_is_rejected() {
        let (db, _dir) = setup_db().await;
        let batches = seeded_batches(&db, &[1]).await;
        let at = now_timestamp();

        try_claim_batch(&db, &batches[0].id, &at).await.unwrap();
        let err = try_claim_batch(&db, &batches[0].id, &at).await.unwrap_err();
        assert!(matches!(err, ParleyError::BatchAlreadyClaimed { .. }));
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let (db, _dir) = setup_db().await;
        seeded_batches(&db, &[2]).await;

        let (a, b) = tokio::join!(claim_next_batch(&db, "b1"), claim_next_batch(&db, "b1"));
        let winners = [a.unwrap(), b.unwrap()]
            .into_iter()
            .filter(Option::is_some)
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn mark_done_requires_claim() {
        let (db, _dir) = setup_db().await;
        let batches = seeded_batches(&db, &[1]).await;
        let at = now_timestamp();

        assert!(!mark_done(&db, &batches[0].id, "no-claim", &at).await.unwrap());
        let claimed = claim_next_batch(&db, "b1").await.unwrap().unwrap();
        let token = claimed.claim_token.unwrap();
        assert!(!mark_done(&db, &batches[0].id, "someone-else", &at).await.unwrap());
        assert!(mark_done(&db, &batches[0].id, &token, &at).await.unwrap());

        let done = get_batch(&db, &batches[0].id).await.unwrap().unwrap();
        assert_eq!(done.status, BatchStatus::Done);
        assert_eq!(done.ended_at.as_deref(), Some(at.as_str()));
    }

    #[tokio::test]
    async fn cancel_only_touches_unclaimed() {
        let (db, _dir) = setup_db().await;
        seeded_batches(&db, &[1, 1, 1]).await;
        claim_next_batch(&db, "b1").await.unwrap().unwrap();

        let cancelled = cancel_broadcast(&db, "b1", &now_timestamp()).await.unwrap();
        assert_eq!(cancelled, 2);

        let statuses: Vec<BatchStatus> = list_batches(&db, "b1")
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.status)
            .collect();
        assert_eq!(
            statuses,
            vec![BatchStatus::Claimed, BatchStatus::Cancelled, BatchStatus::Cancelled]
        );
        assert!(claim_next_batch(&db, "b1").await.unwrap().is_none());
        assert!(broadcasts_with_unclaimed(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_claims_are_released() {
        let (db, _dir) = setup_db().await;
        let batches = seeded_batches(&db, &[1]).await;
        try_claim_batch(&db, &batches[0].id, "2026-01-01T00:00:00.000Z")
            .await
            .unwrap();

        assert_eq!(
            reclaim_stale_batches(&db, "2025-12-31T00:00:00.000Z").await.unwrap(),
            0
        );
        assert_eq!(
            reclaim_stale_batches(&db, "2026-01-01T00:15:00.000Z").await.unwrap(),
            1
        );
        let again = claim_next_batch(&db, "b1").await.unwrap().unwrap();
        assert_eq!(again.id, batches[0].id);
    }

    #[tokio::test]
    async fn renewed_lease_is_not_reclaimed() {
        let (db, _dir) = setup_db().await;
        let batches = seeded_batches(&db, &[1]).await;
        let claimed = try_claim_batch(&db, &batches[0].id, "2026-01-01T00:00:00.000Z")
            .await
            .unwrap();
        let token = claimed.claim_token.unwrap();

        assert!(
            renew_lease(&db, &batches[0].id, &token, "2026-01-01T00:20:00.000Z")
                .await
                .unwrap()
        );
        assert_eq!(
            reclaim_stale_batches(&db, "2026-01-01T00:15:00.000Z").await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn reclaim_fences_out_the_previous_holder() {
        let (db, _dir) = setup_db().await;
        let batches = seeded_batches(&db, &[1]).await;
        let first = try_claim_batch(&db, &batches[0].id, "2026-01-01T00:00:00.000Z")
            .await
            .unwrap();
        let old_token = first.claim_token.unwrap();

        reclaim_stale_batches(&db, "2026-01-01T00:15:00.000Z").await.unwrap();
        let second = claim_next_batch(&db, "b1").await.unwrap().unwrap();
        assert_ne!(second.claim_token.as_deref(), Some(old_token.as_str()));

        let at = now_timestamp();
        assert!(!renew_lease(&db, &batches[0].id, &old_token, &at).await.unwrap());
        assert!(!mark_done(&db, &batches[0].id, &old_token, &at).await.unwrap());
        let still = get_batch(&db, &batches[0].id).await.unwrap().unwrap();
        assert_eq!(still.status, BatchStatus::Claimed);
    }
}
