// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Atomic broadcast counter increments.
//!
//! Each increment is one `UPDATE ... SET col = col + ?` statement. The
//! statement also carries the ceiling check, so a counter can never pass the
//! broadcast's `scheduled_count` and the check never races the write.

use parley_core::ParleyError;
use parley_core::types::Counter;
use rusqlite::params;

use crate::database::Database;

fn increment_sql(counter: Counter) -> String {
    let col = counter.column();
    match counter {
        Counter::Scheduled => {
            format!("UPDATE broadcasts SET {col} = {col} + ?2 WHERE id = ?1")
        }
        // Outcomes share one ceiling: a recipient ends either sent or failed.
        Counter::Sent | Counter::Failed => format!(
            "UPDATE broadcasts SET {col} = {col} + ?2
             WHERE id = ?1 AND sent_count + failed_count + ?2 <= scheduled_count"
        ),
        _ => format!(
            "UPDATE broadcasts SET {col} = {col} + ?2
             WHERE id = ?1 AND {col} + ?2 <= scheduled_count"
        ),
    }
}

/// Apply one increment on an open connection or transaction.
///
/// Returns `false` when the broadcast is missing or the ceiling would be
/// exceeded; the counter is unchanged in that case.
pub(crate) fn increment_in(
    conn: &rusqlite::Connection,
    broadcast_id: &str,
    counter: Counter,
    delta: u32,
) -> rusqlite::Result<bool> {
    if delta == 0 {
        return Ok(true);
    }
    let changed = conn.execute(&increment_sql(counter), params![broadcast_id, delta])?;
    if changed == 0 {
        tracing::warn!(
            broadcast_id,
            counter = %counter,
            delta,
            "counter increment rejected"
        );
    }
    Ok(changed == 1)
}

/// Atomically add `delta` to one counter of a broadcast.
pub async fn increment(
    db: &Database,
    broadcast_id: &str,
    counter: Counter,
    delta: u32,
) -> Result<bool, ParleyError> {
    let broadcast_id = broadcast_id.to_string();
    db.connection()
        .call(move |conn| increment_in(conn, &broadcast_id, counter, delta))
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::broadcasts::{get_broadcast, insert_broadcast, sample_broadcast};
    use crate::queries::test_support::setup_db;

    #[tokio::test]
    async fn increments_are_additive() {
        let (db, _dir) = setup_db().await;
        insert_broadcast(&db, &sample_broadcast("b1", 10)).await.unwrap();

        assert!(increment(&db, "b1", Counter::Sent, 3).await.unwrap());
        assert!(increment(&db, "b1", Counter::Delivered, 2).await.unwrap());
        assert!(increment(&db, "b1", Counter::Sent, 1).await.unwrap());

        let b = get_broadcast(&db, "b1").await.unwrap().unwrap();
        assert_eq!(b.sent_count, 4);
        assert_eq!(b.delivered_count, 2);
        assert_eq!(b.read_count, 0);
    }

    #[tokio::test]
    async fn outcomes_never_exceed_scheduled() {
        let (db, _dir) = setup_db().await;
        insert_broadcast(&db, &sample_broadcast("b1", 3)).await.unwrap();

        assert!(increment(&db, "b1", Counter::Sent, 2).await.unwrap());
        assert!(increment(&db, "b1", Counter::Failed, 1).await.unwrap());
        assert!(!increment(&db, "b1", Counter::Failed, 1).await.unwrap());
        assert!(!increment(&db, "b1", Counter::Read, 4).await.unwrap());

        let b = get_broadcast(&db, "b1").await.unwrap().unwrap();
        assert_eq!(b.sent_count + b.failed_count, 3);
        assert_eq!(b.read_count, 0);
    }

    #[tokio::test]
    async fn zero_delta_and_missing_broadcast() {
        let (db, _dir) = setup_db().await;
        assert!(increment(&db, "nope", Counter::Sent, 0).await.unwrap());
        assert!(!increment(&db, "nope", Counter::Sent, 1).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_increments_all_land() {
        let (db, _dir) = setup_db().await;
        insert_broadcast(&db, &sample_broadcast("b1", 100)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                increment(&db, "b1", Counter::Delivered, 1).await.unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let b = get_broadcast(&db, "b1").await.unwrap().unwrap();
        assert_eq!(b.delivered_count, 50);
    }
}
