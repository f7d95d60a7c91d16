// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-recipient broadcast state.
//!
//! Timestamp columns are first-write-wins: every stamp is a conditional
//! `UPDATE ... WHERE col IS NULL`, and the matching counter only moves when
//! that update touched a row. Both happen in one transaction.

use parley_core::ParleyError;
use parley_core::types::{Counter, DeliveryStatus};
use rusqlite::{OptionalExtension, params};
use tracing::{debug, warn};

use crate::database::Database;
use crate::models::{BroadcastContact, StatusApplication};
use crate::queries::counters::increment_in;

const RECIPIENT_COLUMNS: &str = "id, broadcast_id, batch_id, contact_id, recipient, wam_id,
    send_attempts, processed_at, sent_at, delivered_at, read_at, failed_at, replied_at,
    reply_counted, failure_reason, created_at";

fn row_to_recipient(row: &rusqlite::Row<'_>) -> rusqlite::Result<BroadcastContact> {
    Ok(BroadcastContact {
        id: row.get(0)?,
        broadcast_id: row.get(1)?,
        batch_id: row.get(2)?,
        contact_id: row.get(3)?,
        recipient: row.get(4)?,
        wam_id: row.get(5)?,
        send_attempts: row.get(6)?,
        processed_at: row.get(7)?,
        sent_at: row.get(8)?,
        delivered_at: row.get(9)?,
        read_at: row.get(10)?,
        failed_at: row.get(11)?,
        replied_at: row.get(12)?,
        reply_counted: row.get(13)?,
        failure_reason: row.get(14)?,
        created_at: row.get(15)?,
    })
}

/// List the live recipients of a batch in contact order.
pub async fn list_for_batch(
    db: &Database,
    batch_id: &str,
) -> Result<Vec<BroadcastContact>, ParleyError> {
    let batch_id = batch_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECIPIENT_COLUMNS} FROM broadcast_contacts
                 WHERE batch_id = ?1 AND voided = 0 ORDER BY contact_id ASC"
            ))?;
            let rows = stmt.query_map(params![batch_id], row_to_recipient)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a recipient row by ID.
pub async fn get_recipient(
    db: &Database,
    id: &str,
) -> Result<Option<BroadcastContact>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {RECIPIENT_COLUMNS} FROM broadcast_contacts WHERE id = ?1"),
                params![id],
                row_to_recipient,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Find the recipient row a provider message id belongs to.
pub async fn find_by_wam_id(
    db: &Database,
    wam_id: &str,
) -> Result<Option<BroadcastContact>, ParleyError> {
    let wam_id = wam_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {RECIPIENT_COLUMNS} FROM broadcast_contacts
                     WHERE wam_id = ?1 AND voided = 0"
                ),
                params![wam_id],
                row_to_recipient,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Claim the right to send to a recipient.
///
/// Succeeds only while the recipient has no outcome and no other worker holds
/// a send claim newer than `stale_before`. The caller must not send unless
/// this returns `true`.
pub async fn claim_send(
    db: &Database,
    id: &str,
    at: &str,
    stale_before: &str,
) -> Result<bool, ParleyError> {
    let id = id.to_string();
    let at = at.to_string();
    let cutoff = stale_before.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE broadcast_contacts SET send_started_at = ?2
                 WHERE id = ?1 AND sent_at IS NULL AND failed_at IS NULL AND voided = 0
                   AND (send_started_at IS NULL OR send_started_at < ?3)",
                params![id, at, cutoff],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Count one send attempt against a recipient.
pub async fn record_attempt(db: &Database, id: &str) -> Result<(), ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE broadcast_contacts SET send_attempts = send_attempts + 1 WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Record an accepted send: stamp `sent_at`/`processed_at`, store the provider
/// id, and bump `sent` and `processed` on the broadcast and `sent_count` on
/// the batch.
///
/// Returns `false` (and changes nothing) if the recipient already had an outcome.
pub async fn record_sent(
    db: &Database,
    id: &str,
    wam_id: &str,
    at: &str,
) -> Result<bool, ParleyError> {
    let id = id.to_string();
    let wam_id = wam_id.to_string();
    let at = at.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE broadcast_contacts
                 SET sent_at = ?2, processed_at = COALESCE(processed_at, ?2), wam_id = ?3
                 WHERE id = ?1 AND sent_at IS NULL AND failed_at IS NULL",
                params![id, at, wam_id],
            )?;
            if changed == 0 {
                return Ok(false);
            }
            let (broadcast_id, batch_id): (String, String) = tx.query_row(
                "SELECT broadcast_id, batch_id FROM broadcast_contacts WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            increment_in(&tx, &broadcast_id, Counter::Sent, 1)?;
            increment_in(&tx, &broadcast_id, Counter::Processed, 1)?;
            tx.execute(
                "UPDATE broadcast_batches SET sent_count = sent_count + 1 WHERE id = ?1",
                params![batch_id],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Record a terminal send failure: stamp `failed_at`/`processed_at` and bump
/// `failed` and `processed` on the broadcast.
///
/// Returns `false` (and changes nothing) if the recipient already had an outcome.
pub async fn record_failed(
    db: &Database,
    id: &str,
    reason: &str,
    at: &str,
) -> Result<bool, ParleyError> {
    let id = id.to_string();
    let reason = reason.to_string();
    let at = at.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE broadcast_contacts
                 SET failed_at = ?2, processed_at = COALESCE(processed_at, ?2), failure_reason = ?3
                 WHERE id = ?1 AND sent_at IS NULL AND failed_at IS NULL",
                params![id, at, reason],
            )?;
            if changed == 0 {
                return Ok(false);
            }
            let broadcast_id: String = tx.query_row(
                "SELECT broadcast_id FROM broadcast_contacts WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            increment_in(&tx, &broadcast_id, Counter::Failed, 1)?;
            increment_in(&tx, &broadcast_id, Counter::Processed, 1)?;
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Apply a delivery status callback to the recipient carrying `wam_id`.
///
/// A `failed` callback for a recipient that was already counted as sent is
/// stamped but not counted, so `sent + failed` stays within `scheduled`.
pub async fn apply_delivery_status(
    db: &Database,
    wam_id: &str,
    status: DeliveryStatus,
    at: &str,
) -> Result<StatusApplication, ParleyError> {
    let wam_id = wam_id.to_string();
    let at = at.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let row: Option<(String, String, Option<String>)> = tx
                .query_row(
                    "SELECT id, broadcast_id, sent_at FROM broadcast_contacts
                     WHERE wam_id = ?1 AND voided = 0",
                    params![wam_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let Some((id, broadcast_id, sent_at)) = row else {
                return Ok(StatusApplication::Unknown);
            };

            let col = status.timestamp_column();
            let changed = tx.execute(
                &format!("UPDATE broadcast_contacts SET {col} = ?2 WHERE id = ?1 AND {col} IS NULL"),
                params![id, at],
            )?;
            if changed == 0 {
                return Ok(StatusApplication::Duplicate);
            }

            let outcome = if status == DeliveryStatus::Failed && sent_at.is_some() {
                debug!(%wam_id, "failure after accepted send, stamped without counting");
                StatusApplication::Recorded
            } else if increment_in(&tx, &broadcast_id, status.counter(), 1)? {
                StatusApplication::Counted { broadcast_id }
            } else {
                StatusApplication::Recorded
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Count a contact's reply against the broadcast they most recently received.
///
/// Only the latest sent, not-yet-counted recipient row is considered; each
/// row counts at most once. Returns the broadcast credited, if any.
pub async fn count_reply(
    db: &Database,
    contact_id: i64,
    at: &str,
) -> Result<Option<String>, ParleyError> {
    let at = at.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let credited = count_reply_in(&tx, contact_id, &at)?;
            tx.commit()?;
            Ok(credited)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// [`count_reply`] inside a caller's transaction.
pub(crate) fn count_reply_in(
    tx: &rusqlite::Transaction<'_>,
    contact_id: i64,
    at: &str,
) -> rusqlite::Result<Option<String>> {
    let row: Option<(String, String)> = tx
        .query_row(
            "SELECT id, broadcast_id FROM broadcast_contacts
             WHERE contact_id = ?1 AND sent_at IS NOT NULL
               AND reply_counted = 0 AND voided = 0
             ORDER BY sent_at DESC LIMIT 1",
            params![contact_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((id, broadcast_id)) = row else {
        return Ok(None);
    };
    let changed = tx.execute(
        "UPDATE broadcast_contacts SET replied_at = ?2, reply_counted = 1
         WHERE id = ?1 AND reply_counted = 0",
        params![id, at],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    if !increment_in(tx, &broadcast_id, Counter::Replied, 1)? {
        warn!(%broadcast_id, contact_id, "reply counter at ceiling");
    }
    Ok(Some(broadcast_id))
}
