// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Broadcast row persistence.

use parley_core::ParleyError;
use rusqlite::{OptionalExtension, params};

use crate::database::Database;
use crate::models::Broadcast;
use crate::queries::{parse_json, to_json};

const BROADCAST_COLUMNS: &str = "id, name, template_name, language, contact_tags,
    scheduled_count, processed_count, sent_count, delivered_count, read_count,
    failed_count, replied_count, created_at, cancelled_at";

fn row_to_broadcast(row: &rusqlite::Row<'_>) -> rusqlite::Result<Broadcast> {
    Ok(Broadcast {
        id: row.get(0)?,
        name: row.get(1)?,
        template_name: row.get(2)?,
        language: row.get(3)?,
        contact_tags: parse_json(4, row.get(4)?)?,
        scheduled_count: row.get(5)?,
        processed_count: row.get(6)?,
        sent_count: row.get(7)?,
        delivered_count: row.get(8)?,
        read_count: row.get(9)?,
        failed_count: row.get(10)?,
        replied_count: row.get(11)?,
        created_at: row.get(12)?,
        cancelled_at: row.get(13)?,
    })
}

/// Persist a new broadcast, counters included.
pub async fn insert_broadcast(db: &Database, broadcast: &Broadcast) -> Result<(), ParleyError> {
    let b = broadcast.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO broadcasts (id, name, template_name, language, contact_tags,
                    scheduled_count, processed_count, sent_count, delivered_count,
                    read_count, failed_count, replied_count, created_at, cancelled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    b.id,
                    b.name,
                    b.template_name,
                    b.language,
                    to_json(&b.contact_tags)?,
                    b.scheduled_count,
                    b.processed_count,
                    b.sent_count,
                    b.delivered_count,
                    b.read_count,
                    b.failed_count,
                    b.replied_count,
                    b.created_at,
                    b.cancelled_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a broadcast by ID.
pub async fn get_broadcast(db: &Database, id: &str) -> Result<Option<Broadcast>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {BROADCAST_COLUMNS} FROM broadcasts WHERE id = ?1"),
                params![id],
                row_to_broadcast,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List broadcasts, newest first.
pub async fn list_broadcasts(db: &Database) -> Result<Vec<Broadcast>, ParleyError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BROADCAST_COLUMNS} FROM broadcasts ORDER BY created_at DESC, id"
            ))?;
            let rows = stmt.query_map([], row_to_broadcast)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Stamp `cancelled_at` and cancel every batch not yet claimed.
///
/// Returns the number of batches cancelled. Already-claimed batches run to
/// completion. Cancelling twice is a no-op the second time.
pub async fn cancel_broadcast(db: &Database, id: &str, at: &str) -> Result<usize, ParleyError> {
    let id = id.to_string();
    let at = at.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE broadcasts SET cancelled_at = ?2 WHERE id = ?1 AND cancelled_at IS NULL",
                params![id, at],
            )?;
            let cancelled = tx.execute(
                "UPDATE broadcast_batches SET status = 'cancelled', ended_at = ?2
                 WHERE broadcast_id = ?1 AND status = 'unclaimed'",
                params![id, at],
            )?;
            tx.commit()?;
            Ok(cancelled)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
pub(crate) fn sample_broadcast(id: &str, scheduled: i64) -> Broadcast {
    Broadcast {
        id: id.to_string(),
        name: format!("campaign {id}"),
        template_name: "spring_sale".to_string(),
        language: "en_US".to_string(),
        contact_tags: vec!["vip".to_string()],
        scheduled_count: scheduled,
        processed_count: 0,
        sent_count: 0,
        delivered_count: 0,
        read_count: 0,
        failed_count: 0,
        replied_count: 0,
        created_at: parley_core::types::now_timestamp(),
        cancelled_at: None,
    }
}
