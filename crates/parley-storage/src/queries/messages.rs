// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversational message rows and their delivery stamps.

use parley_core::ParleyError;
use parley_core::types::{DeliveryStatus, now_timestamp};
use rusqlite::{OptionalExtension, params};

use crate::database::Database;
use crate::models::{InboundRecord, Message, NewMessage, StatusApplication};
use crate::queries::parse_column;
use crate::queries::recipients::count_reply_in;

/// Insert a message. Returns its row id, or the existing id if `wam_id` was
/// already recorded (provider redelivery).
pub async fn insert_message(db: &Database, message: &NewMessage) -> Result<i64, ParleyError> {
    let m = message.clone();
    let created_at = now_timestamp();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO messages
                    (contact_id, conversation_id, wam_id, direction, body, sent_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    m.contact_id,
                    m.conversation_id,
                    m.wam_id,
                    m.direction.to_string(),
                    m.body,
                    m.sent_at,
                    created_at,
                ],
            )?;
            conn.query_row(
                "SELECT id FROM messages WHERE wam_id = ?1",
                params![m.wam_id],
                |row| row.get(0),
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Store an inbound customer message and credit the reply it represents to
/// the contact's latest broadcast, in one transaction.
///
/// A redelivered message id changes nothing, and a failure leaves neither
/// write behind, so the provider's retry records both.
pub async fn insert_inbound(
    db: &Database,
    message: &NewMessage,
    reply_at: &str,
) -> Result<InboundRecord, ParleyError> {
    let m = message.clone();
    let reply_at = reply_at.to_string();
    let created_at = now_timestamp();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO messages
                    (contact_id, conversation_id, wam_id, direction, body, sent_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    m.contact_id,
                    m.conversation_id,
                    m.wam_id,
                    m.direction.to_string(),
                    m.body,
                    m.sent_at,
                    created_at,
                ],
            )?;
            if inserted == 0 {
                return Ok(InboundRecord::Duplicate);
            }
            let credited = count_reply_in(&tx, m.contact_id, &reply_at)?;
            tx.commit()?;
            Ok(InboundRecord::Recorded { credited })
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a message by provider id.
pub async fn find_by_wam_id(db: &Database, wam_id: &str) -> Result<Option<Message>, ParleyError> {
    let wam_id = wam_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT id, contact_id, conversation_id, wam_id, direction, body,
                        sent_at, delivered_at, read_at, failed_at, created_at
                 FROM messages WHERE wam_id = ?1",
                params![wam_id],
                |row| {
                    Ok(Message {
                        id: row.get(0)?,
                        contact_id: row.get(1)?,
                        conversation_id: row.get(2)?,
                        wam_id: row.get(3)?,
                        direction: parse_column(4, row.get(4)?)?,
                        body: row.get(5)?,
                        sent_at: row.get(6)?,
                        delivered_at: row.get(7)?,
                        read_at: row.get(8)?,
                        failed_at: row.get(9)?,
                        created_at: row.get(10)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Stamp a delivery status on a conversational message, first write wins.
///
/// Never yields [`StatusApplication::Counted`]: these messages have no
/// broadcast counters.
pub async fn apply_status(
    db: &Database,
    wam_id: &str,
    status: DeliveryStatus,
    at: &str,
) -> Result<StatusApplication, ParleyError> {
    let wam_id = wam_id.to_string();
    let at = at.to_string();
    db.connection()
        .call(move |conn| {
            let col = status.timestamp_column();
            let changed = conn.execute(
                &format!("UPDATE messages SET {col} = ?2 WHERE wam_id = ?1 AND {col} IS NULL"),
                params![wam_id, at],
            )?;
            if changed == 1 {
                return Ok(StatusApplication::Recorded);
            }
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT id FROM messages WHERE wam_id = ?1",
                    params![wam_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(match exists {
                Some(_) => StatusApplication::Duplicate,
                None => StatusApplication::Unknown,
            })
        })
        .await
        .map_err(crate::database::map_tr_err)
}
