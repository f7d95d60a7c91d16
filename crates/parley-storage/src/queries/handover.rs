// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only handover audit log.
//!
//! Rows are only ever inserted, inside the same transaction as the
//! conversation change they describe. Triggers in the schema reject UPDATE
//! and DELETE.

use parley_core::ParleyError;
use rusqlite::params;

use crate::database::Database;
use crate::models::{Actor, HandoverAction, HandoverEvent};
use crate::queries::{parse_column, parse_json, to_json};

pub(crate) fn insert_event_in(
    conn: &rusqlite::Connection,
    conversation_id: &str,
    action: HandoverAction,
    actor: &Actor,
    at: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO handover_events (conversation_id, action, actor, at)
         VALUES (?1, ?2, ?3, ?4)",
        params![conversation_id, action.to_string(), to_json(actor)?, at],
    )?;
    Ok(conn.last_insert_rowid())
}

/// List a conversation's events in the order they were written.
pub async fn list_events(
    db: &Database,
    conversation_id: &str,
) -> Result<Vec<HandoverEvent>, ParleyError> {
    let conversation_id = conversation_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, action, actor, at FROM handover_events
                 WHERE conversation_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![conversation_id], |row| {
                Ok(HandoverEvent {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    action: parse_column(2, row.get(2)?)?,
                    actor: parse_json(3, row.get(3)?)?,
                    at: row.get(4)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}
