// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation current-state rows.
//!
//! A (contact, tenant) pair has at most one live row (`voided = 0`), enforced
//! by a partial unique index. Mode changes are conditional on the expected
//! `from` mode and write their handover event first, in the same transaction.

use parley_core::ParleyError;
use parley_core::types::now_timestamp;
use rusqlite::{OptionalExtension, params};
use tracing::debug;

use crate::database::Database;
use crate::models::{
    Actor, Conversation, ConversationMode, HandoverAction, InboundConversation, InboundTouch,
    ModeChange,
};
use crate::queries::handover::insert_event_in;
use crate::queries::parse_column;

const CONVERSATION_COLUMNS: &str = "id, contact_id, tenant_id, phone_number_id, status,
    flow_state, mute_bot_until, assigned_to_label, last_agent_msg_at, last_user_msg_at,
    session_expires_at, mode_changed_at, created_at, updated_at";

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        contact_id: row.get(1)?,
        tenant_id: row.get(2)?,
        phone_number_id: row.get(3)?,
        mode: parse_column(4, row.get(4)?)?,
        flow_state: row.get(5)?,
        mute_bot_until: row.get(6)?,
        assigned_to_label: row.get(7)?,
        last_agent_msg_at: row.get(8)?,
        last_user_msg_at: row.get(9)?,
        session_expires_at: row.get(10)?,
        mode_changed_at: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn select_by_id(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Conversation> {
    conn.query_row(
        &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
        params![id],
        row_to_conversation,
    )
}

fn select_active(
    conn: &rusqlite::Connection,
    contact_id: i64,
    tenant_id: &str,
) -> rusqlite::Result<Option<Conversation>> {
    conn.query_row(
        &format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE contact_id = ?1 AND tenant_id = ?2 AND voided = 0"
        ),
        params![contact_id, tenant_id],
        row_to_conversation,
    )
    .optional()
}

fn insert_bot_conversation(
    conn: &rusqlite::Connection,
    contact_id: i64,
    tenant_id: &str,
    phone_number_id: Option<&str>,
    at: &str,
) -> rusqlite::Result<Conversation> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO conversations
            (id, contact_id, tenant_id, phone_number_id, status, mode_changed_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'bot', ?5, ?5, ?5)",
        params![id, contact_id, tenant_id, phone_number_id, at],
    )?;
    select_by_id(conn, &id)
}

/// Get a conversation by ID, voided or not.
pub async fn get_conversation(
    db: &Database,
    id: &str,
) -> Result<Option<Conversation>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| select_by_id(conn, &id).optional())
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get the live conversation of a (contact, tenant) pair.
pub async fn get_active(
    db: &Database,
    contact_id: i64,
    tenant_id: &str,
) -> Result<Option<Conversation>, ParleyError> {
    let tenant_id = tenant_id.to_string();
    db.connection()
        .call(move |conn| select_active(conn, contact_id, &tenant_id))
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get the live conversation, creating a `bot` one if none exists.
///
/// A live `closed` conversation is returned as is; only inbound user
/// activity reopens.
pub async fn ensure_active(
    db: &Database,
    contact_id: i64,
    tenant_id: &str,
    phone_number_id: Option<&str>,
) -> Result<Conversation, ParleyError> {
    let tenant_id = tenant_id.to_string();
    let phone_number_id = phone_number_id.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let conversation = match select_active(&tx, contact_id, &tenant_id)? {
                Some(existing) => existing,
                None => insert_bot_conversation(
                    &tx,
                    contact_id,
                    &tenant_id,
                    phone_number_id.as_deref(),
                    &now_timestamp(),
                )?,
            };
            tx.commit()?;
            Ok(conversation)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Record inbound user activity, opening or reopening the conversation.
///
/// A live `closed` conversation is voided and replaced by a fresh `bot` one;
/// its event history is left untouched. The live conversation gets
/// `last_user_msg_at` and a new `session_expires_at`.
pub async fn touch_inbound(
    db: &Database,
    touch: InboundTouch,
) -> Result<InboundConversation, ParleyError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let mut previous_id = None;
            let current = match select_active(&tx, touch.contact_id, &touch.tenant_id)? {
                Some(closed) if closed.mode == ConversationMode::Closed => {
                    tx.execute(
                        "UPDATE conversations SET voided = 1, updated_at = ?2 WHERE id = ?1",
                        params![closed.id, touch.at],
                    )?;
                    previous_id = Some(closed.id);
                    None
                }
                other => other,
            };
            let conversation = match current {
                Some(live) => live,
                None => insert_bot_conversation(
                    &tx,
                    touch.contact_id,
                    &touch.tenant_id,
                    touch.phone_number_id.as_deref(),
                    &touch.at,
                )?,
            };
            tx.execute(
                "UPDATE conversations
                 SET last_user_msg_at = ?2, session_expires_at = ?3, updated_at = ?2
                 WHERE id = ?1",
                params![conversation.id, touch.at, touch.session_expires_at],
            )?;
            let conversation = select_by_id(&tx, &conversation.id)?;
            tx.commit()?;
            Ok(InboundConversation {
                conversation,
                previous_id,
            })
        })
        .await
        .map_err(crate::database::map_tr_err)
}

enum ChangeResult {
    Applied(Conversation),
    Rejected(ConversationMode),
    Missing,
}

/// Apply a guarded mode change.
///
/// The handover event is inserted first, then the row is updated only if it
/// is still live and in `change.from`. If the update misses, the whole
/// transaction rolls back and the call fails with
/// [`ParleyError::InvalidTransition`].
pub async fn change_mode(
    db: &Database,
    conversation_id: &str,
    change: ModeChange,
) -> Result<Conversation, ParleyError> {
    let id = conversation_id.to_string();
    let action = change.action;
    let result = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM conversations WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                return Ok(ChangeResult::Missing);
            };

            insert_event_in(&tx, &id, change.action, &change.actor, &change.at)?;
            let changed = tx.execute(
                "UPDATE conversations
                 SET status = ?3, mode_changed_at = ?4, updated_at = ?4,
                     assigned_to_label = COALESCE(?5, assigned_to_label)
                 WHERE id = ?1 AND status = ?2 AND voided = 0",
                params![
                    id,
                    change.from.to_string(),
                    change.to.to_string(),
                    change.at,
                    change.assigned_to_label,
                ],
            )?;
            if changed == 0 {
                // Dropping the transaction discards the event.
                return Ok(ChangeResult::Rejected(parse_column(0, current)?));
            }
            let conversation = select_by_id(&tx, &id)?;
            tx.commit()?;
            Ok(ChangeResult::Applied(conversation))
        })
        .await
        .map_err(crate::database::map_tr_err)?;

    match result {
        ChangeResult::Applied(conversation) => Ok(conversation),
        ChangeResult::Rejected(mode) => {
            debug!(conversation_id, %mode, %action, "transition rejected");
            Err(ParleyError::InvalidTransition {
                conversation_id: conversation_id.to_string(),
                mode: mode.to_string(),
                action: action.to_string(),
            })
        }
        ChangeResult::Missing => Err(ParleyError::NotFound {
            entity: "conversation",
            id: conversation_id.to_string(),
        }),
    }
}

/// Extend `mute_bot_until` to at least `until` and log an echo-mute event.
///
/// The mode is left unchanged. An existing later mute is kept.
pub async fn mute_bot(
    db: &Database,
    conversation_id: &str,
    until: &str,
    actor: Actor,
    at: &str,
) -> Result<Conversation, ParleyError> {
    let id = conversation_id.to_string();
    let until = until.to_string();
    let at = at.to_string();
    let result = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM conversations WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }
            insert_event_in(&tx, &id, HandoverAction::EchoMute, &actor, &at)?;
            tx.execute(
                "UPDATE conversations
                 SET mute_bot_until = MAX(COALESCE(mute_bot_until, ''), ?2), updated_at = ?3
                 WHERE id = ?1",
                params![id, until, at],
            )?;
            let conversation = select_by_id(&tx, &id)?;
            tx.commit()?;
            Ok(Some(conversation))
        })
        .await
        .map_err(crate::database::map_tr_err)?;

    result.ok_or_else(|| ParleyError::NotFound {
        entity: "conversation",
        id: conversation_id.to_string(),
    })
}

/// Stamp `last_agent_msg_at`.
pub async fn record_agent_message(
    db: &Database,
    conversation_id: &str,
    at: &str,
) -> Result<bool, ParleyError> {
    let id = conversation_id.to_string();
    let at = at.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE conversations SET last_agent_msg_at = ?2, updated_at = ?2
                 WHERE id = ?1 AND voided = 0",
                params![id, at],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Replace the opaque bot-flow state.
pub async fn save_flow_state(
    db: &Database,
    conversation_id: &str,
    flow_state: Option<Vec<u8>>,
) -> Result<bool, ParleyError> {
    let id = conversation_id.to_string();
    let at = now_timestamp();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE conversations SET flow_state = ?2, updated_at = ?3
                 WHERE id = ?1 AND voided = 0",
                params![id, flow_state, at],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// IDs of live `handover_pending` conversations whose mode changed before
/// `changed_before`.
pub async fn list_stale_pending(
    db: &Database,
    changed_before: &str,
) -> Result<Vec<String>, ParleyError> {
    let cutoff = changed_before.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM conversations
                 WHERE status = 'handover_pending' AND voided = 0 AND mode_changed_at < ?1
                 ORDER BY mode_changed_at ASC",
            )?;
            let rows = stmt.query_map(params![cutoff], |row| row.get(0))?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List every conversation row of a contact, voided ones included, oldest first.
pub async fn list_for_contact(
    db: &Database,
    contact_id: i64,
) -> Result<Vec<Conversation>, ParleyError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE contact_id = ?1 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt.query_map(params![contact_id], row_to_conversation)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::handover::list_events;
    use crate::queries::test_support::{seed_contacts, setup_db};

    const T0: &str = "2026-03-01T10:00:00.000Z";
    const T1: &str = "2026-03-01T10:05:00.000Z";

    fn touch(contact_id: i64, at: &str) -> InboundTouch {
        InboundTouch {
            contact_id,
            tenant_id: "t1".into(),
            phone_number_id: Some("pn1".into()),
            at: at.into(),
            session_expires_at: "2026-03-02T10:00:00.000Z".into(),
        }
    }

    fn change(from: ConversationMode, to: ConversationMode, action: HandoverAction) -> ModeChange {
        ModeChange {
            from,
            to,
            action,
            actor: Actor::System,
            assigned_to_label: None,
            at: T1.into(),
        }
    }

    #[tokio::test]
    async fn first_inbound_creates_bot_conversation() {
        let (db, _dir) = setup_db().await;
        let contact = seed_contacts(&db, 1).await[0];

        let opened = touch_inbound(&db, touch(contact, T0)).await.unwrap();
        assert_eq!(opened.conversation.mode, ConversationMode::Bot);
        assert_eq!(opened.conversation.last_user_msg_at.as_deref(), Some(T0));
        assert!(opened.previous_id.is_none());

        let again = touch_inbound(&db, touch(contact, T1)).await.unwrap();
        assert_eq!(again.conversation.id, opened.conversation.id);
        assert_eq!(again.conversation.last_user_msg_at.as_deref(), Some(T1));
    }

    #[tokio::test]
    async fn guarded_change_rejects_wrong_mode_without_event() {
        let (db, _dir) = setup_db().await;
        let contact = seed_contacts(&db, 1).await[0];
        let conv = ensure_active(&db, contact, "t1", None).await.unwrap();

        let err = change_mode(
            &db,
            &conv.id,
            change(ConversationMode::HandoverPending, ConversationMode::Human, HandoverAction::Claim),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ParleyError::InvalidTransition { ref mode, .. } if mode == "bot"));
        assert!(list_events(&db, &conv.id).await.unwrap().is_empty());

        let pending = change_mode(
            &db,
            &conv.id,
            change(ConversationMode::Bot, ConversationMode::HandoverPending, HandoverAction::Request),
        )
        .await
        .unwrap();
        assert_eq!(pending.mode, ConversationMode::HandoverPending);
        assert_eq!(pending.mode_changed_at, T1);
        assert_eq!(list_events(&db, &conv.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn change_mode_on_missing_conversation() {
        let (db, _dir) = setup_db().await;
        let err = change_mode(
            &db,
            "nope",
            change(ConversationMode::Bot, ConversationMode::HandoverPending, HandoverAction::Request),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ParleyError::NotFound { .. }));
    }

    #[tokio::test]
    async fn inbound_on_closed_voids_and_reopens() {
        let (db, _dir) = setup_db().await;
        let contact = seed_contacts(&db, 1).await[0];
        let first = touch_inbound(&db, touch(contact, T0)).await.unwrap().conversation;
        for (from, to, action) in [
            (ConversationMode::Bot, ConversationMode::HandoverPending, HandoverAction::Request),
            (ConversationMode::HandoverPending, ConversationMode::Human, HandoverAction::Claim),
            (ConversationMode::Human, ConversationMode::Closed, HandoverAction::Close),
        ] {
            change_mode(&db, &first.id, change(from, to, action)).await.unwrap();
        }

        let reopened = touch_inbound(&db, touch(contact, T1)).await.unwrap();
        assert_eq!(reopened.previous_id.as_deref(), Some(first.id.as_str()));
        assert_ne!(reopened.conversation.id, first.id);
        assert_eq!(reopened.conversation.mode, ConversationMode::Bot);

        let history = list_events(&db, &first.id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(list_for_contact(&db, contact).await.unwrap().len(), 2);

        let active = get_active(&db, contact, "t1").await.unwrap().unwrap();
        assert_eq!(active.id, reopened.conversation.id);
    }

    #[tokio::test]
    async fn mute_never_shortens() {
        let (db, _dir) = setup_db().await;
        let contact = seed_contacts(&db, 1).await[0];
        let conv = ensure_active(&db, contact, "t1", None).await.unwrap();

        let muted = mute_bot(&db, &conv.id, "2026-03-01T11:00:00.000Z", Actor::System, T0)
            .await
            .unwrap();
        assert_eq!(muted.mute_bot_until.as_deref(), Some("2026-03-01T11:00:00.000Z"));
        let muted = mute_bot(&db, &conv.id, "2026-03-01T10:30:00.000Z", Actor::System, T1)
            .await
            .unwrap();
        assert_eq!(muted.mute_bot_until.as_deref(), Some("2026-03-01T11:00:00.000Z"));
        assert_eq!(muted.mode, ConversationMode::Bot);

        let events = list_events(&db, &conv.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.action == HandoverAction::EchoMute));
    }

    #[tokio::test]
    async fn flow_state_round_trips_bytes() {
        let (db, _dir) = setup_db().await;
        let contact = seed_contacts(&db, 1).await[0];
        let conv = ensure_active(&db, contact, "t1", None).await.unwrap();

        let blob = vec![0u8, 159, 146, 150, 255];
        assert!(save_flow_state(&db, &conv.id, Some(blob.clone())).await.unwrap());
        let loaded = get_conversation(&db, &conv.id).await.unwrap().unwrap();
        assert_eq!(loaded.flow_state, Some(blob));

        assert!(record_agent_message(&db, &conv.id, T1).await.unwrap());
        let loaded = get_conversation(&db, &conv.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_agent_msg_at.as_deref(), Some(T1));
    }

    #[tokio::test]
    async fn events_cannot_be_rewritten() {
        let (db, _dir) = setup_db().await;
        let contact = seed_contacts(&db, 1).await[0];
        let conv = ensure_active(&db, contact, "t1", None).await.unwrap();
        mute_bot(&db, &conv.id, T1, Actor::System, T0).await.unwrap();

        let result = db
            .connection()
            .call(|conn| -> Result<usize, rusqlite::Error> {
                conn.execute("UPDATE handover_events SET action = 'close'", [])
            })
            .await;
        assert!(result.is_err());
        let result = db
            .connection()
            .call(|conn| -> Result<usize, rusqlite::Error> {
                conn.execute("DELETE FROM handover_events", [])
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stale_pending_listing() {
        let (db, _dir) = setup_db().await;
        let contact = seed_contacts(&db, 1).await[0];
        let conv = ensure_active(&db, contact, "t1", None).await.unwrap();
        change_mode(
            &db,
            &conv.id,
            change(ConversationMode::Bot, ConversationMode::HandoverPending, HandoverAction::Request),
        )
        .await
        .unwrap();

        assert!(list_stale_pending(&db, T0).await.unwrap().is_empty());
        assert_eq!(
            list_stale_pending(&db, "2026-03-01T10:20:00.000Z").await.unwrap(),
            vec![conv.id]
        );
    }
}
