// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reference data: tenants, phone numbers, and contacts.
//!
//! The messaging core only reads these. The insert functions exist for
//! provisioning tools and tests.

use parley_core::ParleyError;
use rusqlite::{OptionalExtension, params};

use crate::database::Database;
use crate::models::{Contact, NewContact, PhoneNumber, Tenant};
use crate::queries::{parse_json, to_json};

const CONTACT_SELECT: &str = "SELECT c.id, c.tenant_id, c.wa_id, c.phone_number_id, c.opted_out,
    (SELECT json_group_array(t.tag) FROM contact_tags t WHERE t.contact_id = c.id)
    FROM contacts c";

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let mut tags: Vec<String> = parse_json(5, row.get(5)?)?;
    tags.sort();
    Ok(Contact {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        wa_id: row.get(2)?,
        phone_number_id: row.get(3)?,
        opted_out: row.get(4)?,
        tags,
    })
}

fn row_to_phone_number(row: &rusqlite::Row<'_>) -> rusqlite::Result<PhoneNumber> {
    Ok(PhoneNumber {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        wa_phone_number_id: row.get(2)?,
        auto_handover_on_echo: row.get(3)?,
        echo_handover_mute_seconds: row.get(4)?,
    })
}

/// Insert a tenant.
pub async fn insert_tenant(db: &Database, tenant: &Tenant) -> Result<(), ParleyError> {
    let tenant = tenant.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO tenants (id, echo_handover_mute_seconds) VALUES (?1, ?2)",
                params![tenant.id, tenant.echo_handover_mute_seconds],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a tenant by ID.
pub async fn get_tenant(db: &Database, id: &str) -> Result<Option<Tenant>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT id, echo_handover_mute_seconds FROM tenants WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Tenant {
                        id: row.get(0)?,
                        echo_handover_mute_seconds: row.get(1)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Insert a business phone number.
pub async fn insert_phone_number(db: &Database, phone: &PhoneNumber) -> Result<(), ParleyError> {
    let phone = phone.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO phone_numbers
                    (id, tenant_id, wa_phone_number_id, auto_handover_on_echo, echo_handover_mute_seconds)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    phone.id,
                    phone.tenant_id,
                    phone.wa_phone_number_id,
                    phone.auto_handover_on_echo,
                    phone.echo_handover_mute_seconds,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Look up a phone number by the provider's phone number id.
pub async fn find_phone_number(
    db: &Database,
    wa_phone_number_id: &str,
) -> Result<Option<PhoneNumber>, ParleyError> {
    let wa_id = wa_phone_number_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT id, tenant_id, wa_phone_number_id, auto_handover_on_echo,
                        echo_handover_mute_seconds
                 FROM phone_numbers WHERE wa_phone_number_id = ?1",
                params![wa_id],
                row_to_phone_number,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Insert a contact and its tags. Returns the new contact id.
pub async fn insert_contact(db: &Database, contact: &NewContact) -> Result<i64, ParleyError> {
    let contact = contact.clone();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO contacts (tenant_id, wa_id, phone_number_id, opted_out)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    contact.tenant_id,
                    contact.wa_id,
                    contact.phone_number_id,
                    contact.opted_out,
                ],
            )?;
            let id = tx.last_insert_rowid();
            for tag in &contact.tags {
                tx.execute(
                    "INSERT OR IGNORE INTO contact_tags (contact_id, tag) VALUES (?1, ?2)",
                    params![id, tag],
                )?;
            }
            tx.commit()?;
            Ok(id)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a contact by ID.
pub async fn get_contact(db: &Database, id: i64) -> Result<Option<Contact>, ParleyError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("{CONTACT_SELECT} WHERE c.id = ?1"),
                params![id],
                row_to_contact,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Find a tenant's contact by WhatsApp id.
pub async fn find_contact(
    db: &Database,
    tenant_id: &str,
    wa_id: &str,
) -> Result<Option<Contact>, ParleyError> {
    let tenant_id = tenant_id.to_string();
    let wa_id = wa_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("{CONTACT_SELECT} WHERE c.tenant_id = ?1 AND c.wa_id = ?2"),
                params![tenant_id, wa_id],
                row_to_contact,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Mark a contact as opted out of broadcasts.
pub async fn set_opted_out(db: &Database, id: i64, opted_out: bool) -> Result<(), ParleyError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE contacts SET opted_out = ?2 WHERE id = ?1",
                params![id, opted_out],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Contacts eligible for a broadcast, in ascending id order.
///
/// A contact is eligible when it has not opted out and, if `tags` is
/// non-empty, carries at least one of them.
pub async fn eligible_contacts(
    db: &Database,
    tags: &[String],
) -> Result<Vec<Contact>, ParleyError> {
    let any_tag = !tags.is_empty();
    let tags = tags.to_vec();
    db.connection()
        .call(move |conn| {
            let tags_json = to_json(&tags)?;
            let mut stmt = conn.prepare(&format!(
                "{CONTACT_SELECT}
                 WHERE c.opted_out = 0
                   AND (?1 = 0 OR EXISTS (
                        SELECT 1 FROM contact_tags t
                        WHERE t.contact_id = c.id
                          AND t.tag IN (SELECT value FROM json_each(?2))))
                 ORDER BY c.id ASC"
            ))?;
            let rows = stmt.query_map(params![any_tag, tags_json], row_to_contact)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}
