// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for the storage entities.
//!
//! Every function takes `&Database` and runs its statements inside a single
//! `call` on the writer thread. Multi-statement operations use a transaction.

pub mod batches;
pub mod broadcasts;
pub mod conversations;
pub mod counters;
pub mod directory;
pub mod handover;
pub mod messages;
pub mod recipients;

use std::str::FromStr;

use rusqlite::types::Type;

/// Parse a TEXT column into a strum enum.
pub(crate) fn parse_column<T>(idx: usize, value: String) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse a JSON TEXT column.
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    idx: usize,
    value: String,
) -> rusqlite::Result<T> {
    serde_json::from_str(&value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Serialize a value for a JSON TEXT column.
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::database::Database;
    use crate::models::{NewContact, PhoneNumber, Tenant};
    use crate::queries::directory;

    pub async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    /// Seed one tenant, one phone number, and `n` tagged contacts.
    pub async fn seed_contacts(db: &Database, n: usize) -> Vec<i64> {
        directory::insert_tenant(
            db,
            &Tenant {
                id: "t1".into(),
                echo_handover_mute_seconds: 600,
            },
        )
        .await
        .unwrap();
        directory::insert_phone_number(
            db,
            &PhoneNumber {
                id: "pn1".into(),
                tenant_id: "t1".into(),
                wa_phone_number_id: "1000001".into(),
                auto_handover_on_echo: true,
                echo_handover_mute_seconds: Some(300),
            },
        )
        .await
        .unwrap();

        let mut ids = Vec::with_capacity(n);
        for i in 0..n {
            let id = directory::insert_contact(
                db,
                &NewContact {
                    tenant_id: "t1".into(),
                    wa_id: format!("1555000{i:04}"),
                    phone_number_id: Some("pn1".into()),
                    tags: vec!["vip".into()],
                    opted_out: false,
                },
            )
            .await
            .unwrap();
            ids.push(id);
        }
        ids
    }
}
