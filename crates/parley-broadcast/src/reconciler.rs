// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery Status Reconciler.
//!
//! Status callbacks are at-least-once and unordered. The idempotency key is
//! `(message id, status)`: the first observation stamps the status column
//! (only if null) and moves the matching counter in the same transaction;
//! later observations change nothing.

use chrono::{DateTime, Utc};
use parley_core::ParleyError;
use parley_core::types::{StatusEntry, format_timestamp, now_timestamp, parse_timestamp};
use parley_storage::queries::{messages, recipients};
use parley_storage::{Database, InboundRecord, NewMessage, StatusApplication};
use tracing::{debug, info, warn};

/// What one callback delivery did, in aggregate.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// First observations on broadcast recipients that moved a counter.
    pub counted: usize,
    /// First observations stamped without a counter change.
    pub recorded: usize,
    pub duplicates: usize,
    pub unknown: usize,
}

/// Applies provider status callbacks to stored state.
#[derive(Clone)]
pub struct Reconciler {
    db: Database,
}

impl Reconciler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Apply one status entry.
    ///
    /// Broadcast recipients are matched first, then conversational messages.
    /// Fails with [`ParleyError::DuplicateCallback`] when the status was
    /// already recorded and [`ParleyError::UnknownMessageReference`] when
    /// neither table knows the id. Neither failure changes anything.
    pub async fn apply(&self, entry: &StatusEntry) -> Result<StatusApplication, ParleyError> {
        let at = normalize_timestamp(&entry.timestamp);
        let mut outcome =
            recipients::apply_delivery_status(&self.db, &entry.message_id, entry.status, &at)
                .await?;
        if outcome == StatusApplication::Unknown {
            outcome = messages::apply_status(&self.db, &entry.message_id, entry.status, &at).await?;
        }

        let label = match &outcome {
            StatusApplication::Counted { .. } => "counted",
            StatusApplication::Recorded => "recorded",
            StatusApplication::Duplicate => "duplicate",
            StatusApplication::Unknown => "unknown",
        };
        parley_prometheus::record_status_callback(&entry.status.to_string(), label);

        match outcome {
            StatusApplication::Duplicate => Err(ParleyError::DuplicateCallback {
                message_id: entry.message_id.clone(),
                status: entry.status.to_string(),
            }),
            StatusApplication::Unknown => Err(ParleyError::UnknownMessageReference {
                message_id: entry.message_id.clone(),
            }),
            applied => Ok(applied),
        }
    }

    /// Apply a callback delivery, absorbing duplicates and unknown ids.
    ///
    /// Only storage failures are returned; the caller should then ask the
    /// provider to redeliver.
    pub async fn apply_all(&self, entries: &[StatusEntry]) -> Result<ReconcileReport, ParleyError> {
        let mut report = ReconcileReport::default();
        for entry in entries {
            match self.apply(entry).await {
                Ok(StatusApplication::Counted { broadcast_id }) => {
                    debug!(
                        %broadcast_id,
                        message_id = %entry.message_id,
                        status = %entry.status,
                        "status counted"
                    );
                    report.counted += 1;
                }
                Ok(_) => report.recorded += 1,
                Err(ParleyError::DuplicateCallback { .. }) => report.duplicates += 1,
                Err(ParleyError::UnknownMessageReference { message_id }) => {
                    warn!(%message_id, status = %entry.status, "status for unknown message dropped");
                    report.unknown += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Credit an inbound message from `contact_id` as a reply to the last
    /// broadcast they were sent. Returns the broadcast credited, if any.
    pub async fn record_reply(
        &self,
        contact_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<String>, ParleyError> {
        let credited = recipients::count_reply(&self.db, contact_id, &format_timestamp(at)).await?;
        if let Some(broadcast_id) = &credited {
            info!(%broadcast_id, contact_id, "broadcast reply counted");
        }
        Ok(credited)
    }

    /// Store an inbound customer message and credit it as a broadcast reply,
    /// atomically. A redelivered message changes nothing.
    pub async fn record_inbound(
        &self,
        message: &NewMessage,
        at: DateTime<Utc>,
    ) -> Result<InboundRecord, ParleyError> {
        let record = messages::insert_inbound(&self.db, message, &format_timestamp(at)).await?;
        if let InboundRecord::Recorded {
            credited: Some(broadcast_id),
        } = &record
        {
            info!(%broadcast_id, contact_id = message.contact_id, "broadcast reply counted");
        }
        Ok(record)
    }
}

/// Provider timestamps are re-rendered in the storage format so stamps
/// compare lexically. Unparseable values fall back to the receive time.
fn normalize_timestamp(raw: &str) -> String {
    match parse_timestamp(raw) {
        Some(at) => format_timestamp(at),
        None => {
            debug!(raw, "unparseable status timestamp, using receive time");
            now_timestamp()
        }
    }
}
