// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bot-echo auto-mute.
//!
//! When a person replies from the business app on a number that is also
//! driven by the bot, the provider echoes that outgoing message back. The
//! echo mutes automated replies on the contact's live conversation for a
//! while, whatever its mode.

use chrono::{DateTime, Utc};
use parley_config::model::HandoverConfig;
use parley_core::ParleyError;
use parley_core::types::{Actor, Conversation, format_timestamp, timestamp_after};
use parley_storage::Database;
use parley_storage::queries::{conversations, directory};
use tracing::{debug, info};

/// An outgoing message echoed back by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoEvent {
    /// Provider id of the business phone number that sent it.
    pub wa_phone_number_id: String,
    /// WhatsApp id of the contact it was sent to.
    pub contact_wa_id: String,
    pub at: DateTime<Utc>,
}

/// Applies echo mutes.
#[derive(Clone)]
pub struct EchoHandler {
    db: Database,
    default_mute_seconds: i64,
}

impl EchoHandler {
    pub fn new(db: Database, config: &HandoverConfig) -> Self {
        Self {
            db,
            default_mute_seconds: config.default_echo_mute_seconds,
        }
    }

    /// Mute the bot on the contact's live conversation.
    ///
    /// Returns the muted conversation, or `None` when the number is unknown,
    /// has `auto_handover_on_echo` off, or the contact is not in the
    /// directory. The mute lasts the number's `echo_handover_mute_seconds`,
    /// falling back to the tenant default, counted from the echo's timestamp
    /// or from receipt, whichever is later.
    pub async fn handle(&self, event: &EchoEvent) -> Result<Option<Conversation>, ParleyError> {
        let Some(phone) = directory::find_phone_number(&self.db, &event.wa_phone_number_id).await?
        else {
            debug!(wa_phone_number_id = %event.wa_phone_number_id, "echo for unknown number");
            return Ok(None);
        };
        if !phone.auto_handover_on_echo {
            return Ok(None);
        }

        let mute_seconds = match phone.echo_handover_mute_seconds {
            Some(seconds) => seconds,
            None => directory::get_tenant(&self.db, &phone.tenant_id)
                .await?
                .map_or(self.default_mute_seconds, |t| t.echo_handover_mute_seconds),
        };

        let Some(contact) =
            directory::find_contact(&self.db, &phone.tenant_id, &event.contact_wa_id).await?
        else {
            debug!(tenant_id = %phone.tenant_id, "echo for unknown contact");
            return Ok(None);
        };

        let conversation =
            conversations::ensure_active(&self.db, contact.id, &phone.tenant_id, Some(&phone.id))
                .await?;
        // A late redelivery must not produce a mute that already ran out.
        let from = event.at.max(Utc::now());
        let until = timestamp_after(from, mute_seconds);
        let muted = conversations::mute_bot(
            &self.db,
            &conversation.id,
            &until,
            Actor::System,
            &format_timestamp(from),
        )
        .await?;

        parley_prometheus::record_handover("echo_mute");
        info!(
            conversation_id = %muted.id,
            mute_seconds,
            mute_bot_until = muted.mute_bot_until.as_deref().unwrap_or_default(),
            "bot muted by echo"
        );
        Ok(Some(muted))
    }
}
