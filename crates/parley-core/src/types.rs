// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared by the storage, broadcast, and conversation crates.
//!
//! Timestamps are stored as fixed-width ISO 8601 UTC strings
//! (`2026-01-01T00:00:00.000Z`) so that lexical order equals time order,
//! both in Rust and inside SQL comparisons.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Timestamp format used for every persisted instant.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Format an instant in the canonical storage format.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// The current instant in the canonical storage format.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// `at + seconds` in the canonical storage format.
pub fn timestamp_after(at: DateTime<Utc>, seconds: i64) -> String {
    format_timestamp(at + Duration::seconds(seconds))
}

/// Parse a stored timestamp. Accepts any RFC 3339 string.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Provider-assigned identifier of a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Channel,
    Storage,
    Observability,
}

// --- Broadcasts ---

/// Claim state of a broadcast batch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Unclaimed,
    Claimed,
    Done,
    Cancelled,
}

/// Delivery status reported by the provider for one message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    /// The per-recipient timestamp column this status stamps.
    pub fn timestamp_column(self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent_at",
            DeliveryStatus::Delivered => "delivered_at",
            DeliveryStatus::Read => "read_at",
            DeliveryStatus::Failed => "failed_at",
        }
    }

    /// The broadcast counter this status feeds.
    pub fn counter(self) -> Counter {
        match self {
            DeliveryStatus::Sent => Counter::Sent,
            DeliveryStatus::Delivered => Counter::Delivered,
            DeliveryStatus::Read => Counter::Read,
            DeliveryStatus::Failed => Counter::Failed,
        }
    }
}

/// Aggregate counters kept on a broadcast row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    Scheduled,
    Processed,
    Sent,
    Delivered,
    Read,
    Failed,
    Replied,
}

impl Counter {
    /// Column name on the `broadcasts` table.
    pub fn column(self) -> &'static str {
        match self {
            Counter::Scheduled => "scheduled_count",
            Counter::Processed => "processed_count",
            Counter::Sent => "sent_count",
            Counter::Delivered => "delivered_count",
            Counter::Read => "read_count",
            Counter::Failed => "failed_count",
            Counter::Replied => "replied_count",
        }
    }
}

/// A bulk-send campaign to a filtered contact set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: String,
    pub name: String,
    pub template_name: String,
    pub language: String,
    /// Recipient filter. Empty means every eligible contact.
    pub contact_tags: Vec<String>,
    pub scheduled_count: i64,
    pub processed_count: i64,
    pub sent_count: i64,
    pub delivered_count: i64,
    pub read_count: i64,
    pub failed_count: i64,
    pub replied_count: i64,
    pub created_at: String,
    pub cancelled_at: Option<String>,
}

/// A fixed-size partition of a broadcast's recipients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastBatch {
    pub id: String,
    pub broadcast_id: String,
    pub status: BatchStatus,
    pub scheduled_count: i64,
    pub sent_count: i64,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub created_at: String,
    /// Identifies the current claim; rotated on every claim.
    pub claim_token: Option<String>,
    /// Last lease renewal by the worker holding the claim.
    pub heartbeat_at: Option<String>,
}

/// One recipient of one broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastContact {
    pub id: String,
    pub broadcast_id: String,
    pub batch_id: String,
    pub contact_id: i64,
    /// Recipient address captured at scheduling time.
    pub recipient: String,
    /// Provider message id, set once the send is accepted.
    pub wam_id: Option<String>,
    pub send_attempts: i64,
    pub processed_at: Option<String>,
    pub sent_at: Option<String>,
    pub delivered_at: Option<String>,
    pub read_at: Option<String>,
    pub failed_at: Option<String>,
    pub replied_at: Option<String>,
    pub reply_counted: bool,
    pub failure_reason: Option<String>,
    pub created_at: String,
}

impl BroadcastContact {
    /// Whether the dispatcher has already reached an outcome for this recipient.
    pub fn is_terminal(&self) -> bool {
        self.sent_at.is_some() || self.failed_at.is_some()
    }
}

/// A template send request handed to a [`ChannelSender`](crate::ChannelSender).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundTemplate {
    /// Recipient address (E.164 without `+` for WhatsApp).
    pub to: String,
    pub template_name: String,
    pub language: String,
    /// Pre-rendered template components, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<serde_json::Value>,
}

/// One delivery status callback entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub message_id: String,
    pub status: DeliveryStatus,
    pub timestamp: String,
}

// --- Conversations ---

/// Who currently drives a conversation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    Bot,
    HandoverPending,
    Human,
    Closed,
}

/// Action recorded in the handover audit log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HandoverAction {
    Request,
    Claim,
    TimeoutReturn,
    Close,
    EchoMute,
}

/// The party that caused a handover event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    Bot,
    Agent { id: String, label: String },
    System,
}

impl Actor {
    /// Convenience constructor for a human agent.
    pub fn agent(id: impl Into<String>, label: impl Into<String>) -> Self {
        Actor::Agent {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// The current-state row of a customer conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub contact_id: i64,
    pub tenant_id: String,
    pub phone_number_id: Option<String>,
    pub mode: ConversationMode,
    /// Opaque bot-flow state. Persisted and returned byte for byte.
    pub flow_state: Option<Vec<u8>>,
    pub mute_bot_until: Option<String>,
    pub assigned_to_label: Option<String>,
    pub last_agent_msg_at: Option<String>,
    pub last_user_msg_at: Option<String>,
    pub session_expires_at: Option<String>,
    pub mode_changed_at: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Conversation {
    /// Whether automated replies are suppressed at `now`, regardless of mode.
    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        self.mute_bot_until
            .as_deref()
            .and_then(parse_timestamp)
            .is_some_and(|until| until > now)
    }

    /// Whether the bot engine may auto-reply at `now`.
    pub fn bot_may_reply(&self, now: DateTime<Utc>) -> bool {
        self.mode == ConversationMode::Bot && !self.is_muted_at(now)
    }
}

/// Immutable audit log entry for a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoverEvent {
    pub id: i64,
    pub conversation_id: String,
    pub action: HandoverAction,
    pub actor: Actor,
    pub at: String,
}

/// Direction of a conversational message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

/// A conversational (non-broadcast) message with its own delivery stamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub contact_id: i64,
    pub conversation_id: Option<String>,
    pub wam_id: String,
    pub direction: MessageDirection,
    /// Raw provider payload, kept as JSON text.
    pub body: String,
    pub sent_at: Option<String>,
    pub delivered_at: Option<String>,
    pub read_at: Option<String>,
    pub failed_at: Option<String>,
    pub created_at: String,
}

// --- Reference data (read-only to the core) ---

/// A messaging contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub tenant_id: String,
    pub wa_id: String,
    pub phone_number_id: Option<String>,
    pub tags: Vec<String>,
    pub opted_out: bool,
}

/// A business phone number and its echo policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneNumber {
    pub id: String,
    pub tenant_id: String,
    pub wa_phone_number_id: String,
    pub auto_handover_on_echo: bool,
    /// Overrides the tenant default when set.
    pub echo_handover_mute_seconds: Option<i64>,
}

/// Tenant-level defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub echo_handover_mute_seconds: i64,
}
