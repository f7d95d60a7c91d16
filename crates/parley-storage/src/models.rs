// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain model types for storage entities.
//!
//! The canonical types live in `parley-core::types` for use across crate
//! boundaries. This module re-exports them and adds the input and outcome
//! types that only make sense at the storage layer.

pub use parley_core::types::{
    Actor, BatchStatus, Broadcast, BroadcastBatch, BroadcastContact, Contact, Conversation,
    ConversationMode, Counter, DeliveryStatus, HandoverAction, HandoverEvent, Message,
    MessageDirection, PhoneNumber, Tenant,
};

/// A recipient captured at scheduling time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientSeed {
    pub contact_id: i64,
    /// Address the dispatcher sends to.
    pub recipient: String,
}

/// Result of applying one delivery status to stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusApplication {
    /// First observation on a broadcast recipient; the broadcast counter moved.
    Counted { broadcast_id: String },
    /// First observation, stamped without moving a counter.
    Recorded,
    /// The status was already stamped for this message.
    Duplicate,
    /// No broadcast recipient or conversational message carries this id.
    Unknown,
}

/// A mode change on a conversation, guarded by the expected `from` mode.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeChange {
    pub from: ConversationMode,
    pub to: ConversationMode,
    pub action: HandoverAction,
    pub actor: Actor,
    /// Replaces `assigned_to_label` when set; leaves it untouched otherwise.
    pub assigned_to_label: Option<String>,
    pub at: String,
}

/// Inbound user activity on a (contact, tenant) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundTouch {
    pub contact_id: i64,
    pub tenant_id: String,
    pub phone_number_id: Option<String>,
    pub at: String,
    pub session_expires_at: String,
}

/// The live conversation after inbound activity.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundConversation {
    pub conversation: Conversation,
    /// Set when a closed conversation was voided and replaced.
    pub previous_id: Option<String>,
}

/// A conversational message to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub contact_id: i64,
    pub conversation_id: Option<String>,
    pub wam_id: String,
    pub direction: MessageDirection,
    pub body: String,
    pub sent_at: Option<String>,
}

/// Result of recording an inbound customer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundRecord {
    /// The provider id was recorded before; nothing changed.
    Duplicate,
    /// The message was stored; `credited` names the broadcast the reply was
    /// counted against, if any.
    Recorded { credited: Option<String> },
}

/// A contact to register in the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub tenant_id: String,
    pub wa_id: String,
    pub phone_number_id: Option<String>,
    pub tags: Vec<String>,
    pub opted_out: bool,
}
