// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation handover for the Parley messaging core.
//!
//! A conversation is driven by the bot until the customer asks for a person
//! or an agent requests the handover; a human agent then claims it and
//! eventually closes it. Pending handovers nobody claims return to the bot.

pub mod intent;
pub mod machine;
pub mod sweeper;

pub use intent::{HandoverIntent, PhraseIntent};
pub use machine::{ConversationService, InboundEvent, InboundOutcome};
pub use sweeper::run_sweeper;
