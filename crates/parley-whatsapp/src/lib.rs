// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp Cloud API adapter for Parley.
//!
//! - [`WhatsAppSender`] implements `ChannelSender` for template sends.
//! - [`webhook`] parses notification payloads into status entries, inbound
//!   messages, and business-app echoes.
//! - [`signature`] checks `X-Hub-Signature-256`.

pub mod sender;
pub mod signature;
pub mod webhook;

pub use sender::WhatsAppSender;
pub use signature::verify_signature;
pub use webhook::{EchoMessage, InboundMessage, WebhookEvents, parse_webhook};
