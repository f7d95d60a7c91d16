// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel-send capability consumed by the batch dispatcher.

use async_trait::async_trait;

use crate::error::ParleyError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{MessageId, OutboundTemplate};

/// Outbound half of a messaging provider.
///
/// A successful send returns the provider message id; delivery may still be
/// pending and is reported later through status callbacks. Failures must be
/// classified: [`ParleyError::TransientSend`] for network errors, timeouts, and
/// rate limiting, [`ParleyError::PermanentSend`] for an invalid recipient or
/// template.
#[async_trait]
pub trait ChannelSender: PluginAdapter {
    /// Sends a template message to a single recipient.
    async fn send_template(&self, msg: OutboundTemplate) -> Result<MessageId, ParleyError>;
}
