// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cloud API webhook payloads.
//!
//! One notification can carry any mix of delivery statuses, inbound user
//! messages, and `smb_message_echoes` (messages a person sent from the
//! business app). Entries this core does not act on are skipped.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use parley_core::ParleyError;
use parley_core::types::{DeliveryStatus, StatusEntry, format_timestamp};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    value: ChangeValue,
}

#[derive(Debug, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    metadata: Option<Metadata>,
    #[serde(default)]
    statuses: Vec<RawStatus>,
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    message_echoes: Vec<RawEcho>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    phone_number_id: String,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    id: String,
    status: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    from: String,
    id: String,
    timestamp: String,
    #[serde(default)]
    text: Option<RawText>,
}

#[derive(Debug, Deserialize)]
struct RawEcho {
    to: String,
    id: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct RawText {
    body: String,
}

/// A message from a customer.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Provider id of the business number that received it.
    pub phone_number_id: String,
    /// Sender's WhatsApp id.
    pub from: String,
    pub message_id: String,
    /// Text body for text messages.
    pub text: Option<String>,
    pub at: DateTime<Utc>,
    /// The message object as received.
    pub raw: serde_json::Value,
}

/// A message sent from the business app and echoed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoMessage {
    pub phone_number_id: String,
    /// Recipient's WhatsApp id.
    pub to: String,
    pub message_id: String,
    pub at: DateTime<Utc>,
}

/// Everything actionable in one notification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookEvents {
    pub statuses: Vec<StatusEntry>,
    pub inbound: Vec<InboundMessage>,
    pub echoes: Vec<EchoMessage>,
}

/// Provider timestamps are epoch seconds as strings.
fn parse_epoch(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Parse a notification body.
///
/// Fails only when the body is not a notification at all; individual
/// entries with unknown statuses or bad timestamps are skipped.
pub fn parse_webhook(body: &[u8]) -> Result<WebhookEvents, ParleyError> {
    let notification: Notification = serde_json::from_slice(body).map_err(|e| {
        ParleyError::Channel {
            message: format!("malformed webhook payload: {e}"),
            source: Some(Box::new(e)),
        }
    })?;
    let raw_value: serde_json::Value = serde_json::from_slice(body).unwrap_or_default();

    let mut events = WebhookEvents::default();
    for (entry_idx, entry) in notification.entry.into_iter().enumerate() {
        for (change_idx, change) in entry.changes.into_iter().enumerate() {
            let value = change.value;
            let phone_number_id = value
                .metadata
                .map(|m| m.phone_number_id)
                .unwrap_or_default();

            for status in value.statuses {
                let Ok(parsed) = DeliveryStatus::from_str(&status.status) else {
                    debug!(status = %status.status, "ignoring unsupported status");
                    continue;
                };
                let Some(at) = parse_epoch(&status.timestamp) else {
                    debug!(message_id = %status.id, "ignoring status with bad timestamp");
                    continue;
                };
                events.statuses.push(StatusEntry {
                    message_id: status.id,
                    status: parsed,
                    timestamp: format_timestamp(at),
                });
            }

            for (msg_idx, msg) in value.messages.into_iter().enumerate() {
                let Some(at) = parse_epoch(&msg.timestamp) else {
                    debug!(message_id = %msg.id, "ignoring message with bad timestamp");
                    continue;
                };
                let raw = raw_value
                    .pointer(&format!(
                        "/entry/{entry_idx}/changes/{change_idx}/value/messages/{msg_idx}"
                    ))
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                events.inbound.push(InboundMessage {
                    phone_number_id: phone_number_id.clone(),
                    from: msg.from,
                    message_id: msg.id,
                    text: msg.text.map(|t| t.body),
                    at,
                    raw,
                });
            }

            for echo in value.message_echoes {
                let Some(at) = parse_epoch(&echo.timestamp) else {
                    continue;
                };
                events.echoes.push(EchoMessage {
                    phone_number_id: phone_number_id.clone(),
                    to: echo.to,
                    message_id: echo.id,
                    at,
                });
            }
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{
      "object": "whatsapp_business_account",
      "entry": [{
        "id": "WABA_ID",
        "changes": [
          {
            "field": "messages",
            "value": {
              "messaging_product": "whatsapp",
              "metadata": {"display_phone_number": "15550009999", "phone_number_id": "1098765"},
              "statuses": [
                {"id": "wamid.A", "status": "delivered", "timestamp": "1772359200", "recipient_id": "15550001"},
                {"id": "wamid.A", "status": "read", "timestamp": "1772359260", "recipient_id": "15550001"},
                {"id": "wamid.B", "status": "deleted", "timestamp": "1772359260", "recipient_id": "15550002"}
              ],
              "messages": [
                {"from": "15550001", "id": "wamid.IN", "timestamp": "1772359300", "type": "text", "text": {"body": "talk to a person"}},
                {"from": "15550002", "id": "wamid.IMG", "timestamp": "1772359301", "type": "image", "image": {"id": "media-1"}}
              ]
            }
          },
          {
            "field": "smb_message_echoes",
            "value": {
              "messaging_product": "whatsapp",
              "metadata": {"display_phone_number": "15550009999", "phone_number_id": "1098765"},
              "message_echoes": [
                {"from": "15550009999", "to": "15550001", "id": "wamid.ECHO", "timestamp": "1772359400", "type": "text", "text": {"body": "Hi, Dana here"}}
              ]
            }
          }
        ]
      }]
    }"#;

    #[test]
    fn parses_statuses_messages_and_echoes() {
        let events = parse_webhook(PAYLOAD.as_bytes()).unwrap();

        assert_eq!(events.statuses.len(), 2);
        assert_eq!(events.statuses[0].message_id, "wamid.A");
        assert_eq!(events.statuses[0].status, DeliveryStatus::Delivered);
        assert_eq!(events.statuses[0].timestamp, "2026-03-01T10:00:00.000Z");
        assert_eq!(events.statuses[1].status, DeliveryStatus::Read);

        assert_eq!(events.inbound.len(), 2);
        assert_eq!(events.inbound[0].text.as_deref(), Some("talk to a person"));
        assert_eq!(events.inbound[0].phone_number_id, "1098765");
        assert_eq!(events.inbound[1].text, None);
        assert_eq!(events.inbound[1].raw["image"]["id"], "media-1");

        assert_eq!(events.echoes.len(), 1);
        assert_eq!(events.echoes[0].to, "15550001");
        assert_eq!(events.echoes[0].phone_number_id, "1098765");
    }

    #[test]
    fn empty_notification_is_fine() {
        let events = parse_webhook(br#"{"object":"whatsapp_business_account","entry":[]}"#).unwrap();
        assert_eq!(events, WebhookEvents::default());
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(parse_webhook(b"not json").is_err());
    }
}
