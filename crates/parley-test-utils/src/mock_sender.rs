// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock channel sender for deterministic testing.
//!
//! `MockSender` implements `ChannelSender` with outcomes scripted per
//! recipient and captures every attempt for assertion in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use parley_core::traits::adapter::PluginAdapter;
use parley_core::traits::channel::ChannelSender;
use parley_core::types::{AdapterType, HealthStatus, MessageId, OutboundTemplate};
use parley_core::ParleyError;

/// One scripted result for a single send attempt.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Accept the send and return a fresh provider id.
    Accept,
    /// Fail with `TransientSend`.
    Transient,
    /// Fail with `PermanentSend`.
    Permanent,
    /// Sleep before accepting. Used to trigger dispatcher timeouts.
    Stall(Duration),
}

/// A mock channel sender for testing.
///
/// Each recipient has a queue of outcomes consumed one per attempt. When the
/// queue is empty the send is accepted.
pub struct MockSender {
    scripts: Arc<Mutex<HashMap<String, VecDeque<SendOutcome>>>>,
    attempts: Arc<Mutex<Vec<OutboundTemplate>>>,
    accepted: Arc<Mutex<Vec<(String, MessageId)>>>,
}

impl MockSender {
    /// Create a sender that accepts everything.
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(Mutex::new(HashMap::new())),
            attempts: Arc::new(Mutex::new(Vec::new())),
            accepted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue outcomes for one recipient address, in attempt order.
    pub async fn script(&self, recipient: &str, outcomes: Vec<SendOutcome>) {
        self.scripts
            .lock()
            .await
            .entry(recipient.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Every attempt made, in call order.
    pub async fn attempts(&self) -> Vec<OutboundTemplate> {
        self.attempts.lock().await.clone()
    }

    /// Number of attempts made for one recipient.
    pub async fn attempts_for(&self, recipient: &str) -> usize {
        self.attempts
            .lock()
            .await
            .iter()
            .filter(|m| m.to == recipient)
            .count()
    }

    /// Accepted sends as `(recipient, provider id)` pairs.
    pub async fn accepted(&self) -> Vec<(String, MessageId)> {
        self.accepted.lock().await.clone()
    }

    /// Provider id of the accepted send to `recipient`, if any.
    pub async fn accepted_id(&self, recipient: &str) -> Option<MessageId> {
        self.accepted
            .lock()
            .await
            .iter()
            .find(|(to, _)| to == recipient)
            .map(|(_, id)| id.clone())
    }
}

impl Default for MockSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockSender {
    fn name(&self) -> &str {
        "mock-sender"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Channel
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), ParleyError> {
        Ok(())
    }
}

#[async_trait]
impl ChannelSender for MockSender {
    async fn send_template(&self, msg: OutboundTemplate) -> Result<MessageId, ParleyError> {
        self.attempts.lock().await.push(msg.clone());

        let outcome = self
            .scripts
            .lock()
            .await
            .get_mut(&msg.to)
            .and_then(VecDeque::pop_front)
            .unwrap_or(SendOutcome::Accept);

        match outcome {
            SendOutcome::Accept => {}
            SendOutcome::Transient => {
                return Err(ParleyError::TransientSend {
                    message: "mock: rate limited".to_string(),
                });
            }
            SendOutcome::Permanent => {
                return Err(ParleyError::PermanentSend {
                    message: "mock: invalid recipient".to_string(),
                });
            }
            SendOutcome::Stall(delay) => tokio::time::sleep(delay).await,
        }

        let id = MessageId(format!("wamid.mock-{}", uuid::Uuid::new_v4()));
        self.accepted.lock().await.push((msg.to, id.clone()));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(to: &str) -> OutboundTemplate {
        OutboundTemplate {
            to: to.to_string(),
            template_name: "spring_sale".to_string(),
            language: "en_US".to_string(),
            components: None,
        }
    }

    #[tokio::test]
    async fn unscripted_sends_are_accepted() {
        let sender = MockSender::new();
        let id = sender.send_template(template("15550001")).await.unwrap();
        assert!(id.0.starts_with("wamid.mock-"));
        assert_eq!(sender.accepted_id("15550001").await, Some(id));
    }

    #[tokio::test]
    async fn scripted_outcomes_play_in_order() {
        let sender = MockSender::new();
        sender
            .script("15550001", vec![SendOutcome::Transient, SendOutcome::Permanent])
            .await;

        let first = sender.send_template(template("15550001")).await.unwrap_err();
        assert!(first.is_transient());
        let second = sender.send_template(template("15550001")).await.unwrap_err();
        assert!(matches!(second, ParleyError::PermanentSend { .. }));
        assert!(sender.send_template(template("15550001")).await.is_ok());

        assert_eq!(sender.attempts_for("15550001").await, 3);
        assert_eq!(sender.accepted().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stall_delays_the_send() {
        let sender = MockSender::new();
        sender
            .script("15550001", vec![SendOutcome::Stall(Duration::from_secs(30))])
            .await;
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            sender.send_template(template("15550001")),
        )
        .await;
        assert!(result.is_err());
    }
}
