// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Parley messaging core.

use thiserror::Error;

/// The primary error type used across all Parley crates.
///
/// Only [`ParleyError::Storage`] is fatal to a running process. Every other
/// variant is recovered locally by the component that observes it.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Channel transport errors that carry no transient/permanent classification.
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Network failure, timeout, or rate limit. Retried with backoff.
    #[error("transient send error: {message}")]
    TransientSend { message: String },

    /// Invalid recipient or template. Never retried.
    #[error("permanent send error: {message}")]
    PermanentSend { message: String },

    /// The status was already recorded for this message.
    #[error("duplicate {status} callback for message {message_id}")]
    DuplicateCallback { message_id: String, status: String },

    /// A status callback referenced a message id this system never sent.
    #[error("unknown message reference: {message_id}")]
    UnknownMessageReference { message_id: String },

    /// Another worker won the claim on this batch.
    #[error("batch {batch_id} already claimed")]
    BatchAlreadyClaimed { batch_id: String },

    /// The lease on a claimed batch expired and the claim was taken away.
    #[error("lease on batch {batch_id} lost")]
    BatchLeaseLost { batch_id: String },

    /// A conversation transition was attempted from the wrong mode.
    #[error("invalid transition `{action}` for conversation {conversation_id} in mode {mode}")]
    InvalidTransition {
        conversation_id: String,
        mode: String,
        action: String,
    },

    /// The broadcast filter matched no eligible contacts.
    #[error("no eligible recipients for broadcast `{broadcast}`")]
    EmptyRecipientSet { broadcast: String },

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ParleyError {
    /// Whether a failed send should be retried.
    ///
    /// Unclassified channel errors are treated as transient so that a flaky
    /// transport never burns a recipient on the first attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ParleyError::TransientSend { .. }
                | ParleyError::Timeout { .. }
                | ParleyError::Channel { .. }
        )
    }

    /// Whether this error should take the process down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ParleyError::Storage { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_error_classification() {
        assert!(ParleyError::TransientSend { message: "429".into() }.is_transient());
        assert!(
            ParleyError::Timeout {
                duration: std::time::Duration::from_secs(15)
            }
            .is_transient()
        );
        assert!(
            ParleyError::Channel {
                message: "connection reset".into(),
                source: None
            }
            .is_transient()
        );
        assert!(!ParleyError::PermanentSend { message: "bad number".into() }.is_transient());
        assert!(!ParleyError::Internal("x".into()).is_transient());
    }

    #[test]
    fn only_storage_is_fatal() {
        let storage = ParleyError::Storage {
            source: Box::new(std::io::Error::other("disk gone")),
        };
        assert!(storage.is_fatal());
        assert!(!ParleyError::EmptyRecipientSet { broadcast: "b".into() }.is_fatal());
        assert!(
            !ParleyError::UnknownMessageReference {
                message_id: "wamid.x".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn invalid_transition_message_names_mode_and_action() {
        let err = ParleyError::InvalidTransition {
            conversation_id: "c1".into(),
            mode: "human".into(),
            action: "request".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("request"));
        assert!(msg.contains("human"));
    }
}
