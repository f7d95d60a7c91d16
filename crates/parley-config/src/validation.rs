// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that serde attributes cannot express.

use crate::diagnostic::ConfigError;
use crate::model::ParleyConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Collects every failure instead of stopping at the first one.
pub fn validate_config(config: &ParleyConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    let b = &config.broadcast;
    if b.batch_size == 0 {
        fail("broadcast.batch_size must be at least 1".to_string());
    }
    if b.send_concurrency == 0 {
        fail("broadcast.send_concurrency must be at least 1".to_string());
    }
    if b.max_send_attempts == 0 {
        fail("broadcast.max_send_attempts must be at least 1".to_string());
    }
    if b.retry_base_ms > b.retry_max_ms {
        fail(format!(
            "broadcast.retry_base_ms ({}) must not exceed broadcast.retry_max_ms ({})",
            b.retry_base_ms, b.retry_max_ms
        ));
    }
    if b.send_timeout_secs == 0 {
        fail("broadcast.send_timeout_secs must be at least 1".to_string());
    }
    let worst = b.worst_case_send();
    if b.batch_lease_secs.saturating_mul(1000) <= worst.as_millis() as u64 {
        fail(format!(
            "broadcast.batch_lease_secs ({}) must exceed the longest send to one recipient \
             ({}s: max_send_attempts x send_timeout_secs plus retry delays)",
            b.batch_lease_secs,
            worst.as_secs_f64().ceil() as u64
        ));
    }

    let h = &config.handover;
    if h.default_echo_mute_seconds < 0 {
        fail(format!(
            "handover.default_echo_mute_seconds must be non-negative, got {}",
            h.default_echo_mute_seconds
        ));
    }
    if h.session_window_secs <= 0 {
        fail(format!(
            "handover.session_window_secs must be positive, got {}",
            h.session_window_secs
        ));
    }
    for pattern in &h.intent_patterns {
        if pattern.trim().is_empty() {
            fail("handover.intent_patterns must not contain empty patterns".to_string());
        }
    }

    let host = config.gateway.host.trim();
    if host.is_empty() {
        fail("gateway.host must not be empty".to_string());
    } else {
        let is_valid_ip = host.parse::<std::net::IpAddr>().is_ok();
        let is_valid_hostname = host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-');
        if !is_valid_ip && !is_valid_hostname {
            fail(format!(
                "gateway.host `{host}` is not a valid IP address or hostname"
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
