// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Parley configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParleyConfig {
    /// Process identity and logging.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Broadcast scheduling and dispatch settings.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Conversation handover settings.
    #[serde(default)]
    pub handover: HandoverConfig,

    /// WhatsApp Cloud API settings.
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    /// HTTP ingress settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

/// Process identity configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Instance name, used in logs.
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_agent_name() -> String {
    "parley".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("parley").join("parley.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("parley.db"))
        .to_string_lossy()
        .to_string()
}

fn default_wal_mode() -> bool {
    true
}

/// Broadcast scheduling and dispatch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastConfig {
    /// Maximum recipients per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum concurrent sends within one claimed batch.
    #[serde(default = "default_send_concurrency")]
    pub send_concurrency: usize,

    /// Total send attempts per recipient before it is marked failed.
    #[serde(default = "default_max_send_attempts")]
    pub max_send_attempts: u32,

    /// First retry delay in milliseconds; doubles on each retry.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Upper bound on a single retry delay in milliseconds.
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Per-send timeout; expiry counts as a transient failure.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// A claimed batch older than this is considered abandoned and reclaimable.
    #[serde(default = "default_batch_lease_secs")]
    pub batch_lease_secs: u64,

    /// How often an idle dispatch worker polls for new batches.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            send_concurrency: default_send_concurrency(),
            max_send_attempts: default_max_send_attempts(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            send_timeout_secs: default_send_timeout_secs(),
            batch_lease_secs: default_batch_lease_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl BroadcastConfig {
    /// Longest one recipient can keep a worker busy: every attempt timing out
    /// plus the capped delay between attempts.
    pub fn worst_case_send(&self) -> std::time::Duration {
        let attempts = u64::from(self.max_send_attempts);
        let sending = attempts.saturating_mul(self.send_timeout_secs.saturating_mul(1000));
        let waiting = attempts.saturating_sub(1).saturating_mul(self.retry_max_ms);
        std::time::Duration::from_millis(sending.saturating_add(waiting))
    }
}

fn default_batch_size() -> usize {
    1000
}

fn default_send_concurrency() -> usize {
    8
}

fn default_max_send_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_max_ms() -> u64 {
    30_000
}

fn default_send_timeout_secs() -> u64 {
    15
}

fn default_batch_lease_secs() -> u64 {
    900
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Conversation handover configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HandoverConfig {
    /// How long a handover request waits for a human before returning to the bot.
    #[serde(default = "default_pending_timeout_secs")]
    pub pending_timeout_secs: u64,

    /// Echo mute duration used when neither phone number nor tenant sets one.
    #[serde(default = "default_echo_mute_seconds")]
    pub default_echo_mute_seconds: i64,

    /// Customer-service window opened by each inbound user message.
    #[serde(default = "default_session_window_secs")]
    pub session_window_secs: i64,

    /// Interval between pending-handover timeout sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Phrases that request a human when found in an inbound message.
    #[serde(default = "default_intent_phrases")]
    pub intent_phrases: Vec<String>,

    /// Regular expressions that request a human when matched.
    #[serde(default)]
    pub intent_patterns: Vec<String>,
}

impl Default for HandoverConfig {
    fn default() -> Self {
        Self {
            pending_timeout_secs: default_pending_timeout_secs(),
            default_echo_mute_seconds: default_echo_mute_seconds(),
            session_window_secs: default_session_window_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            intent_phrases: default_intent_phrases(),
            intent_patterns: Vec::new(),
        }
    }
}

fn default_pending_timeout_secs() -> u64 {
    900
}

fn default_echo_mute_seconds() -> i64 {
    300
}

fn default_session_window_secs() -> i64 {
    86_400
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_intent_phrases() -> Vec<String> {
    vec![
        "agent".to_string(),
        "human".to_string(),
        "talk to a person".to_string(),
    ]
}

/// WhatsApp Cloud API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WhatsAppConfig {
    /// Graph API access token. `None` disables sending.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Business phone number id used as the sender.
    #[serde(default)]
    pub phone_number_id: Option<String>,

    /// Graph API base URL.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Graph API version segment.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// App secret for `X-Hub-Signature-256` verification. `None` skips the check.
    #[serde(default)]
    pub app_secret: Option<String>,

    /// Token expected in the webhook subscription handshake.
    #[serde(default)]
    pub verify_token: Option<String>,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            phone_number_id: None,
            api_base_url: default_api_base_url(),
            api_version: default_api_version(),
            app_secret: None,
            verify_token: None,
        }
    }
}

fn default_api_base_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_api_version() -> String {
    "v22.0".to_string()
}

/// HTTP ingress configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Serve webhooks and the conversation API.
    #[serde(default = "default_gateway_enabled")]
    pub enabled: bool,

    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token for the conversation API. Webhooks are authenticated by signature.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: default_gateway_enabled(),
            host: default_host(),
            port: default_port(),
            bearer_token: None,
        }
    }
}

fn default_gateway_enabled() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3080
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PrometheusConfig {
    /// Install the recorder and expose `GET /metrics`.
    #[serde(default)]
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ParleyConfig::default();
        assert_eq!(config.broadcast.batch_size, 1000);
        assert_eq!(config.broadcast.max_send_attempts, 3);
        assert_eq!(config.handover.default_echo_mute_seconds, 300);
        assert_eq!(config.handover.session_window_secs, 86_400);
        assert!(config.gateway.enabled);
        assert!(!config.prometheus.enabled);
        assert!(config.storage.database_path.ends_with("parley.db"));
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: ParleyConfig = toml::from_str(
            r#"
[broadcast]
batch_size = 250
"#,
        )
        .unwrap();
        assert_eq!(config.broadcast.batch_size, 250);
        assert_eq!(config.broadcast.send_concurrency, 8);
        assert_eq!(config.handover.intent_phrases.len(), 3);
    }

    #[test]
    fn unknown_key_in_section_is_rejected() {
        let result = toml::from_str::<ParleyConfig>(
            r#"
[handover]
pending_timeout = 10
"#,
        );
        assert!(result.is_err());
    }
}
