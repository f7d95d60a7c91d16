// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the Cloud API messages endpoint.
//!
//! Retries are the dispatcher's job; this client only classifies failures.
//! 429, 5xx, and network errors are transient, any other non-success status
//! is permanent.

use std::time::Duration;

use async_trait::async_trait;
use parley_config::model::WhatsAppConfig;
use parley_core::types::{AdapterType, HealthStatus, MessageId, OutboundTemplate};
use parley_core::{ChannelSender, ParleyError, PluginAdapter};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    messaging_product: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    template: TemplateBody<'a>,
}

#[derive(Debug, Serialize)]
struct TemplateBody<'a> {
    name: &'a str,
    language: Language<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    components: Option<&'a serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct Language<'a> {
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

/// Template sender for one business phone number.
#[derive(Debug, Clone)]
pub struct WhatsAppSender {
    client: reqwest::Client,
    endpoint: String,
}

impl WhatsAppSender {
    /// Creates a sender for `phone_number_id`.
    ///
    /// `api_base_url` is the Graph API root, e.g. `https://graph.facebook.com`.
    pub fn new(
        access_token: &str,
        phone_number_id: &str,
        api_base_url: &str,
        api_version: &str,
    ) -> Result<Self, ParleyError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}")).map_err(|e| {
                ParleyError::Config(format!("invalid access token header value: {e}"))
            })?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ParleyError::Channel {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/{api_version}/{phone_number_id}/messages",
                api_base_url.trim_end_matches('/')
            ),
        })
    }

    /// Build from the `[whatsapp]` section; token and phone number id are required.
    pub fn from_config(config: &WhatsAppConfig) -> Result<Self, ParleyError> {
        let token = config
            .access_token
            .as_deref()
            .ok_or_else(|| ParleyError::Config("whatsapp.access_token is not set".into()))?;
        let phone = config
            .phone_number_id
            .as_deref()
            .ok_or_else(|| ParleyError::Config("whatsapp.phone_number_id is not set".into()))?;
        Self::new(token, phone, &config.api_base_url, &config.api_version)
    }

    /// The messages endpoint this sender posts to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Whether a non-success status is worth retrying.
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl PluginAdapter for WhatsAppSender {
    fn name(&self) -> &str {
        "whatsapp"
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
impl ChannelSender for WhatsAppSender {
    async fn send_template(&self, msg: OutboundTemplate) -> Result<MessageId, ParleyError> {
        let body = SendRequest {
            messaging_product: "whatsapp",
            to: &msg.to,
            kind: "template",
            template: TemplateBody {
                name: &msg.template_name,
                language: Language { code: &msg.language },
                components: msg.components.as_ref(),
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ParleyError::TransientSend {
                message: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        debug!(status = %status, "send response received");
        let text = response.text().await.map_err(|e| ParleyError::TransientSend {
            message: format!("failed to read response body: {e}"),
        })?;

        if status.is_success() {
            let parsed: SendResponse =
                serde_json::from_str(&text).map_err(|e| ParleyError::PermanentSend {
                    message: format!("unparseable send response: {e}"),
                })?;
            return parsed
                .messages
                .into_iter()
                .next()
                .map(|m| MessageId(m.id))
                .ok_or_else(|| ParleyError::PermanentSend {
                    message: "send response carried no message id".into(),
                });
        }

        let detail = match serde_json::from_str::<ApiErrorResponse>(&text) {
            Ok(api) => match api.error.code {
                Some(code) => format!("WhatsApp API error {code}: {}", api.error.message),
                None => format!("WhatsApp API error: {}", api.error.message),
            },
            Err(_) => format!("API returned {status}: {text}"),
        };

        if is_transient_status(status) {
            Err(ParleyError::TransientSend { message: detail })
        } else {
            Err(ParleyError::PermanentSend { message: detail })
        }
    }
}
