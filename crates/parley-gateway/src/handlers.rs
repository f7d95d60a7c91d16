// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the gateway.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use parley_core::ParleyError;
use parley_core::types::{Actor, Conversation, HandoverEvent};
use serde::{Deserialize, Serialize};

use crate::server::GatewayState;

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Query string of the subscription handshake.
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Body for transitions that record who acted.
#[derive(Debug, Default, Deserialize)]
pub struct TransitionRequest {
    /// Defaults to `system` when omitted.
    #[serde(default)]
    pub actor: Option<Actor>,
}

/// Body for POST /v1/conversations/{id}/claim.
#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub agent_id: String,
    pub label: String,
}

/// Maps core errors to HTTP statuses.
pub struct ApiError(ParleyError);

impl From<ParleyError> for ApiError {
    fn from(e: ParleyError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ParleyError::NotFound { .. } => StatusCode::NOT_FOUND,
            ParleyError::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.health.start_time.elapsed().as_secs(),
    })
}

/// GET /metrics
///
/// Prometheus text format, or 404 when the exporter is disabled.
pub async fn get_metrics(State(state): State<GatewayState>) -> Response {
    match &state.health.prometheus_render {
        Some(render) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /webhook
///
/// Echoes `hub.challenge` when the mode is `subscribe` and the token matches.
pub async fn verify_webhook(
    State(state): State<GatewayState>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let Some(expected) = state.webhook.verify_token.as_deref() else {
        tracing::warn!("webhook handshake attempted but no verify_token is configured");
        return StatusCode::FORBIDDEN.into_response();
    };
    let token_ok = params.verify_token.as_deref() == Some(expected);
    match (params.mode.as_deref(), params.challenge) {
        (Some("subscribe"), Some(challenge)) if token_ok => {
            tracing::info!("webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        _ => StatusCode::FORBIDDEN.into_response(),
    }
}

/// POST /webhook
///
/// 200 once everything in the notification is applied; 500 on storage
/// failure so the provider redelivers.
pub async fn receive_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = state.webhook.app_secret.as_deref() {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !parley_whatsapp::verify_signature(secret, &body, signature) {
            tracing::warn!("webhook rejected: bad signature");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let events = match parley_whatsapp::parse_webhook(&body) {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(error = %e, "webhook rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    match state.processor.process(&events).await {
        Ok(report) => {
            tracing::debug!(?report, "webhook processed");
            StatusCode::OK.into_response()
        }
        Err(e) => ApiError(e).into_response(),
    }
}

/// GET /v1/conversations/{id}
pub async fn get_conversation(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    Ok(Json(state.processor.conversations().get(&id).await?))
}

/// GET /v1/conversations/{id}/events
pub async fn get_conversation_events(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<HandoverEvent>>, ApiError> {
    let service = state.processor.conversations();
    service.get(&id).await?;
    Ok(Json(service.events(&id).await?))
}

/// POST /v1/conversations/{id}/request
pub async fn request_handover(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Option<Json<TransitionRequest>>,
) -> Result<Json<Conversation>, ApiError> {
    let actor = actor_or_system(body);
    Ok(Json(
        state
            .processor
            .conversations()
            .request_handover(&id, actor)
            .await?,
    ))
}

/// POST /v1/conversations/{id}/claim
pub async fn claim(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Json(body): Json<ClaimRequest>,
) -> Result<Json<Conversation>, ApiError> {
    Ok(Json(
        state
            .processor
            .conversations()
            .claim(&id, &body.agent_id, &body.label)
            .await?,
    ))
}

/// POST /v1/conversations/{id}/close
pub async fn close(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Option<Json<TransitionRequest>>,
) -> Result<Json<Conversation>, ApiError> {
    let actor = actor_or_system(body);
    Ok(Json(state.processor.conversations().close(&id, actor).await?))
}

/// POST /v1/conversations/{id}/agent-messages
///
/// Records that an agent replied just now.
pub async fn record_agent_message(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .processor
        .conversations()
        .record_agent_message(&id, Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn actor_or_system(body: Option<Json<TransitionRequest>>) -> Actor {
    body.and_then(|Json(b)| b.actor).unwrap_or(Actor::System)
}
