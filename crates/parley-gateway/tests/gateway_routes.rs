// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Route-level tests: webhook ingestion through to the conversation API.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use hmac::{Hmac, Mac};
use parley_broadcast::{EchoHandler, Reconciler};
use parley_conversation::ConversationService;
use parley_core::types::{Conversation, ConversationMode, HandoverAction, HandoverEvent};
use parley_gateway::{
    AuthConfig, GatewayState, HealthState, WebhookAuth, WebhookProcessor, router,
};
use parley_storage::queries::{conversations, directory};
use parley_test_utils::TestHarness;
use parley_test_utils::harness::{TENANT_ID, WA_PHONE_NUMBER_ID};
use sha2::Sha256;
use tower::ServiceExt;

const SECRET: &str = "app-secret";
const TOKEN: &str = "api-token";

fn app(harness: &TestHarness) -> Router {
    let db = harness.db.clone();
    let processor = WebhookProcessor::new(
        db.clone(),
        Reconciler::new(db.clone()),
        ConversationService::from_config(db.clone(), &harness.config.handover).unwrap(),
        EchoHandler::new(db, &harness.config.handover),
    );
    router(GatewayState {
        processor,
        webhook: WebhookAuth {
            app_secret: Some(SECRET.to_string()),
            verify_token: Some("verify-me".to_string()),
        },
        auth: AuthConfig {
            bearer_token: Some(TOKEN.to_string()),
        },
        health: HealthState {
            start_time: std::time::Instant::now(),
            prometheus_render: Some(Arc::new(|| "parley_sends_total 0\n".to_string())),
        },
    })
}

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn inbound_payload(from: &str, id: &str, text: &str) -> String {
    serde_json::json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "WABA",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": {"display_phone_number": "15550009999", "phone_number_id": WA_PHONE_NUMBER_ID},
                    "messages": [{
                        "from": from,
                        "id": id,
                        "timestamp": chrono::Utc::now().timestamp().to_string(),
                        "type": "text",
                        "text": {"body": text}
                    }]
                }
            }]
        }]
    })
    .to_string()
}

fn signed_webhook(body: String) -> Request<Body> {
    let signature = sign(body.as_bytes());
    Request::post("/webhook")
        .header("content-type", "application/json")
        .header("x-hub-signature-256", signature)
        .body(Body::from(body))
        .unwrap()
}

fn api(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"));
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn handshake_echoes_challenge_only_for_matching_token() {
    let harness = TestHarness::builder().build().await.unwrap();

    let ok = app(&harness)
        .oneshot(
            Request::get("/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    let body = to_bytes(ok.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"42");

    let bad = app(&harness)
        .oneshot(
            Request::get("/webhook?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unsigned_or_malformed_webhooks_are_rejected() {
    let harness = TestHarness::builder().build().await.unwrap();

    let unsigned = app(&harness)
        .oneshot(
            Request::post("/webhook")
                .body(Body::from(inbound_payload("15550123", "wamid.X", "hi")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

    let malformed = app(&harness)
        .oneshot(signed_webhook("not json".to_string()))
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn api_requires_bearer_token() {
    let harness = TestHarness::builder().build().await.unwrap();
    let response = app(&harness)
        .oneshot(
            Request::get("/v1/conversations/anything")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let missing = app(&harness)
        .oneshot(api("GET", "/v1/conversations/anything", None))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn handover_request_claim_and_close_over_http() {
    let harness = TestHarness::builder().build().await.unwrap();

    let received = app(&harness)
        .oneshot(signed_webhook(inbound_payload(
            "15550123",
            "wamid.IN1",
            "Can I talk to a person please?",
        )))
        .await
        .unwrap();
    assert_eq!(received.status(), StatusCode::OK);

    let contact = directory::find_contact(&harness.db, TENANT_ID, "15550123")
        .await
        .unwrap()
        .unwrap();
    let id = conversations::get_active(&harness.db, contact.id, TENANT_ID)
        .await
        .unwrap()
        .unwrap()
        .id;

    let pending: Conversation = json(
        app(&harness)
            .oneshot(api("GET", &format!("/v1/conversations/{id}"), None))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(pending.mode, ConversationMode::HandoverPending);

    let claimed = app(&harness)
        .oneshot(api(
            "POST",
            &format!("/v1/conversations/{id}/claim"),
            Some(serde_json::json!({"agent_id": "a-7", "label": "Dana"})),
        ))
        .await
        .unwrap();
    assert_eq!(claimed.status(), StatusCode::OK);
    let claimed: Conversation = json(claimed).await;
    assert_eq!(claimed.mode, ConversationMode::Human);
    assert_eq!(claimed.assigned_to_label.as_deref(), Some("Dana"));

    let second_claim = app(&harness)
        .oneshot(api(
            "POST",
            &format!("/v1/conversations/{id}/claim"),
            Some(serde_json::json!({"agent_id": "a-8", "label": "Lee"})),
        ))
        .await
        .unwrap();
    assert_eq!(second_claim.status(), StatusCode::CONFLICT);

    let replied = app(&harness)
        .oneshot(api(
            "POST",
            &format!("/v1/conversations/{id}/agent-messages"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(replied.status(), StatusCode::NO_CONTENT);

    let closed: Conversation = json(
        app(&harness)
            .oneshot(api(
                "POST",
                &format!("/v1/conversations/{id}/close"),
                Some(serde_json::json!({"actor": {"kind": "agent", "id": "a-7", "label": "Dana"}})),
            ))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(closed.mode, ConversationMode::Closed);
    assert!(closed.last_agent_msg_at.is_some());

    let events: Vec<HandoverEvent> = json(
        app(&harness)
            .oneshot(api("GET", &format!("/v1/conversations/{id}/events"), None))
            .await
            .unwrap(),
    )
    .await;
    let actions: Vec<HandoverAction> = events.into_iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            HandoverAction::Request,
            HandoverAction::Claim,
            HandoverAction::Close
        ]
    );
}

#[tokio::test]
async fn health_and_metrics_are_public() {
    let harness = TestHarness::builder().build().await.unwrap();

    let health = app(&harness)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let body: serde_json::Value = json(health).await;
    assert_eq!(body["status"], "ok");

    let metrics = app(&harness)
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
    let text = to_bytes(metrics.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&text).contains("parley_sends_total"));
}
