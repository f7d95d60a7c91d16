// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP ingress for Parley.
//!
//! Receives WhatsApp webhooks (delivery statuses, customer messages,
//! business-app echoes) and exposes the conversation transition API for
//! agent tooling, plus `/health` and `/metrics`.

pub mod auth;
pub mod handlers;
pub mod ingest;
pub mod server;

pub use auth::AuthConfig;
pub use ingest::{IngestReport, WebhookProcessor};
pub use server::{GatewayState, HealthState, ServerConfig, WebhookAuth, router, start_server};
