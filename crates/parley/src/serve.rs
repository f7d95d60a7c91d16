// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `parley serve`: the long-running service.
//!
//! Runs the batch dispatcher, the pending-handover sweeper and the HTTP
//! gateway until SIGINT/SIGTERM. A storage failure in any of them stops the
//! whole process.

use std::sync::Arc;
use std::time::Duration;

use parley_broadcast::{Dispatcher, EchoHandler, Reconciler};
use parley_config::ParleyConfig;
use parley_conversation::{ConversationService, run_sweeper};
use parley_core::ParleyError;
use parley_gateway::{
    AuthConfig, GatewayState, HealthState, ServerConfig, WebhookAuth, WebhookProcessor,
};
use parley_prometheus::PrometheusAdapter;
use parley_storage::Database;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::commands::sender_from_config;
use crate::shutdown;

pub async fn run_serve(config: ParleyConfig) -> Result<(), ParleyError> {
    info!(agent = %config.agent.name, "starting parley serve");

    let db = Database::open_from_config(&config.storage).await?;

    let prometheus = if config.prometheus.enabled {
        Some(PrometheusAdapter::new()?)
    } else {
        None
    };

    let cancel = shutdown::install_signal_handler();
    let mut tasks: JoinSet<(&'static str, Result<(), ParleyError>)> = JoinSet::new();

    match sender_from_config(&config) {
        Ok(sender) => {
            let dispatcher = Dispatcher::new(db.clone(), sender, &config.broadcast);
            let token = cancel.clone();
            tasks.spawn(async move { ("dispatcher", dispatcher.run(token).await) });
        }
        Err(e) => warn!(error = %e, "broadcast sending disabled"),
    }

    let conversations = ConversationService::from_config(db.clone(), &config.handover)?;
    {
        let service = conversations.clone();
        let interval = Duration::from_secs(config.handover.sweep_interval_secs);
        let token = cancel.clone();
        tasks.spawn(async move { ("sweeper", run_sweeper(service, interval, token).await) });
    }

    if config.gateway.enabled {
        let state = GatewayState {
            processor: WebhookProcessor::new(
                db.clone(),
                Reconciler::new(db.clone()),
                conversations,
                EchoHandler::new(db.clone(), &config.handover),
            ),
            webhook: WebhookAuth {
                app_secret: config.whatsapp.app_secret.clone(),
                verify_token: config.whatsapp.verify_token.clone(),
            },
            auth: AuthConfig {
                bearer_token: config.gateway.bearer_token.clone(),
            },
            health: HealthState {
                start_time: std::time::Instant::now(),
                prometheus_render: prometheus.map(|p| {
                    Arc::new(move || p.render()) as Arc<dyn Fn() -> String + Send + Sync>
                }),
            },
        };
        if config.whatsapp.app_secret.is_none() {
            warn!("whatsapp.app_secret is not set; webhook signatures are not checked");
        }
        let server_config = ServerConfig {
            host: config.gateway.host.clone(),
            port: config.gateway.port,
        };
        let token = cancel.clone();
        tasks.spawn(async move {
            (
                "gateway",
                parley_gateway::start_server(&server_config, state, token).await,
            )
        });
    } else {
        info!("gateway disabled");
    }

    log_allocator_stats();

    // A failed task takes the rest down with it.
    let mut result = Ok(());
    while let Some(joined) = tasks.join_next().await {
        let (name, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) => ("task", Err(ParleyError::Internal(format!("task panicked: {e}")))),
        };
        match outcome {
            Ok(()) => info!(task = name, "task stopped"),
            Err(e) => {
                error!(task = name, error = %e, "task failed");
                cancel.cancel();
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
    }

    if let Err(e) = db.close().await {
        warn!(error = %e, "database close failed");
    }
    info!("parley serve shutdown complete");
    result
}

/// Log jemalloc's view of the heap.
fn log_allocator_stats() {
    #[cfg(not(target_env = "msvc"))]
    {
        let _ = tikv_jemalloc_ctl::epoch::advance();
        let allocated = tikv_jemalloc_ctl::stats::allocated::read().unwrap_or(0);
        let resident = tikv_jemalloc_ctl::stats::resident::read().unwrap_or(0);
        info!(
            allocated_mb = allocated / (1024 * 1024),
            resident_mb = resident / (1024 * 1024),
            "startup memory"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serve_stops_when_storage_cannot_open() {
        // A regular file where the parent directory should be.
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let mut config = ParleyConfig::default();
        config.storage.database_path = blocker
            .path()
            .join("parley.db")
            .to_string_lossy()
            .to_string();
        assert!(run_serve(config).await.is_err());
    }
}
