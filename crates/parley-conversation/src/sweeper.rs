// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background task returning timed-out handovers to the bot.

use std::time::Duration;

use chrono::Utc;
use parley_core::ParleyError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::machine::ConversationService;

/// Sweep every `interval` until `cancel` fires.
///
/// Returns an error only for fatal (storage) failures.
pub async fn run_sweeper(
    service: ConversationService,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<(), ParleyError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        interval_secs = interval.as_secs(),
        timeout_secs = service.pending_timeout().as_secs(),
        "handover sweeper started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match service.sweep_expired(Utc::now()).await {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "handover sweeper stopping on storage failure");
                        return Err(e);
                    }
                    Err(e) => warn!(error = %e, "handover sweep failed"),
                }
            }
            _ = cancel.cancelled() => {
                info!("handover sweeper shutting down");
                break;
            }
        }
    }
    Ok(())
}
