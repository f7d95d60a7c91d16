// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot operator commands: schedule, dispatch, cancel, sweep.

use std::sync::Arc;

use chrono::Utc;
use parley_broadcast::{BatchReport, BroadcastRequest, Dispatcher, ScheduledBroadcast, Scheduler};
use parley_config::ParleyConfig;
use parley_conversation::ConversationService;
use parley_core::{ChannelSender, ParleyError};
use parley_storage::Database;
use parley_whatsapp::WhatsAppSender;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Arguments of `parley schedule`.
#[derive(Debug, Clone)]
pub struct ScheduleArgs {
    pub name: String,
    pub template: String,
    pub language: String,
    pub tags: Vec<String>,
    pub batch_size: Option<usize>,
}

/// Create a broadcast and its batches.
pub async fn schedule(
    config: &ParleyConfig,
    db: Database,
    args: ScheduleArgs,
) -> Result<ScheduledBroadcast, ParleyError> {
    let request = BroadcastRequest {
        name: args.name,
        template_name: args.template,
        language: args.language,
        contact_tags: args.tags,
        batch_size: args.batch_size,
    };
    let scheduled = Scheduler::new(db, &config.broadcast).schedule(request).await?;
    info!(
        broadcast_id = %scheduled.broadcast.id,
        recipients = scheduled.broadcast.scheduled_count,
        batches = scheduled.batches.len(),
        "broadcast scheduled"
    );
    Ok(scheduled)
}

/// Dispatch pending work once and return.
///
/// With `broadcast_id`, only that broadcast's batches are claimed; otherwise
/// one full polling pass runs, including lease recovery.
pub async fn dispatch(
    config: &ParleyConfig,
    db: Database,
    sender: Arc<dyn ChannelSender>,
    broadcast_id: Option<&str>,
    cancel: &CancellationToken,
) -> Result<BatchReport, ParleyError> {
    let dispatcher = Dispatcher::new(db, sender, &config.broadcast);
    let report = match broadcast_id {
        Some(id) => dispatcher.dispatch_broadcast(id, cancel).await?,
        None => dispatcher.poll_once(cancel).await?,
    };
    info!(
        batches = report.batches,
        sent = report.sent,
        failed = report.failed,
        skipped = report.skipped,
        deferred = report.deferred,
        "dispatch finished"
    );
    Ok(report)
}

/// Cancel a broadcast's remaining batches.
pub async fn cancel(
    config: &ParleyConfig,
    db: Database,
    broadcast_id: &str,
) -> Result<usize, ParleyError> {
    Scheduler::new(db, &config.broadcast)
        .cancel_broadcast(broadcast_id)
        .await
}

/// Return timed-out pending handovers to the bot once.
pub async fn sweep(config: &ParleyConfig, db: Database) -> Result<usize, ParleyError> {
    ConversationService::from_config(db, &config.handover)?
        .sweep_expired(Utc::now())
        .await
}

/// The WhatsApp sender configured in `[whatsapp]`.
pub fn sender_from_config(config: &ParleyConfig) -> Result<Arc<dyn ChannelSender>, ParleyError> {
    Ok(Arc::new(WhatsAppSender::from_config(&config.whatsapp)?))
}
