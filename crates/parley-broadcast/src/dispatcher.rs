// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Batch Dispatcher: claims batches and sends to each recipient.
//!
//! A worker claims one unclaimed batch at a time (compare-and-swap in
//! storage), sends to every recipient without an outcome, and marks the
//! batch `done`. Sends inside a batch run concurrently up to
//! `send_concurrency`; each carries a timeout and transient failures are
//! retried with bounded exponential backoff.
//!
//! Every outcome is recorded in one storage transaction together with its
//! counter increments, so a crash between sends never double-counts: a
//! resumed batch skips recipients that already have an outcome.
//!
//! The worker renews its batch lease while sends run and gives the batch up
//! as soon as a renewal misses. Each recipient is claimed in storage right
//! before its first attempt, so a recipient is only ever sent to by the
//! worker holding its send claim, even when a lease changes hands.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use parley_config::model::BroadcastConfig;
use parley_core::types::{
    Broadcast, BroadcastBatch, BroadcastContact, OutboundTemplate, format_timestamp, now_timestamp,
};
use parley_core::{ChannelSender, ParleyError};
use parley_storage::Database;
use parley_storage::queries::{batches, broadcasts, recipients};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::retry::RetryPolicy;

/// Outcome tally for one or more dispatched batches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub batches: usize,
    pub sent: usize,
    pub failed: usize,
    /// Recipients that already had an outcome when the batch was dispatched.
    pub skipped: usize,
    /// Recipients whose send claim is held by another worker.
    pub deferred: usize,
}

impl BatchReport {
    fn absorb(&mut self, other: BatchReport) {
        self.batches += other.batches;
        self.sent += other.sent;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.deferred += other.deferred;
    }
}

enum RecipientOutcome {
    Sent,
    Failed,
    Skipped,
    Deferred,
}

/// Sends broadcast batches through an injected [`ChannelSender`].
#[derive(Clone)]
pub struct Dispatcher {
    db: Database,
    sender: Arc<dyn ChannelSender>,
    retry: RetryPolicy,
    send_concurrency: usize,
    send_timeout: Duration,
    batch_lease: Duration,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(db: Database, sender: Arc<dyn ChannelSender>, config: &BroadcastConfig) -> Self {
        Self {
            db,
            sender,
            retry: RetryPolicy::from_config(config),
            send_concurrency: config.send_concurrency.max(1),
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            batch_lease: Duration::from_secs(config.batch_lease_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }

    /// Replace the retry policy, e.g. to disable jitter.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Claim the next unclaimed batch of a broadcast, or `None` when no
    /// candidate is left. Never blocks on another worker.
    pub async fn claim_next_batch(
        &self,
        broadcast_id: &str,
    ) -> Result<Option<BroadcastBatch>, ParleyError> {
        batches::claim_next_batch(&self.db, broadcast_id).await
    }

    /// Send to every recipient of a claimed batch and mark it `done`.
    ///
    /// Fails with [`ParleyError::BatchLeaseLost`] when the claim was taken
    /// away mid-batch; no further sends happen after that. When another
    /// worker still holds send claims on some recipients, the batch stays
    /// claimed and is picked up again once its lease expires.
    pub async fn dispatch_batch(&self, batch: &BroadcastBatch) -> Result<BatchReport, ParleyError> {
        let lost = || ParleyError::BatchLeaseLost {
            batch_id: batch.id.clone(),
        };
        let token = batch.claim_token.as_deref().ok_or_else(lost)?;
        let broadcast = broadcasts::get_broadcast(&self.db, &batch.broadcast_id)
            .await?
            .ok_or_else(|| ParleyError::NotFound {
                entity: "broadcast",
                id: batch.broadcast_id.clone(),
            })?;
        let rows = recipients::list_for_batch(&self.db, &batch.id).await?;

        parley_prometheus::add_batches_in_flight(1.0);
        let result = tokio::select! {
            biased;
            report = self.send_all(&broadcast, rows) => report,
            e = self.hold_lease(&batch.id, token) => Err(e),
        };
        parley_prometheus::add_batches_in_flight(-1.0);
        let mut report = match result {
            Err(e @ ParleyError::BatchLeaseLost { .. }) => {
                parley_prometheus::record_batch("lease_lost");
                return Err(e);
            }
            other => other?,
        };
        report.batches = 1;

        if report.deferred > 0 {
            warn!(
                batch_id = %batch.id,
                deferred = report.deferred,
                "recipients held by another worker, leaving batch claimed until its lease expires"
            );
            return Ok(report);
        }

        if !batches::mark_done(&self.db, &batch.id, token, &now_timestamp()).await? {
            parley_prometheus::record_batch("lease_lost");
            return Err(lost());
        }
        parley_prometheus::record_batch("done");

        info!(
            broadcast_id = %batch.broadcast_id,
            batch_id = %batch.id,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            "batch dispatched"
        );
        Ok(report)
    }

    async fn send_all(
        &self,
        broadcast: &Broadcast,
        rows: Vec<BroadcastContact>,
    ) -> Result<BatchReport, ParleyError> {
        let mut report = BatchReport::default();
        let mut outcomes = futures::stream::iter(rows)
            .map(|row| self.process_recipient(broadcast, row))
            .buffer_unordered(self.send_concurrency);

        while let Some(outcome) = outcomes.next().await {
            match outcome? {
                RecipientOutcome::Sent => report.sent += 1,
                RecipientOutcome::Failed => report.failed += 1,
                RecipientOutcome::Skipped => report.skipped += 1,
                RecipientOutcome::Deferred => report.deferred += 1,
            }
        }
        Ok(report)
    }

    /// Renew the batch lease until it is lost. Only returns on failure.
    async fn hold_lease(&self, batch_id: &str, token: &str) -> ParleyError {
        let mut ticks = tokio::time::interval((self.batch_lease / 3).max(Duration::from_millis(1)));
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The claim itself stamped the first heartbeat.
        ticks.tick().await;
        loop {
            ticks.tick().await;
            match batches::renew_lease(&self.db, batch_id, token, &now_timestamp()).await {
                Ok(true) => debug!(%batch_id, "batch lease renewed"),
                Ok(false) => {
                    warn!(%batch_id, "batch lease lost, abandoning batch");
                    return ParleyError::BatchLeaseLost {
                        batch_id: batch_id.to_string(),
                    };
                }
                Err(e) => return e,
            }
        }
    }

    /// Lease timestamps older than this belong to a worker presumed dead.
    fn lease_cutoff(&self) -> Result<String, ParleyError> {
        let lease = chrono::Duration::from_std(self.batch_lease)
            .map_err(|e| ParleyError::Internal(format!("batch lease out of range: {e}")))?;
        Ok(format_timestamp(Utc::now() - lease))
    }

    /// Claim and dispatch batches of one broadcast until none is left.
    ///
    /// Stops early, between batches, when `cancel` fires.
    pub async fn dispatch_broadcast(
        &self,
        broadcast_id: &str,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, ParleyError> {
        let mut total = BatchReport::default();
        while !cancel.is_cancelled() {
            let Some(batch) = self.claim_next_batch(broadcast_id).await? else {
                break;
            };
            debug!(%broadcast_id, batch_id = %batch.id, "batch claimed");
            match self.dispatch_batch(&batch).await {
                Ok(report) => total.absorb(report),
                Err(ParleyError::BatchLeaseLost { batch_id }) => {
                    warn!(%broadcast_id, %batch_id, "batch taken over by another worker");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    /// One polling pass: recover expired leases, then drain every broadcast
    /// with unclaimed batches.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> Result<BatchReport, ParleyError> {
        let stale_before = self.lease_cutoff()?;
        let reclaimed = batches::reclaim_stale_batches(&self.db, &stale_before).await?;
        if reclaimed > 0 {
            warn!(reclaimed, "reclaimed batches with expired lease");
        }

        let mut total = BatchReport::default();
        for broadcast_id in batches::broadcasts_with_unclaimed(&self.db).await? {
            if cancel.is_cancelled() {
                break;
            }
            total.absorb(self.dispatch_broadcast(&broadcast_id, cancel).await?);
        }
        Ok(total)
    }

    /// Worker loop. Polls for work every `poll_interval` until `cancel`
    /// fires. A batch in flight when cancellation arrives runs to completion.
    ///
    /// Returns an error only for fatal (storage) failures.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ParleyError> {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            concurrency = self.send_concurrency,
            poll_ms = self.poll_interval.as_millis() as u64,
            "dispatcher started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.poll_once(&cancel).await {
                        Ok(report) if report.batches > 0 => {
                            debug!(batches = report.batches, sent = report.sent, "poll complete");
                        }
                        Ok(_) => {}
                        Err(e) if e.is_fatal() => {
                            error!(error = %e, "dispatcher stopping on storage failure");
                            return Err(e);
                        }
                        Err(e) => warn!(error = %e, "dispatch poll failed"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!("dispatcher shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn process_recipient(
        &self,
        broadcast: &Broadcast,
        row: BroadcastContact,
    ) -> Result<RecipientOutcome, ParleyError> {
        if row.is_terminal() {
            parley_prometheus::record_send("skipped");
            return Ok(RecipientOutcome::Skipped);
        }
        let stale_before = self.lease_cutoff()?;
        if !recipients::claim_send(&self.db, &row.id, &now_timestamp(), &stale_before).await? {
            let finished = recipients::get_recipient(&self.db, &row.id)
                .await?
                .is_none_or(|current| current.is_terminal());
            parley_prometheus::record_send("skipped");
            if finished {
                return Ok(RecipientOutcome::Skipped);
            }
            debug!(recipient_id = %row.id, "send claim held by another worker");
            return Ok(RecipientOutcome::Deferred);
        }

        let msg = OutboundTemplate {
            to: row.recipient.clone(),
            template_name: broadcast.template_name.clone(),
            language: broadcast.language.clone(),
            components: None,
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            recipients::record_attempt(&self.db, &row.id).await?;
            parley_prometheus::record_send_attempt();

            match self.send_once(msg.clone()).await {
                Ok(message_id) => {
                    let recorded =
                        recipients::record_sent(&self.db, &row.id, &message_id.0, &now_timestamp())
                            .await?;
                    if !recorded {
                        parley_prometheus::record_send("skipped");
                        return Ok(RecipientOutcome::Skipped);
                    }
                    parley_prometheus::record_send("sent");
                    debug!(recipient_id = %row.id, wam_id = %message_id.0, attempt, "sent");
                    return Ok(RecipientOutcome::Sent);
                }
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        recipient_id = %row.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient send failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let recorded =
                        recipients::record_failed(&self.db, &row.id, &e.to_string(), &now_timestamp())
                            .await?;
                    if !recorded {
                        parley_prometheus::record_send("skipped");
                        return Ok(RecipientOutcome::Skipped);
                    }
                    parley_prometheus::record_send("failed");
                    warn!(recipient_id = %row.id, attempt, error = %e, "send failed");
                    return Ok(RecipientOutcome::Failed);
                }
            }
        }
    }

    async fn send_once(
        &self,
        msg: OutboundTemplate,
    ) -> Result<parley_core::MessageId, ParleyError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.send_timeout, self.sender.send_template(msg)).await
        {
            Ok(result) => result,
            Err(_) => Err(ParleyError::Timeout {
                duration: self.send_timeout,
            }),
        };
        parley_prometheus::record_send_latency(started.elapsed().as_secs_f64());
        result
    }
}
