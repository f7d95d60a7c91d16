// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder (Prometheus, statsd, etc.)
//! can collect these metrics. Without an installed recorder every call is a
//! no-op, so library crates record unconditionally.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register all Parley metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!("parley_sends_total", "Broadcast sends by final outcome");
    describe_counter!(
        "parley_send_attempts_total",
        "Individual channel send attempts, retries included"
    );
    describe_counter!(
        "parley_status_callbacks_total",
        "Delivery status callbacks by status and reconciliation result"
    );
    describe_counter!(
        "parley_handover_transitions_total",
        "Conversation handover events by action"
    );
    describe_counter!("parley_batches_total", "Broadcast batches by terminal state");
    describe_gauge!("parley_batches_in_flight", "Batches currently being dispatched");
    describe_histogram!(
        "parley_send_latency_seconds",
        "Channel send latency in seconds"
    );
}

/// Record the final outcome of one recipient send (`sent`, `failed`, `skipped`).
pub fn record_send(outcome: &'static str) {
    metrics::counter!("parley_sends_total", "outcome" => outcome).increment(1);
}

/// Record one channel send attempt.
pub fn record_send_attempt() {
    metrics::counter!("parley_send_attempts_total").increment(1);
}

/// Record one status callback and what reconciliation did with it.
pub fn record_status_callback(status: &str, result: &'static str) {
    metrics::counter!(
        "parley_status_callbacks_total",
        "status" => status.to_string(),
        "result" => result
    )
    .increment(1);
}

/// Record a handover event.
pub fn record_handover(action: &str) {
    metrics::counter!("parley_handover_transitions_total", "action" => action.to_string())
        .increment(1);
}

/// Record a batch reaching a terminal state.
pub fn record_batch(state: &'static str) {
    metrics::counter!("parley_batches_total", "state" => state).increment(1);
}

/// Adjust the number of batches in flight.
pub fn add_batches_in_flight(delta: f64) {
    metrics::gauge!("parley_batches_in_flight").increment(delta);
}

/// Record send latency.
pub fn record_send_latency(seconds: f64) {
    metrics::histogram!("parley_send_latency_seconds").record(seconds);
}
