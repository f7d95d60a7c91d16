// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Broadcast pipeline for the Parley messaging core.
//!
//! - [`Scheduler`] resolves the recipient set and partitions it into batches.
//! - [`Dispatcher`] claims batches and sends to each recipient with bounded
//!   concurrency, retry, and timeout.
//! - [`Reconciler`] applies provider status callbacks idempotently.
//! - [`Aggregator`] applies and reads broadcast counters.
//! - [`EchoHandler`] mutes the bot when a human replies from the business app.
//!
//! All components take the database handle and sender by injection; nothing
//! here holds global state.

pub mod aggregator;
pub mod dispatcher;
pub mod echo;
pub mod reconciler;
pub mod retry;
pub mod scheduler;

pub use aggregator::Aggregator;
pub use dispatcher::{BatchReport, Dispatcher};
pub use echo::{EchoEvent, EchoHandler};
pub use reconciler::{ReconcileReport, Reconciler};
pub use retry::RetryPolicy;
pub use scheduler::{BroadcastRequest, ScheduledBroadcast, Scheduler};
