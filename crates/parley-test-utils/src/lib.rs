// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Parley integration tests.
//!
//! Provides a scripted channel sender and a temp-database harness for fast,
//! deterministic, CI-runnable tests without external services.
//!
//! # Components
//!
//! - [`MockSender`] - Channel sender with per-recipient scripted outcomes
//! - [`TestHarness`] - Temp SQLite database seeded with a tenant, a phone number, and contacts

pub mod harness;
pub mod mock_sender;

pub use harness::TestHarness;
pub use mock_sender::{MockSender, SendOutcome};
