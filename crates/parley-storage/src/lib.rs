// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Parley messaging core.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a single-writer
//! concurrency model via `tokio-rusqlite`, and typed operations for
//! broadcasts, batches, recipients, conversations, and the handover log.
//!
//! Every state change that must be race-free is a single conditional
//! statement (batch claim, counter increment, first-write-wins stamps, mode
//! changes), so several processes can share one database file.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::Database;
pub use models::*;
