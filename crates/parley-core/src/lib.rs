// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Parley broadcast and handover core.
//!
//! This crate provides the error type, domain types, and the adapter traits
//! used throughout the Parley workspace.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::ParleyError;
pub use types::{AdapterType, HealthStatus, MessageId, OutboundTemplate};

pub use traits::{ChannelSender, PluginAdapter};
