// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for integration testing.
//!
//! `TestHarness` opens a temp SQLite database, seeds one tenant with one
//! business phone number, and registers contacts. Configuration is tuned for
//! tests: millisecond retry backoff and short send timeouts.

use std::sync::Arc;

use parley_config::model::ParleyConfig;
use parley_core::ParleyError;
use parley_storage::queries::directory;
use parley_storage::{Database, NewContact, PhoneNumber, Tenant};

use crate::mock_sender::MockSender;

/// Tenant id seeded by the harness.
pub const TENANT_ID: &str = "tenant-1";
/// Internal phone number id seeded by the harness.
pub const PHONE_ID: &str = "phone-1";
/// Provider-side phone number id seeded by the harness.
pub const WA_PHONE_NUMBER_ID: &str = "109876543210";

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    contacts: usize,
    tags: Vec<String>,
    batch_size: usize,
    auto_handover_on_echo: bool,
    phone_mute_seconds: Option<i64>,
    tenant_mute_seconds: i64,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            contacts: 0,
            tags: vec!["vip".to_string()],
            batch_size: 1000,
            auto_handover_on_echo: true,
            phone_mute_seconds: Some(300),
            tenant_mute_seconds: 600,
        }
    }

    /// Register `n` contacts carrying the harness tags.
    pub fn with_contacts(mut self, n: usize) -> Self {
        self.contacts = n;
        self
    }

    /// Tags given to every seeded contact.
    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Override `broadcast.batch_size`.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Echo policy of the seeded phone number.
    pub fn with_echo_policy(mut self, auto_handover: bool, mute_seconds: Option<i64>) -> Self {
        self.auto_handover_on_echo = auto_handover;
        self.phone_mute_seconds = mute_seconds;
        self
    }

    /// Tenant default echo mute.
    pub fn with_tenant_mute(mut self, seconds: i64) -> Self {
        self.tenant_mute_seconds = seconds;
        self
    }

    /// Build the test harness, creating and seeding the database.
    pub async fn build(self) -> Result<TestHarness, ParleyError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| ParleyError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("test.db");
        let db_path_str = db_path.to_string_lossy().to_string();

        let mut config = ParleyConfig::default();
        config.storage.database_path = db_path_str.clone();
        config.broadcast.batch_size = self.batch_size;
        config.broadcast.retry_base_ms = 1;
        config.broadcast.retry_max_ms = 5;
        config.broadcast.send_timeout_secs = 1;
        config.broadcast.poll_interval_ms = 10;

        let db = Database::open(&db_path_str).await?;

        directory::insert_tenant(
            &db,
            &Tenant {
                id: TENANT_ID.to_string(),
                echo_handover_mute_seconds: self.tenant_mute_seconds,
            },
        )
        .await?;
        directory::insert_phone_number(
            &db,
            &PhoneNumber {
                id: PHONE_ID.to_string(),
                tenant_id: TENANT_ID.to_string(),
                wa_phone_number_id: WA_PHONE_NUMBER_ID.to_string(),
                auto_handover_on_echo: self.auto_handover_on_echo,
                echo_handover_mute_seconds: self.phone_mute_seconds,
            },
        )
        .await?;

        let harness = TestHarness {
            db,
            sender: Arc::new(MockSender::new()),
            config,
            _temp_dir: temp_dir,
        };
        let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
        for i in 0..self.contacts {
            harness.add_contact(&TestHarness::wa_id(i), &tags).await?;
        }
        Ok(harness)
    }
}

/// A seeded test environment with a mock sender and temp storage.
pub struct TestHarness {
    /// Database handle (temp DB, cleaned up on drop).
    pub db: Database,
    /// Scripted sender shared with whatever the test builds.
    pub sender: Arc<MockSender>,
    /// Test-tuned configuration.
    pub config: ParleyConfig,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// The WhatsApp id the harness gives its `i`-th seeded contact.
    pub fn wa_id(i: usize) -> String {
        format!("1555{i:07}")
    }

    /// Register one more contact on the seeded phone number.
    pub async fn add_contact(&self, wa_id: &str, tags: &[&str]) -> Result<i64, ParleyError> {
        directory::insert_contact(
            &self.db,
            &NewContact {
                tenant_id: TENANT_ID.to_string(),
                wa_id: wa_id.to_string(),
                phone_number_id: Some(PHONE_ID.to_string()),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                opted_out: false,
            },
        )
        .await
    }
}
