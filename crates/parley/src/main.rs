// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parley - WhatsApp broadcast dispatch and conversation handover.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod commands;
mod serve;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use parley_config::ParleyConfig;
use parley_core::ParleyError;
use parley_storage::Database;

use crate::commands::ScheduleArgs;

/// Parley - WhatsApp broadcast dispatch and conversation handover.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the default locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the dispatcher, the handover sweeper and the HTTP gateway.
    Serve,
    /// Create a broadcast for every eligible contact matching the tags.
    Schedule {
        /// Operator-facing name.
        #[arg(long)]
        name: String,
        /// Approved message template name.
        #[arg(long)]
        template: String,
        /// Template language code.
        #[arg(long, default_value = "en_US")]
        language: String,
        /// Contact tag filter (any of); repeat for several. Omit for everyone.
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Recipients per batch; defaults to `broadcast.batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Claim and send pending batches once, then exit.
    Dispatch {
        /// Only this broadcast.
        #[arg(long)]
        broadcast: Option<String>,
    },
    /// Cancel a broadcast's unclaimed batches.
    Cancel {
        /// Broadcast id.
        broadcast: String,
    },
    /// Return timed-out pending handovers to the bot once.
    Sweep,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => parley_config::load_and_validate_path(path),
        None => parley_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            parley_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.agent.log_level);

    if let Err(e) = run(cli.command, config).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: ParleyConfig) -> Result<(), ParleyError> {
    if let Commands::Serve = command {
        return serve::run_serve(config).await;
    }

    let db = Database::open_from_config(&config.storage).await?;
    let result = match command {
        Commands::Serve => Ok(()),
        Commands::Schedule {
            name,
            template,
            language,
            tags,
            batch_size,
        } => {
            let args = ScheduleArgs {
                name,
                template,
                language,
                tags,
                batch_size,
            };
            commands::schedule(&config, db.clone(), args)
                .await
                .and_then(|scheduled| print_json(&scheduled.broadcast))
        }
        Commands::Dispatch { broadcast } => {
            let sender = commands::sender_from_config(&config)?;
            let cancel = shutdown::install_signal_handler();
            commands::dispatch(&config, db.clone(), sender, broadcast.as_deref(), &cancel)
                .await
                .map(|report| {
                    println!(
                        "batches={} sent={} failed={} skipped={} deferred={}",
                        report.batches, report.sent, report.failed, report.skipped, report.deferred
                    );
                })
        }
        Commands::Cancel { broadcast } => commands::cancel(&config, db.clone(), &broadcast)
            .await
            .map(|n| println!("cancelled {n} unclaimed batches of {broadcast}")),
        Commands::Sweep => commands::sweep(&config, db.clone())
            .await
            .map(|n| println!("returned {n} pending handovers to the bot")),
    };

    db.close().await?;
    result
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), ParleyError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| ParleyError::Internal(format!("failed to render output: {e}")))?;
    println!("{text}");
    Ok(())
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("parley={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
