// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fab: drive multi-agent development runs from the command line

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit code for configuration or validation errors raised before a run
/// starts.
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(name = "fab", version, about = "Multi-agent software-development run orchestrator")]
struct Cli {
    /// Path to the fab config file.
    #[arg(long, global = true, default_value = "fab.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute one run for a normalized ticket.
    Run {
        /// Path to the ticket JSON file.
        #[arg(long)]
        ticket: PathBuf,
        /// Remove the run workspace after a completed run.
        #[arg(long)]
        cleanup: bool,
    },
    /// Check the config file and exit.
    Validate,
    /// Project a run from an events log and print it.
    Replay {
        /// Path to an `.events.jsonl` file.
        events: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Run { ticket, cleanup } => commands::run(&cli.config, &ticket, cleanup).await,
        Command::Validate => commands::validate(&cli.config),
        Command::Replay { events } => commands::replay(&events),
    }
}
