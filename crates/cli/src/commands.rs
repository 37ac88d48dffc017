// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subcommand implementations.

use anyhow::Context;
use fab_adapters::runtime::runtime_for_config;
use fab_core::{FabConfig, RunStatus, SystemClock, TicketDetails};
use fab_engine::{Orchestrator, WorkspaceManager};
use fab_storage::{project_run, EventStore};
use std::path::Path;
use std::process::ExitCode;

pub async fn run(config_path: &Path, ticket_path: &Path, cleanup: bool) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path)?;
    let ticket = load_ticket(ticket_path)?;
    let workspaces = WorkspaceManager::new(config.platform.workspace_base.clone());
    let runtime = runtime_for_config(&config.runtime);
    let project_id = config.project.id.clone();

    let orchestrator = Orchestrator::new(config, runtime, SystemClock);
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let outcome = orchestrator.execute(ticket).await?;
    tracing::info!(
        run_id = %outcome.run.run_id,
        status = %outcome.run.status,
        tokens = outcome.run.total_tokens_used,
        cost_usd = outcome.run.total_cost_usd,
        workspace = %outcome.workspace.display(),
        "run finished"
    );
    println!("{}", serde_json::to_string_pretty(&outcome.run)?);

    if cleanup && outcome.run.status == RunStatus::Completed {
        workspaces.remove(&project_id, &outcome.run.run_id).await?;
    }
    Ok(ExitCode::from(outcome.exit_code.clamp(0, u8::MAX as i32) as u8))
}

pub fn validate(config_path: &Path) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path)?;
    println!(
        "config ok: project {} with {} agents, {} rules",
        config.project.id,
        config.platform.agents.len(),
        config.rules().count()
    );
    Ok(ExitCode::SUCCESS)
}

pub fn replay(events_path: &Path) -> anyhow::Result<ExitCode> {
    let events = EventStore::load_from_file(events_path)
        .with_context(|| format!("reading {}", events_path.display()))?;
    match project_run(&events) {
        Some(run) => {
            println!("{}", serde_json::to_string_pretty(&run)?);
            Ok(ExitCode::SUCCESS)
        }
        None => anyhow::bail!("no task.created row in {}", events_path.display()),
    }
}

fn load_config(path: &Path) -> anyhow::Result<FabConfig> {
    FabConfig::load(path).with_context(|| format!("loading config {}", path.display()))
}

fn load_ticket(path: &Path) -> anyhow::Result<TicketDetails> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading ticket {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing ticket {}", path.display()))
}
