// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The runtime capability: `prepare`, `run_step`, `run_planner`.
//!
//! A runtime is a subprocess adapter that executes a prompt in a workspace
//! and hands back a structured result. Variants (claude-style, codex-style)
//! are dispatched by config; they share spawn plumbing only, never behavior.

use crate::subprocess::{spawn_streaming, StreamedExit, SubprocessError};
use async_trait::async_trait;
use fab_core::config::{RuntimeConfig, RuntimeKind};
use fab_core::{layout, AgentDef, ExecutionPlan, RunId, TicketDetails};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum RuntimeAdapterError {
    #[error(transparent)]
    Subprocess(#[from] SubprocessError),
    #[error("guardrail denied: {0}")]
    GuardrailDenied(String),
    #[error("planner produced no plan: {0}")]
    NoPlan(String),
    #[error("malformed plan output: {0}")]
    MalformedPlan(#[from] serde_json::Error),
    #[error("debug metadata: {0}")]
    DebugMeta(std::io::Error),
}

/// Everything a runtime needs to run one step.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: RunId,
    pub workspace: PathBuf,
    pub step_number: u32,
    pub agent: AgentDef,
    /// Model resolved from overrides and agent defaults.
    pub model: Option<String>,
    pub prompt: String,
    pub timeout: Duration,
    /// Where the agent must write its structured result. Defaults to
    /// `.agent-result.json`; parallel-group members get a step-scoped path.
    pub result_path: PathBuf,
    pub cancel: CancellationToken,
}

/// Everything a runtime needs to run the planner.
#[derive(Debug, Clone)]
pub struct PlannerContext {
    pub run_id: RunId,
    pub workspace: PathBuf,
    pub ticket: TicketDetails,
    pub prompt: String,
    pub model: Option<String>,
    pub timeout: Duration,
    /// Present when asking for a rework plan instead of the initial plan.
    pub rework: Option<ReworkRequest>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct ReworkRequest {
    pub step_number: u32,
    pub reason: String,
    pub target: Option<String>,
}

/// Concrete command a variant resolved for an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: PathBuf,
}

impl RuntimeInvocation {
    /// Rendered command line, for guardrail checks and diagnostics.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    pub(crate) fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args).envs(&self.env).current_dir(&self.cwd);
        cmd
    }
}

/// Result of one step invocation.
#[derive(Debug, Clone)]
pub struct RuntimeStepResult {
    pub exit_code: i32,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub duration_ms: u64,
    pub tokens_used: u64,
    pub cost_usd: f64,
    /// Opaque runtime identity of the child.
    pub runtime_id: String,
    /// Concrete model reported by the runtime, when known.
    pub model: Option<String>,
    pub timed_out: bool,
    pub cancelled: bool,
}

/// Result of a planner invocation.
#[derive(Debug, Clone)]
pub struct PlanGenerationResult {
    pub plan: ExecutionPlan,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
}

/// Polymorphic runtime capability.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    fn kind(&self) -> RuntimeKind;

    /// Resolve prompt, env, and cwd for a step without spawning anything.
    fn prepare(&self, ctx: &StepContext) -> RuntimeInvocation;

    async fn run_step(
        &self,
        ctx: &StepContext,
        attempt: u32,
    ) -> Result<RuntimeStepResult, RuntimeAdapterError>;

    async fn run_planner(
        &self,
        ctx: &PlannerContext,
    ) -> Result<PlanGenerationResult, RuntimeAdapterError>;
}

/// Dispatch a runtime variant from config.
pub fn runtime_for_config(config: &RuntimeConfig) -> Arc<dyn RuntimeAdapter> {
    match config.kind {
        RuntimeKind::Claude => Arc::new(crate::claude::ClaudeRuntime::new(config.clone())),
        RuntimeKind::Codex => Arc::new(crate::codex::CodexRuntime::new(config.clone())),
    }
}

/// Structured debug metadata written next to the stdio logs.
///
/// The monitor reads the concrete `model`; exact token counters here win
/// over stdout-derived approximations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeDebugMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    pub runtime_id: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Exact usage counters a variant parsed from its own output format.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct UsageCounters {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cost_usd: Option<f64>,
    pub model: Option<String>,
}

impl UsageCounters {
    pub(crate) fn total_tokens(&self) -> Option<u64> {
        match (self.input_tokens, self.output_tokens) {
            (None, None) => None,
            (i, o) => Some(i.unwrap_or(0) + o.unwrap_or(0)),
        }
    }
}

/// Spawn plumbing shared by variants: env injection, stdio log paths,
/// streamed execution.
pub(crate) struct SpawnSlot {
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub debug_path: PathBuf,
}

impl SpawnSlot {
    pub(crate) fn for_step(kind: RuntimeKind, workspace: &Path, step: u32, attempt: u32) -> Self {
        Self {
            stdout_path: workspace.join(layout::step_stdout_log(kind, step, attempt)),
            stderr_path: workspace.join(layout::step_stderr_log(kind, step, attempt)),
            debug_path: workspace.join(layout::step_debug_json(kind, step, attempt)),
        }
    }

    pub(crate) fn for_planner(kind: RuntimeKind, workspace: &Path, attempt: u32) -> Self {
        Self {
            stdout_path: workspace.join(layout::planner_stdout_log(kind, attempt)),
            stderr_path: workspace.join(layout::planner_stderr_log(kind, attempt)),
            debug_path: workspace.join(layout::planner_debug_json(kind, attempt)),
        }
    }
}

pub(crate) async fn stream_invocation(
    inv: &RuntimeInvocation,
    slot: &SpawnSlot,
    timeout: Duration,
    cancel: &CancellationToken,
    label: &str,
) -> Result<StreamedExit, RuntimeAdapterError> {
    let exit =
        spawn_streaming(inv.to_command(), &slot.stdout_path, &slot.stderr_path, timeout, cancel, label)
            .await?;
    Ok(exit)
}

/// Opaque runtime identity: `<kind>-<pid>`, falling back to a random suffix
/// when the child never spawned far enough to have a pid.
pub(crate) fn runtime_id(kind: RuntimeKind, exit: &StreamedExit) -> String {
    match exit.pid {
        Some(pid) => format!("{kind}-{pid}"),
        None => format!("{kind}-{}", nanoid::nanoid!(8)),
    }
}

/// Approximate token count from raw stdout bytes, used when a variant
/// exposes no exact counters.
pub(crate) fn approx_tokens_from_stdout(path: &Path) -> u64 {
    match std::fs::metadata(path) {
        Ok(meta) => meta.len() / 4,
        Err(_) => 0,
    }
}

pub(crate) fn write_debug_meta(
    path: &Path,
    meta: &RuntimeDebugMeta,
) -> Result<(), RuntimeAdapterError> {
    let json = serde_json::to_string_pretty(meta)?;
    std::fs::write(path, json).map_err(RuntimeAdapterError::DebugMeta)
}

/// Read and consume the planner's `.agent-plan.json`.
pub(crate) fn consume_plan_file(workspace: &Path) -> Result<ExecutionPlan, RuntimeAdapterError> {
    let path = workspace.join(layout::PLAN_FILE);
    let raw = std::fs::read_to_string(&path)
        .map_err(|_| RuntimeAdapterError::NoPlan(format!("missing {}", layout::PLAN_FILE)))?;
    let plan: ExecutionPlan = serde_json::from_str(&raw)?;
    let _ = std::fs::remove_file(&path);
    Ok(plan)
}

/// Env every runtime invocation receives, merged over config env.
pub(crate) fn base_env(
    config: &RuntimeConfig,
    run_id: &RunId,
    stage: &str,
) -> BTreeMap<String, String> {
    let mut env = config.env.clone();
    env.insert("FAB_RUN_ID".to_string(), run_id.to_string());
    env.insert("FAB_STAGE".to_string(), stage.to_string());
    if !config.plugin_paths.is_empty() {
        let joined = config
            .plugin_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        env.insert("FAB_PLUGIN_PATHS".to_string(), joined);
    }
    env
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
