// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-step agent invocation: context staging, runtime dispatch, result
//! ingestion, token and cost attribution.

use fab_adapters::guardrails::GuardrailPolicy;
use fab_adapters::runtime::{
    PlanGenerationResult, PlannerContext, ReworkRequest, RuntimeAdapter, RuntimeAdapterError,
    StepContext,
};
use fab_adapters::subprocess::SubprocessError;
use fab_core::config::{AgentDef, LimitsConfig, RuntimeConfig};
use fab_core::{layout, AgentResult, PlanStep, RunId, TicketDetails};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Why a step failed, before rework policy is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFailureKind {
    Timeout { ms: u64 },
    Cancelled,
    NoResult,
    NonZeroExit { code: i32 },
    MalformedResult(String),
    Guardrail(String),
    Invocation(String),
}

impl StepFailureKind {
    /// Short error string recorded on the step and in event data.
    pub fn error_string(&self) -> String {
        match self {
            Self::Timeout { ms } => format!("timeout:{ms}"),
            Self::Cancelled => "cancelled".to_string(),
            Self::NoResult => "no result".to_string(),
            Self::NonZeroExit { code } => format!("exit:{code}"),
            Self::MalformedResult(msg) => format!("malformed result: {msg}"),
            Self::Guardrail(msg) => format!("guardrail_denied: {msg}"),
            Self::Invocation(msg) => format!("invocation: {msg}"),
        }
    }
}

/// Everything the runner observed about one step attempt.
#[derive(Debug, Clone)]
pub struct StepRunOutcome {
    pub agent_result: Option<AgentResult>,
    pub failure: Option<StepFailureKind>,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub runtime_id: Option<String>,
    pub exit_code: Option<i32>,
    pub model: Option<String>,
}

impl StepRunOutcome {
    fn failed(failure: StepFailureKind) -> Self {
        Self {
            agent_result: None,
            failure: Some(failure),
            tokens_used: 0,
            cost_usd: 0.0,
            duration_ms: 0,
            runtime_id: None,
            exit_code: None,
            model: None,
        }
    }
}

/// Owned per-step request, cheap to move into a parallel-group task.
#[derive(Debug, Clone)]
pub struct StepRunRequest {
    pub run_id: RunId,
    pub ticket: TicketDetails,
    pub workspace: PathBuf,
    pub step: PlanStep,
    pub agent: AgentDef,
    pub model: Option<String>,
    pub attempt: u32,
    /// Parallel-group members write to a step-scoped result path so
    /// concurrent children never clobber each other's one-shot file.
    pub scoped_result: bool,
    /// Results of earlier steps referenced by `StepOutput` context inputs.
    pub prior_results: BTreeMap<u32, AgentResult>,
    pub cancel: CancellationToken,
}

/// Request for a planner invocation (initial or rework).
#[derive(Debug, Clone)]
pub struct PlannerRunRequest {
    pub run_id: RunId,
    pub ticket: TicketDetails,
    pub workspace: PathBuf,
    pub rework: Option<ReworkRequest>,
    pub cancel: CancellationToken,
}

/// Builds the per-step prompt, stages inputs, selects the runtime, enforces
/// the step timeout, and returns a step outcome.
pub struct AgentRunner {
    runtime: Arc<dyn RuntimeAdapter>,
    guardrails: GuardrailPolicy,
    limits: LimitsConfig,
}

impl AgentRunner {
    pub fn new(
        runtime: Arc<dyn RuntimeAdapter>,
        runtime_config: &RuntimeConfig,
        limits: LimitsConfig,
    ) -> Self {
        Self { runtime, guardrails: GuardrailPolicy::from_config(runtime_config), limits }
    }

    pub fn runtime(&self) -> &Arc<dyn RuntimeAdapter> {
        &self.runtime
    }

    pub async fn run_step(&self, req: StepRunRequest) -> StepRunOutcome {
        if let Err(e) = self.stage_inputs(&req) {
            return StepRunOutcome::failed(StepFailureKind::Invocation(format!(
                "context staging: {e}"
            )));
        }

        let result_path = result_path(&req.workspace, &req.step, req.scoped_result);
        // One-shot contract: never let a stale result survive into this attempt.
        let _ = std::fs::remove_file(&result_path);

        let ctx = StepContext {
            run_id: req.run_id.clone(),
            workspace: req.workspace.clone(),
            step_number: req.step.step_number,
            agent: req.agent.clone(),
            model: req.model.clone(),
            prompt: step_prompt(&req, &result_path),
            timeout: self.limits.step_timeout(),
            result_path: result_path.clone(),
            cancel: req.cancel.clone(),
        };

        let result = match self.runtime.run_step(&ctx, req.attempt).await {
            Ok(result) => result,
            Err(RuntimeAdapterError::GuardrailDenied(msg)) => {
                return StepRunOutcome::failed(StepFailureKind::Guardrail(msg));
            }
            Err(RuntimeAdapterError::Subprocess(SubprocessError::Spawn { label, source })) => {
                return StepRunOutcome::failed(StepFailureKind::Invocation(format!(
                    "{label}: {source}"
                )));
            }
            Err(e) => {
                return StepRunOutcome::failed(StepFailureKind::Invocation(e.to_string()));
            }
        };

        let mut outcome = StepRunOutcome {
            agent_result: None,
            failure: None,
            tokens_used: result.tokens_used,
            cost_usd: result.cost_usd,
            duration_ms: result.duration_ms,
            runtime_id: Some(result.runtime_id.clone()),
            exit_code: Some(result.exit_code),
            model: result.model.clone(),
        };

        if result.timed_out {
            outcome.failure =
                Some(StepFailureKind::Timeout { ms: self.limits.step_timeout_ms });
            return outcome;
        }
        if result.cancelled {
            outcome.failure = Some(StepFailureKind::Cancelled);
            return outcome;
        }
        if result.exit_code != 0 {
            let _ = std::fs::remove_file(&result_path);
            outcome.failure = Some(StepFailureKind::NonZeroExit { code: result.exit_code });
            return outcome;
        }

        match consume_result_file(&result_path) {
            Ok(Some(agent_result)) => {
                if let Err(violation) = self.check_artifact_writes(&agent_result) {
                    outcome.failure = Some(StepFailureKind::Guardrail(violation));
                    outcome.agent_result = Some(agent_result);
                } else {
                    outcome.agent_result = Some(agent_result);
                }
            }
            Ok(None) => outcome.failure = Some(StepFailureKind::NoResult),
            Err(msg) => outcome.failure = Some(StepFailureKind::MalformedResult(msg)),
        }
        outcome
    }

    pub async fn run_planner(
        &self,
        req: PlannerRunRequest,
    ) -> Result<PlanGenerationResult, RuntimeAdapterError> {
        let ctx = PlannerContext {
            run_id: req.run_id.clone(),
            workspace: req.workspace.clone(),
            prompt: planner_prompt(&req),
            ticket: req.ticket,
            model: None,
            timeout: self.limits.step_timeout(),
            rework: req.rework,
            cancel: req.cancel,
        };
        self.runtime.run_planner(&ctx).await
    }

    /// Stage context inputs under `.agent-context/` and write the task file.
    fn stage_inputs(&self, req: &StepRunRequest) -> std::io::Result<()> {
        let ws = &req.workspace;
        let context_dir = ws.join(layout::CONTEXT_DIR);
        std::fs::create_dir_all(&context_dir)?;

        for input in &req.step.context_inputs {
            match input {
                fab_core::ContextInput::Ticket => {
                    let json = serde_json::to_string_pretty(&req.ticket)
                        .map_err(std::io::Error::other)?;
                    std::fs::write(context_dir.join("ticket.json"), json)?;
                }
                fab_core::ContextInput::File { path } => {
                    let source = resolve_source(ws, path);
                    let Some(name) = source.file_name() else { continue };
                    let dest_dir = context_dir.join("files");
                    std::fs::create_dir_all(&dest_dir)?;
                    if source.exists() {
                        std::fs::copy(&source, dest_dir.join(name))?;
                    } else {
                        tracing::warn!(path = %source.display(), "context file missing, skipping");
                    }
                }
                fab_core::ContextInput::Directory { path } => {
                    let source = resolve_source(ws, path);
                    let Some(name) = source.file_name() else { continue };
                    if source.is_dir() {
                        copy_tree(&source, &context_dir.join("dirs").join(name))?;
                    } else {
                        tracing::warn!(path = %source.display(), "context dir missing, skipping");
                    }
                }
                fab_core::ContextInput::StepOutput { step } => {
                    match req.prior_results.get(step) {
                        Some(result) => {
                            let dir = context_dir.join(step.to_string());
                            std::fs::create_dir_all(&dir)?;
                            let json = serde_json::to_string_pretty(result)
                                .map_err(std::io::Error::other)?;
                            std::fs::write(dir.join("result.json"), json)?;
                            std::fs::write(dir.join("summary.md"), &result.summary)?;
                        }
                        None => {
                            tracing::warn!(step, "no prior result to stage, skipping");
                        }
                    }
                }
                fab_core::ContextInput::Artifact { name } => {
                    let source = ws.join(layout::ARTIFACTS_DIR).join(name);
                    if source.exists() {
                        let dest_dir = context_dir.join("artifacts");
                        std::fs::create_dir_all(&dest_dir)?;
                        std::fs::copy(&source, dest_dir.join(name))?;
                    } else {
                        tracing::warn!(artifact = %name, "artifact missing, skipping");
                    }
                }
            }
        }

        let task = format!(
            "# Step {}: {}\n\n{}\n",
            req.step.step_number, req.agent.id, req.step.task
        );
        std::fs::write(ws.join(layout::TASK_FILE), task)?;
        Ok(())
    }

    /// SDK-mode guardrail: reported artifact writes must fall inside the
    /// allowed paths.
    fn check_artifact_writes(&self, result: &AgentResult) -> Result<(), String> {
        for path in result.artifacts_created.iter().chain(result.artifacts_modified.iter()) {
            self.guardrails.check_write(path).map_err(|v| v.to_string())?;
        }
        Ok(())
    }
}

/// Result file path for an attempt; group members get a step-scoped name.
pub fn result_path(workspace: &Path, step: &PlanStep, scoped: bool) -> PathBuf {
    if scoped {
        workspace.join(format!(".agent-result.step-{}.json", step.step_number))
    } else {
        workspace.join(layout::RESULT_FILE)
    }
}

/// Read and remove the one-shot result file.
fn consume_result_file(path: &Path) -> Result<Option<AgentResult>, String> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    let _ = std::fs::remove_file(path);
    serde_json::from_str::<AgentResult>(&raw).map(Some).map_err(|e| e.to_string())
}

fn resolve_source(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

fn copy_tree(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn step_prompt(req: &StepRunRequest, result_path: &Path) -> String {
    let result_name = result_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| layout::RESULT_FILE.to_string());
    let mut prompt = format!(
        "You are the {} agent `{}` working on ticket {}.\n",
        req.agent.role, req.agent.id, req.ticket.id
    );
    if !req.agent.description.is_empty() {
        prompt.push_str(&req.agent.description);
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "\nYour task is in `{}`. Staged inputs are under `{}/`.\n\
         Write produced files under `{}/` and, when finished, write your\n\
         structured result JSON to `{result_name}`.\n\nTask:\n{}\n",
        layout::TASK_FILE,
        layout::CONTEXT_DIR,
        layout::ARTIFACTS_DIR,
        req.step.task
    ));
    prompt
}

fn planner_prompt(req: &PlannerRunRequest) -> String {
    match &req.rework {
        None => format!(
            "Plan the execution of ticket {} (`{}`).\n\n{}\n\n\
             Decompose the work into agent steps with dependencies and write\n\
             the plan JSON to `{}`.\n",
            req.ticket.id, req.ticket.title, req.ticket.body, layout::PLAN_FILE
        ),
        Some(rework) => format!(
            "Step {} of the current plan reported it needs rework.\n\
             Reason: {}\nTarget agent: {}\n\n\
             Produce a focused rework plan addressing the reason and write\n\
             the plan JSON to `{}`.\n",
            rework.step_number,
            rework.reason,
            rework.target.as_deref().unwrap_or("unspecified"),
            layout::PLAN_FILE
        ),
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
