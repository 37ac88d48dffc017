// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The run state machine: plan → validate → execute → finalize.
//!
//! One `Orchestrator` drives any number of runs; each `execute` call owns its
//! run state, workspace, and event store, so concurrent runs stay disjoint.
//! The driver is single-threaded and cooperative per run, with bounded
//! subprocess fan-out inside parallel groups.

use crate::error::OrchestratorError;
use crate::gates::{self, GateError, GateWait};
use crate::git;
use crate::runner::{AgentRunner, PlannerRunRequest, StepFailureKind, StepRunRequest};
use crate::validator::PlanValidator;
use crate::workspace::WorkspaceManager;
use fab_adapters::runtime::{ReworkRequest, RuntimeAdapter, RuntimeAdapterError};
use fab_adapters::subprocess::SubprocessError;
use fab_core::event::data;
use fab_core::{
    AgentResultStatus, BudgetConfig, Clock, DecisionStatus, EventType, FabConfig, HumanReview,
    PlanStep, ReviewId, ReviewStatus, RunId, RunStatus, StepExecution, StepStatus, SystemClock,
    TaskEvent, TaskRun, TicketDetails, ValidatedPlan,
};
use fab_storage::{EventStore, EventStoreConfig};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Final state of one run.
pub struct RunOutcome {
    pub run: TaskRun,
    pub workspace: PathBuf,
    pub store: Arc<EventStore>,
    /// 0 on completed, 1 on failed/cancelled, 2 on configuration or
    /// plan-integrity errors raised before any step executed.
    pub exit_code: i32,
}

/// Orchestration service: owns run lifecycle, step sequencing, the rework
/// loop, human gates, and budget enforcement.
pub struct Orchestrator<C: Clock = SystemClock> {
    config: FabConfig,
    validator: PlanValidator,
    runner: Arc<AgentRunner>,
    workspaces: WorkspaceManager,
    store_config: EventStoreConfig,
    clock: C,
    cancel: CancellationToken,
}

/// Flow control inside one run: keep driving, or stop because the run
/// reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halt,
}

/// What a settled step attempt means for the driver.
#[derive(Debug)]
enum StepVerdict {
    Complete,
    NeedsRework { reason: String, target: Option<String> },
    Failed { tag: &'static str, error: String },
    Cancelled,
}

/// Outcome of asking the planner for rework steps.
enum ReworkPlanned {
    Steps(Vec<u32>),
    Halted,
}

/// One scheduling unit: a lone step or a parallel group started together.
#[derive(Debug, PartialEq, Eq)]
enum Unit {
    Single(u32),
    Group(Vec<u32>),
}

/// Per-run mutable state threaded through the driver.
struct RunCtx {
    run: TaskRun,
    /// Immutable after validation; rework steps live in `rework_steps`.
    plan: ValidatedPlan,
    rework_steps: BTreeMap<u32, PlanStep>,
    workspace: PathBuf,
    store: Arc<EventStore>,
    budget: BudgetConfig,
    review_seq: u64,
    warned_budget: bool,
    failure_tag: Option<&'static str>,
    steps_started: bool,
    run_cancel: CancellationToken,
    timed_out: Arc<AtomicBool>,
}

impl RunCtx {
    fn plan_step(&self, number: u32) -> Option<&PlanStep> {
        self.plan.step(number).or_else(|| self.rework_steps.get(&number))
    }
}

impl<C: Clock> Orchestrator<C> {
    pub fn new(config: FabConfig, runtime: Arc<dyn RuntimeAdapter>, clock: C) -> Self {
        let validator = PlanValidator::new(&config);
        let runner = Arc::new(AgentRunner::new(
            runtime,
            &config.runtime,
            config.project.limits.clone(),
        ));
        let workspaces = WorkspaceManager::new(config.platform.workspace_base.clone());
        let store_config = EventStoreConfig {
            global_events_dir: config.platform.events_dir.clone(),
            buffer_capacity: None,
        };
        Self {
            config,
            validator,
            runner,
            workspaces,
            store_config,
            clock,
            cancel: CancellationToken::new(),
        }
    }

    /// Token for out-of-process cancellation; cancelling it terminates the
    /// active child and marks pending steps skipped.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive one ticket through the full state machine.
    pub async fn execute(&self, ticket: TicketDetails) -> Result<RunOutcome, OrchestratorError> {
        let store = Arc::new(EventStore::new(self.store_config.clone()));
        let run_id = RunId::generate(&self.clock);
        let run = TaskRun::new(
            run_id.clone(),
            self.config.project.id.clone(),
            ticket.clone(),
            self.clock.epoch_ms(),
        );
        tracing::info!(run_id = %run_id, ticket = %ticket.id, "run created");

        let mut ctx = RunCtx {
            run,
            plan: empty_plan(),
            rework_steps: BTreeMap::new(),
            workspace: PathBuf::new(),
            store: store.clone(),
            budget: self.config.project.budget.clone(),
            review_seq: 0,
            warned_budget: false,
            failure_tag: None,
            steps_started: false,
            run_cancel: self.cancel.child_token(),
            timed_out: Arc::new(AtomicBool::new(false)),
        };

        // Emitted before the workspace exists; the store buffers it.
        self.emit(
            &mut ctx,
            EventType::TaskCreated,
            &data::TaskCreated { project_id: self.config.project.id.clone(), ticket },
        )?;

        ctx.workspace = self.workspaces.create(&self.config.project.id, &run_id).await?;
        store.initialize(&ctx.workspace)?;

        let watchdog = self.config.project.limits.run_timeout_ms.map(|ms| {
            let token = ctx.run_cancel.clone();
            let flag = Arc::clone(&ctx.timed_out);
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                flag.store(true, Ordering::SeqCst);
                token.cancel();
            })
        });

        let drive = self.drive(&mut ctx).await;
        if let Some(handle) = watchdog {
            handle.abort();
        }
        drive?;

        let exit_code = match ctx.run.status {
            RunStatus::Completed => 0,
            _ => match ctx.failure_tag {
                Some("configuration") | Some("plan_integrity") if !ctx.steps_started => 2,
                _ => 1,
            },
        };
        Ok(RunOutcome { run: ctx.run, workspace: ctx.workspace, store, exit_code })
    }

    /// plan → validate → execute → finalize. Terminal failures are handled
    /// inside (the run ends `failed`/`cancelled`); `Err` means the
    /// infrastructure itself broke (event store, workspace).
    async fn drive(&self, ctx: &mut RunCtx) -> Result<(), OrchestratorError> {
        // -- planning --
        ctx.run.set_status(RunStatus::Planning, self.clock.epoch_ms());
        let planner_result = self
            .runner
            .run_planner(PlannerRunRequest {
                run_id: ctx.run.run_id.clone(),
                ticket: ctx.run.ticket.clone(),
                workspace: ctx.workspace.clone(),
                rework: None,
                cancel: ctx.run_cancel.clone(),
            })
            .await;
        let generated = match planner_result {
            Ok(generated) => generated,
            Err(e) => {
                if ctx.run_cancel.is_cancelled() {
                    return self.finish_cancelled(ctx);
                }
                let (tag, message) = adapter_failure(&e);
                return self.fail(ctx, tag, message);
            }
        };
        self.emit(
            ctx,
            EventType::TaskPlanGenerated,
            &data::PlanGenerated {
                plan: generated.plan.clone(),
                tokens_used: generated.tokens_used,
                cost_usd: generated.cost_usd,
            },
        )?;
        ctx.run.plan = Some(generated.plan.clone());

        // -- validation --
        let outcome = match self.validator.validate(generated.plan, &ctx.run.ticket) {
            Ok(outcome) => outcome,
            Err(e) => {
                let err: OrchestratorError = e.into();
                let message = err.to_string();
                return self.fail(ctx, err.tag(), message);
            }
        };
        self.emit(
            ctx,
            EventType::TaskPlanValidated,
            &data::PlanValidated { plan: outcome.plan.clone(), warnings: outcome.warnings },
        )?;
        ctx.run.validated_plan = Some(outcome.plan.clone());
        ctx.run.steps = outcome.plan.steps.iter().map(StepExecution::new).collect();
        if let Some(cost) = outcome.plan.max_cost_override_usd {
            ctx.budget.per_task_max_cost_usd = Some(cost);
        }
        if let Some(tokens) = outcome.plan.max_tokens_override {
            ctx.budget.max_total_tokens = Some(tokens);
        }
        ctx.plan = outcome.plan;

        // -- execution --
        ctx.run.set_status(RunStatus::Executing, self.clock.epoch_ms());
        self.emit(ctx, EventType::TaskStarted, &serde_json::json!({}))?;

        for unit in schedule_units(&ctx.plan) {
            if ctx.run_cancel.is_cancelled() {
                return self.finish_cancelled(ctx);
            }
            let flow = match unit {
                Unit::Single(n) => self.drive_queue(ctx, VecDeque::from([n])).await?,
                Unit::Group(members) => self.drive_group(ctx, &members).await?,
            };
            if flow == Flow::Halt {
                return Ok(());
            }
        }

        self.finish_completed(ctx)
    }

    /// Run a sequence of step numbers, expanding rework cycles in place.
    ///
    /// When a step reports `needs_rework`, its rework steps are queued ahead
    /// of a re-execution of the step itself, so nested rework simply keeps
    /// prepending until the cycle budget runs out.
    async fn drive_queue(
        &self,
        ctx: &mut RunCtx,
        mut queue: VecDeque<u32>,
    ) -> Result<Flow, OrchestratorError> {
        while let Some(number) = queue.pop_front() {
            if ctx.run_cancel.is_cancelled() {
                self.finish_cancelled(ctx)?;
                return Ok(Flow::Halt);
            }
            let request = match self.prepare_step(ctx, number, false)? {
                Some(request) => request,
                None => return self.step_misconfigured(ctx, number).map(|_| Flow::Halt),
            };
            let outcome = self.runner.run_step(request).await;
            let verdict = self.settle_step(ctx, number, outcome)?;
            match verdict {
                StepVerdict::Complete => {
                    if self.checkpoint(ctx, number).await? == Flow::Halt {
                        return Ok(Flow::Halt);
                    }
                    if self.enforce_budget(ctx)? {
                        return Ok(Flow::Halt);
                    }
                    if self.process_gates(ctx, number).await? == Flow::Halt {
                        return Ok(Flow::Halt);
                    }
                }
                StepVerdict::NeedsRework { reason, target } => {
                    match self.trigger_rework(ctx, number, reason, target).await? {
                        ReworkPlanned::Halted => return Ok(Flow::Halt),
                        ReworkPlanned::Steps(rework) => {
                            if self.enforce_budget(ctx)? {
                                return Ok(Flow::Halt);
                            }
                            // Rework steps run first, then the step re-runs.
                            queue.push_front(number);
                            for n in rework.into_iter().rev() {
                                queue.push_front(n);
                            }
                        }
                    }
                }
                StepVerdict::Failed { tag, error } => {
                    self.fail(ctx, tag, error)?;
                    return Ok(Flow::Halt);
                }
                StepVerdict::Cancelled => {
                    self.finish_cancelled(ctx)?;
                    return Ok(Flow::Halt);
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Start all members of a parallel group together and settle them in
    /// completion order. Members are never cancelled on a sibling's failure;
    /// the run transitions only after every member reaches a terminal state.
    async fn drive_group(
        &self,
        ctx: &mut RunCtx,
        members: &[u32],
    ) -> Result<Flow, OrchestratorError> {
        let mut join = JoinSet::new();
        for &number in members {
            let request = match self.prepare_step(ctx, number, true)? {
                Some(request) => request,
                None => return self.step_misconfigured(ctx, number).map(|_| Flow::Halt),
            };
            let runner = Arc::clone(&self.runner);
            join.spawn(async move { (number, runner.run_step(request).await) });
        }

        let mut rework = Vec::new();
        let mut failed: Option<(&'static str, String)> = None;
        let mut cancelled = false;
        while let Some(joined) = join.join_next().await {
            let (number, outcome) = joined
                .map_err(|e| OrchestratorError::Runtime(format!("group member task: {e}")))?;
            match self.settle_step(ctx, number, outcome)? {
                StepVerdict::Complete => {
                    if self.checkpoint(ctx, number).await? == Flow::Halt {
                        return Ok(Flow::Halt);
                    }
                }
                StepVerdict::NeedsRework { reason, target } => {
                    rework.push((number, reason, target));
                }
                StepVerdict::Failed { tag, error } => {
                    failed.get_or_insert((tag, error));
                }
                StepVerdict::Cancelled => cancelled = true,
            }
        }

        if cancelled {
            self.finish_cancelled(ctx)?;
            return Ok(Flow::Halt);
        }
        if let Some((tag, error)) = failed {
            self.fail(ctx, tag, error)?;
            return Ok(Flow::Halt);
        }
        if self.enforce_budget(ctx)? {
            return Ok(Flow::Halt);
        }
        let mut reworked = std::collections::BTreeSet::new();
        for (number, reason, target) in rework {
            reworked.insert(number);
            match self.trigger_rework(ctx, number, reason, target).await? {
                ReworkPlanned::Halted => return Ok(Flow::Halt),
                ReworkPlanned::Steps(steps) => {
                    let mut queue: VecDeque<u32> = steps.into();
                    queue.push_back(number);
                    if self.drive_queue(ctx, queue).await? == Flow::Halt {
                        return Ok(Flow::Halt);
                    }
                }
            }
        }
        for &number in members {
            // Reworked members had their gates processed on the re-run path.
            if reworked.contains(&number) {
                continue;
            }
            if ctx.run.step(number).map(|s| s.status) == Some(StepStatus::Completed)
                && self.process_gates(ctx, number).await? == Flow::Halt
            {
                return Ok(Flow::Halt);
            }
        }
        Ok(Flow::Continue)
    }

    /// Mark a step running, emit `step.started` and `agent.spawned`, and
    /// build the owned runner request.
    fn prepare_step(
        &self,
        ctx: &mut RunCtx,
        number: u32,
        scoped_result: bool,
    ) -> Result<Option<StepRunRequest>, OrchestratorError> {
        let Some(plan_step) = ctx.plan_step(number).cloned() else {
            return Ok(None);
        };
        let Some(agent) = self.config.agent(&plan_step.agent).cloned() else {
            return Ok(None);
        };
        let model = ctx
            .plan
            .model_overrides
            .get(&agent.id)
            .cloned()
            .or_else(|| plan_step.model.clone())
            .or_else(|| agent.default_model.clone());

        let mut prior_results = BTreeMap::new();
        for input in &plan_step.context_inputs {
            if let fab_core::ContextInput::StepOutput { step } = input {
                if let Some(result) = ctx.run.step(*step).and_then(|s| s.result.clone()) {
                    prior_results.insert(*step, result);
                }
            }
        }

        let now = self.clock.epoch_ms();
        let attempt = {
            let Some(step) = ctx.run.step_mut(number) else {
                return Ok(None);
            };
            if step.status == StepStatus::NeedsRework {
                step.reset_for_retry();
            }
            step.start(now);
            step.attempt
        };
        ctx.steps_started = true;

        self.emit(
            ctx,
            EventType::StepStarted,
            &data::StepStarted { step_number: number, agent: agent.id.clone(), attempt },
        )?;
        self.emit(
            ctx,
            EventType::AgentSpawned,
            &data::AgentSpawned {
                step_number: number,
                agent: agent.id.clone(),
                runtime: self.runner.runtime().kind().to_string(),
            },
        )?;

        Ok(Some(StepRunRequest {
            run_id: ctx.run.run_id.clone(),
            ticket: ctx.run.ticket.clone(),
            workspace: ctx.workspace.clone(),
            step: plan_step,
            agent,
            model,
            attempt,
            scoped_result,
            prior_results,
            cancel: ctx.run_cancel.clone(),
        }))
    }

    /// Apply a runner outcome to the run: token/cost attribution, step
    /// status, `agent.exited` plus the step transition event.
    fn settle_step(
        &self,
        ctx: &mut RunCtx,
        number: u32,
        outcome: crate::runner::StepRunOutcome,
    ) -> Result<StepVerdict, OrchestratorError> {
        let now = self.clock.epoch_ms();
        let agent_id = {
            let Some(step) = ctx.run.step_mut(number) else {
                return Ok(StepVerdict::Failed {
                    tag: "step_failed",
                    error: format!("step {number} vanished from run state"),
                });
            };
            step.tokens_used += outcome.tokens_used;
            step.cost_usd += outcome.cost_usd;
            if let Some(id) = &outcome.runtime_id {
                step.container_id = Some(id.clone());
            }
            step.result = outcome.agent_result.clone();
            step.agent.clone()
        };
        ctx.run.recompute_totals();

        if let Some(runtime_id) = &outcome.runtime_id {
            self.emit(
                ctx,
                EventType::AgentExited,
                &data::AgentExited {
                    step_number: number,
                    agent: agent_id.clone(),
                    runtime_id: runtime_id.clone(),
                    exit_code: outcome.exit_code,
                    duration_ms: outcome.duration_ms,
                },
            )?;
        }

        let step_tokens =
            ctx.run.step(number).map(|s| (s.tokens_used, s.cost_usd)).unwrap_or((0, 0.0));
        let totals = (ctx.run.total_tokens_used, ctx.run.total_cost_usd);

        if let Some(failure) = &outcome.failure {
            let error = failure.error_string();
            if let Some(step) = ctx.run.step_mut(number) {
                step.finish(StepStatus::Failed, now);
                step.error = Some(error.clone());
            }
            self.emit(
                ctx,
                EventType::StepFailed,
                &data::StepFailed {
                    step_number: number,
                    agent: agent_id,
                    error: error.clone(),
                    tokens_used: step_tokens.0,
                    cost_usd: step_tokens.1,
                    total_tokens_used: totals.0,
                    total_cost_usd: totals.1,
                    result: outcome.agent_result,
                },
            )?;
            let verdict = match failure {
                StepFailureKind::Cancelled => StepVerdict::Cancelled,
                StepFailureKind::Timeout { .. } => {
                    StepVerdict::Failed { tag: "timeout", error }
                }
                StepFailureKind::Guardrail(_) => {
                    StepVerdict::Failed { tag: "guardrail_denied", error }
                }
                StepFailureKind::Invocation(_) => {
                    StepVerdict::Failed { tag: "runtime_invocation", error }
                }
                _ => StepVerdict::Failed { tag: "step_failed", error },
            };
            return Ok(verdict);
        }

        let Some(result) = outcome.agent_result else {
            // Runner contract: no failure implies a parsed result.
            let error = "runner returned neither result nor failure".to_string();
            if let Some(step) = ctx.run.step_mut(number) {
                step.finish(StepStatus::Failed, now);
                step.error = Some(error.clone());
            }
            return Ok(StepVerdict::Failed { tag: "step_failed", error });
        };

        match result.status {
            AgentResultStatus::Complete => {
                if let Some(step) = ctx.run.step_mut(number) {
                    step.finish(StepStatus::Completed, now);
                }
                self.emit(
                    ctx,
                    EventType::StepCompleted,
                    &data::StepCompleted {
                        step_number: number,
                        agent: agent_id,
                        tokens_used: step_tokens.0,
                        cost_usd: step_tokens.1,
                        total_tokens_used: totals.0,
                        total_cost_usd: totals.1,
                        result: Some(result),
                    },
                )?;
                Ok(StepVerdict::Complete)
            }
            AgentResultStatus::NeedsRework => {
                // The rework event finalizes this transition.
                Ok(StepVerdict::NeedsRework {
                    reason: result
                        .rework_reason
                        .clone()
                        .unwrap_or_else(|| "unspecified rework reason".to_string()),
                    target: result.rework_target.clone(),
                })
            }
            AgentResultStatus::Blocked | AgentResultStatus::Failed => {
                let error = format!("{}: {}", result.status, result.summary);
                if let Some(step) = ctx.run.step_mut(number) {
                    step.finish(StepStatus::Failed, now);
                    step.error = Some(error.clone());
                }
                self.emit(
                    ctx,
                    EventType::StepFailed,
                    &data::StepFailed {
                        step_number: number,
                        agent: agent_id,
                        error: error.clone(),
                        tokens_used: step_tokens.0,
                        cost_usd: step_tokens.1,
                        total_tokens_used: totals.0,
                        total_cost_usd: totals.1,
                        result: Some(result),
                    },
                )?;
                Ok(StepVerdict::Failed { tag: "step_failed", error })
            }
        }
    }

    /// Stage-and-commit dirty files after a completed step. A commit failure
    /// fails the step and the run; a clean tree is a silent no-op.
    async fn checkpoint(&self, ctx: &mut RunCtx, number: u32) -> Result<Flow, OrchestratorError> {
        match git::commit_step_checkpoint(&ctx.workspace, &ctx.run.run_id, number).await {
            Ok(Some(commit)) => {
                self.emit(
                    ctx,
                    EventType::StepCommitted,
                    &data::StepCommitted { step_number: number, commit },
                )?;
                Ok(Flow::Continue)
            }
            Ok(None) => Ok(Flow::Continue),
            Err(e) => {
                let error = format!("checkpoint commit failed: {e}");
                let now = self.clock.epoch_ms();
                let agent_id =
                    ctx.run.step(number).map(|s| s.agent.clone()).unwrap_or_default();
                if let Some(step) = ctx.run.step_mut(number) {
                    step.finish(StepStatus::Failed, now);
                    step.error = Some(error.clone());
                }
                let totals = (ctx.run.total_tokens_used, ctx.run.total_cost_usd);
                self.emit(
                    ctx,
                    EventType::StepFailed,
                    &data::StepFailed {
                        step_number: number,
                        agent: agent_id,
                        error: error.clone(),
                        tokens_used: 0,
                        cost_usd: 0.0,
                        total_tokens_used: totals.0,
                        total_cost_usd: totals.1,
                        result: None,
                    },
                )?;
                self.fail(ctx, "git", error)?;
                Ok(Flow::Halt)
            }
        }
    }

    /// Bounded rework: consume one cycle, ask the planner for rework steps,
    /// append them with numbers ≥ 900 depending on the failing step.
    async fn trigger_rework(
        &self,
        ctx: &mut RunCtx,
        number: u32,
        reason: String,
        target: Option<String>,
    ) -> Result<ReworkPlanned, OrchestratorError> {
        let now = self.clock.epoch_ms();
        if ctx.run.rework_cycles >= self.config.project.limits.max_rework_cycles {
            if let Some(step) = ctx.run.step_mut(number) {
                step.finish(StepStatus::NeedsRework, now);
            }
            self.fail(
                ctx,
                "rework_exhausted",
                format!(
                    "step {number} needs rework but all {} cycles are spent: {reason}",
                    self.config.project.limits.max_rework_cycles
                ),
            )?;
            return Ok(ReworkPlanned::Halted);
        }
        ctx.run.rework_cycles += 1;
        ctx.run.set_status(RunStatus::Rework, now);
        if let Some(step) = ctx.run.step_mut(number) {
            step.finish(StepStatus::NeedsRework, now);
        }

        let planned = self
            .runner
            .run_planner(PlannerRunRequest {
                run_id: ctx.run.run_id.clone(),
                ticket: ctx.run.ticket.clone(),
                workspace: ctx.workspace.clone(),
                rework: Some(ReworkRequest {
                    step_number: number,
                    reason: reason.clone(),
                    target: target.clone(),
                }),
                cancel: ctx.run_cancel.clone(),
            })
            .await;
        let generated = match planned {
            Ok(generated) => generated,
            Err(e) => {
                if ctx.run_cancel.is_cancelled() {
                    self.finish_cancelled(ctx)?;
                    return Ok(ReworkPlanned::Halted);
                }
                let (tag, message) = adapter_failure(&e);
                self.fail(ctx, tag, format!("rework planning failed: {message}"))?;
                return Ok(ReworkPlanned::Halted);
            }
        };

        let base = ctx.run.next_rework_number();
        let mut numbers = Vec::new();
        for (offset, mut step) in generated.plan.steps.into_iter().enumerate() {
            let rework_number = base + offset as u32;
            step.step_number = rework_number;
            step.depends_on = vec![number];
            if let Some(resolved) =
                target.as_ref().filter(|t| self.config.agent(t.as_str()).is_some())
            {
                step.agent = resolved.clone();
            }
            ctx.run.steps.push(StepExecution::new(&step));
            ctx.rework_steps.insert(rework_number, step);
            numbers.push(rework_number);
        }
        if numbers.is_empty() {
            self.fail(ctx, "step_failed", format!("rework plan for step {number} was empty"))?;
            return Ok(ReworkPlanned::Halted);
        }

        let (step_tokens, step_cost) =
            ctx.run.step(number).map(|s| (s.tokens_used, s.cost_usd)).unwrap_or((0, 0.0));
        let totals = (ctx.run.total_tokens_used, ctx.run.total_cost_usd);
        self.emit(
            ctx,
            EventType::StepReworkTriggered,
            &data::ReworkTriggered {
                step_number: number,
                rework_steps: numbers.clone(),
                reason,
                target,
                cycle: ctx.run.rework_cycles,
                tokens_used: step_tokens,
                cost_usd: step_cost,
                total_tokens_used: totals.0,
                total_cost_usd: totals.1,
            },
        )?;
        ctx.run.set_status(RunStatus::Executing, self.clock.epoch_ms());
        tracing::info!(
            run_id = %ctx.run.run_id,
            step = number,
            rework_steps = ?numbers,
            cycle = ctx.run.rework_cycles,
            "rework triggered"
        );
        Ok(ReworkPlanned::Steps(numbers))
    }

    /// Token and cost aggregates against the effective budget. Emits the
    /// warning event once, and on breach fails the run before the next
    /// `step.started`.
    fn enforce_budget(&self, ctx: &mut RunCtx) -> Result<bool, OrchestratorError> {
        let totals = data::TokenLimit {
            total_tokens_used: ctx.run.total_tokens_used,
            total_cost_usd: ctx.run.total_cost_usd,
            max_total_tokens: ctx.budget.max_total_tokens,
            per_task_max_cost_usd: ctx.budget.per_task_max_cost_usd,
        };

        let mut breach: Option<String> = None;
        if let Some(cap) = ctx.budget.per_task_max_cost_usd {
            if ctx.run.total_cost_usd > cap {
                breach = Some(format!(
                    "cost {:.4} exceeds per-task cap {:.4}",
                    ctx.run.total_cost_usd, cap
                ));
            }
        }
        if breach.is_none() {
            if let Some(cap) = ctx.budget.max_total_tokens {
                if ctx.run.total_tokens_used > cap {
                    breach = Some(format!(
                        "tokens {} exceed total cap {cap}",
                        ctx.run.total_tokens_used
                    ));
                }
            }
        }
        if breach.is_none() {
            if let Some(cap) = ctx.budget.max_tokens_per_agent {
                let mut per_agent: BTreeMap<&str, u64> = BTreeMap::new();
                for step in &ctx.run.steps {
                    *per_agent.entry(step.agent.as_str()).or_default() += step.tokens_used;
                }
                if let Some((agent, tokens)) =
                    per_agent.into_iter().find(|(_, tokens)| *tokens > cap)
                {
                    breach =
                        Some(format!("agent {agent} used {tokens} tokens over cap {cap}"));
                }
            }
        }

        if let Some(message) = breach {
            self.emit(ctx, EventType::AgentTokenLimitExceeded, &totals)?;
            self.fail(ctx, "budget_exceeded", message)?;
            return Ok(true);
        }

        if !ctx.warned_budget && ctx.budget.warn_threshold_pct > 0 {
            let pct = ctx.budget.warn_threshold_pct as f64 / 100.0;
            let near_cost = ctx
                .budget
                .per_task_max_cost_usd
                .is_some_and(|cap| ctx.run.total_cost_usd >= cap * pct);
            let near_tokens = ctx
                .budget
                .max_total_tokens
                .is_some_and(|cap| ctx.run.total_tokens_used as f64 >= cap as f64 * pct);
            if near_cost || near_tokens {
                ctx.warned_budget = true;
                self.emit(ctx, EventType::AgentTokenLimitWarning, &totals)?;
            }
        }
        Ok(false)
    }

    /// Gates attached after a completed step: write the pending file, wait
    /// for the decision, resume or fail.
    async fn process_gates(&self, ctx: &mut RunCtx, number: u32) -> Result<Flow, OrchestratorError> {
        let gates: Vec<_> = ctx.plan.gates_after(number).cloned().collect();
        for gate in gates {
            ctx.review_seq += 1;
            let review_id = ReviewId::from_seq(ctx.review_seq);
            let review = HumanReview {
                review_id: review_id.clone(),
                run_id: ctx.run.run_id.clone(),
                after_step: number,
                status: ReviewStatus::Pending,
                summary: gate.summary.clone(),
                artifacts_to_review: gate.artifacts_to_review.clone(),
                reviewer_feedback: None,
                decided_at: None,
            };
            gates::request_review(&ctx.workspace, &review)
                .await
                .map_err(|e| OrchestratorError::HumanGate(e.to_string()))?;
            self.emit(
                ctx,
                EventType::HumanGateRequested,
                &data::Gate {
                    review_id: review_id.to_string(),
                    after_step: number,
                    reviewer_feedback: None,
                },
            )?;
            ctx.run.set_status(RunStatus::WaitingHumanReview, self.clock.epoch_ms());

            let limits = &self.config.project.limits;
            let wait = GateWait {
                poll: limits.gate_poll(),
                auto_approve_after: limits
                    .gate_auto_approve_after_ms
                    .map(std::time::Duration::from_millis),
                confidence_threshold: limits.gate_confidence_threshold,
            };
            let confidence = ctx.plan.confidence.unwrap_or(0.0);
            let decision = gates::await_decision(
                &ctx.workspace,
                &review_id,
                gate.required,
                confidence,
                &wait,
                &self.clock,
                &ctx.run_cancel,
            )
            .await;

            match decision {
                Ok(decision) => {
                    let payload = data::Gate {
                        review_id: review_id.to_string(),
                        after_step: number,
                        reviewer_feedback: decision.reviewer_feedback.clone(),
                    };
                    match decision.status {
                        DecisionStatus::Approved => {
                            self.emit(ctx, EventType::HumanGateApproved, &payload)?;
                            ctx.run.set_status(RunStatus::Executing, self.clock.epoch_ms());
                        }
                        DecisionStatus::Rejected => {
                            self.emit(ctx, EventType::HumanGateRejected, &payload)?;
                            let feedback = decision
                                .reviewer_feedback
                                .unwrap_or_else(|| "no feedback".to_string());
                            self.fail(
                                ctx,
                                "human_gate_rejected",
                                format!("review {review_id} rejected: {feedback}"),
                            )?;
                            return Ok(Flow::Halt);
                        }
                    }
                }
                Err(GateError::Cancelled) => {
                    self.finish_cancelled(ctx)?;
                    return Ok(Flow::Halt);
                }
                Err(e) => {
                    self.fail(ctx, "human_gate", e.to_string())?;
                    return Ok(Flow::Halt);
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn finish_completed(&self, ctx: &mut RunCtx) -> Result<(), OrchestratorError> {
        let now = self.clock.epoch_ms();
        // A step may surface the PR it opened through result metadata.
        ctx.run.pr_url = ctx.run.steps.iter().rev().find_map(|s| {
            s.result
                .as_ref()
                .and_then(|r| r.metadata.get("pr_url"))
                .and_then(|v| v.as_str())
                .map(|v| v.to_string())
        });
        ctx.run.set_status(RunStatus::Completed, now);
        if let Some(url) = ctx.run.pr_url.clone() {
            self.emit(ctx, EventType::PrCreated, &data::PrCreated { url })?;
            self.emit(
                ctx,
                EventType::TicketUpdated,
                &data::TicketUpdated {
                    ticket_id: ctx.run.ticket.id.clone(),
                    status: "completed".to_string(),
                },
            )?;
        }
        self.emit(
            ctx,
            EventType::TaskCompleted,
            &data::TaskCompleted {
                total_tokens_used: ctx.run.total_tokens_used,
                total_cost_usd: ctx.run.total_cost_usd,
                pr_url: ctx.run.pr_url.clone(),
            },
        )?;
        ctx.store.close()?;
        tracing::info!(
            run_id = %ctx.run.run_id,
            tokens = ctx.run.total_tokens_used,
            cost_usd = ctx.run.total_cost_usd,
            "run completed"
        );
        Ok(())
    }

    /// Terminal failure: status, error, `task.failed` with the machine tag,
    /// store flush.
    fn fail(&self, ctx: &mut RunCtx, tag: &'static str, message: String) -> Result<(), OrchestratorError> {
        ctx.failure_tag = Some(tag);
        ctx.run.error = Some(message.clone());
        ctx.run.set_status(RunStatus::Failed, self.clock.epoch_ms());
        self.emit(
            ctx,
            EventType::TaskFailed,
            &data::TaskFailed {
                error: tag.to_string(),
                message: message.clone(),
                total_tokens_used: ctx.run.total_tokens_used,
                total_cost_usd: ctx.run.total_cost_usd,
            },
        )?;
        ctx.store.close()?;
        tracing::error!(run_id = %ctx.run.run_id, tag, %message, "run failed");
        Ok(())
    }

    /// Cancellation and run-timeout epilogue: remaining pending steps are
    /// skipped, the terminal event carries the distinguishing tag.
    fn finish_cancelled(&self, ctx: &mut RunCtx) -> Result<(), OrchestratorError> {
        let now = self.clock.epoch_ms();
        for step in ctx.run.steps.iter_mut() {
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
            }
        }
        if ctx.timed_out.load(Ordering::SeqCst) {
            let message = format!(
                "run exceeded wall-clock budget of {}ms",
                self.config.project.limits.run_timeout_ms.unwrap_or_default()
            );
            return self.fail(ctx, "run_timeout", message);
        }
        ctx.failure_tag = Some("cancelled");
        ctx.run.error = Some("cancelled".to_string());
        ctx.run.set_status(RunStatus::Cancelled, now);
        self.emit(
            ctx,
            EventType::TaskFailed,
            &data::TaskFailed {
                error: "cancelled".to_string(),
                message: "cancelled".to_string(),
                total_tokens_used: ctx.run.total_tokens_used,
                total_cost_usd: ctx.run.total_cost_usd,
            },
        )?;
        ctx.store.close()?;
        tracing::warn!(run_id = %ctx.run.run_id, "run cancelled");
        Ok(())
    }

    fn step_misconfigured(&self, ctx: &mut RunCtx, number: u32) -> Result<(), OrchestratorError> {
        self.fail(
            ctx,
            "configuration",
            format!("step {number} references an unknown step or agent definition"),
        )
    }

    fn emit<T: serde::Serialize>(
        &self,
        ctx: &mut RunCtx,
        event_type: EventType,
        payload: &T,
    ) -> Result<(), OrchestratorError> {
        let value = serde_json::to_value(payload)
            .map_err(|e| OrchestratorError::Runtime(format!("event payload encode: {e}")))?;
        ctx.store.store(TaskEvent::new(
            event_type,
            &ctx.run.run_id,
            value,
            self.clock.epoch_ms(),
        ))?;
        Ok(())
    }
}

/// Map a runtime adapter error onto the failure taxonomy.
fn adapter_failure(e: &RuntimeAdapterError) -> (&'static str, String) {
    match e {
        RuntimeAdapterError::GuardrailDenied(msg) => ("guardrail_denied", msg.clone()),
        RuntimeAdapterError::Subprocess(SubprocessError::Spawn { .. }) => {
            ("runtime_invocation", e.to_string())
        }
        RuntimeAdapterError::Subprocess(SubprocessError::Timeout { .. }) => {
            ("timeout", e.to_string())
        }
        _ => ("runtime", e.to_string()),
    }
}

/// Execution order: steps in numeric order, with parallel-group members
/// collapsed into one unit at the first member's position.
fn schedule_units(plan: &ValidatedPlan) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut scheduled: std::collections::BTreeSet<u32> = Default::default();
    for step in &plan.steps {
        let number = step.step_number;
        if scheduled.contains(&number) {
            continue;
        }
        match plan.group_of(number) {
            Some(group) => {
                let mut members: Vec<u32> = group.to_vec();
                members.sort_unstable();
                members.dedup();
                scheduled.extend(members.iter().copied());
                units.push(Unit::Group(members));
            }
            None => {
                scheduled.insert(number);
                units.push(Unit::Single(number));
            }
        }
    }
    units
}

fn empty_plan() -> ValidatedPlan {
    ValidatedPlan {
        plan_id: fab_core::PlanId::from_string("plan-unset"),
        ticket_id: String::new(),
        classification: String::new(),
        reasoning: String::new(),
        steps: Vec::new(),
        parallel_groups: Vec::new(),
        human_gates: Vec::new(),
        confidence: None,
        model_overrides: BTreeMap::new(),
        max_cost_override_usd: None,
        max_tokens_override: None,
    }
}

#[cfg(test)]
#[path = "service_tests/mod.rs"]
mod tests;
