// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted in-memory runtime for other crates' tests.
//!
//! `FakeRuntime` honors the real invocation contract: it writes the scripted
//! result to the context's result path (so the runner exercises its real
//! parse path), creates the stdio log files, and respects timeout and
//! cancellation.

use crate::runtime::{
    PlanGenerationResult, PlannerContext, RuntimeAdapter, RuntimeAdapterError, RuntimeInvocation,
    RuntimeStepResult, SpawnSlot, StepContext,
};
use async_trait::async_trait;
use fab_core::config::RuntimeKind;
use fab_core::{AgentResult, AgentResultStatus, ExecutionPlan};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// One scripted planner response.
#[derive(Debug, Clone)]
pub struct PlanScript {
    pub plan: ExecutionPlan,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

/// One scripted step attempt.
#[derive(Debug, Clone)]
pub struct StepScript {
    /// `None` means the child exits without writing a result file.
    pub result: Option<AgentResult>,
    pub exit_code: i32,
    pub tokens_used: u64,
    pub cost_usd: f64,
    /// Simulated child wall-clock; exceeding the step timeout reports a
    /// timed-out run.
    pub delay: Duration,
}

impl StepScript {
    pub fn complete(summary: impl Into<String>) -> Self {
        Self::from_result(AgentResult::with_status(AgentResultStatus::Complete, summary))
    }

    pub fn needs_rework(reason: impl Into<String>, target: Option<&str>) -> Self {
        let mut result = AgentResult::with_status(AgentResultStatus::NeedsRework, "needs rework");
        result.rework_reason = Some(reason.into());
        result.rework_target = target.map(|t| t.to_string());
        Self::from_result(result)
    }

    pub fn blocked(summary: impl Into<String>) -> Self {
        Self::from_result(AgentResult::with_status(AgentResultStatus::Blocked, summary))
    }

    pub fn failed(summary: impl Into<String>) -> Self {
        Self::from_result(AgentResult::with_status(AgentResultStatus::Failed, summary))
    }

    /// Child exits cleanly but never writes `.agent-result.json`.
    pub fn no_result() -> Self {
        Self { result: None, exit_code: 0, tokens_used: 0, cost_usd: 0.0, delay: Duration::ZERO }
    }

    pub fn from_result(result: AgentResult) -> Self {
        Self {
            result: Some(result),
            exit_code: 0,
            tokens_used: 10,
            cost_usd: 0.01,
            delay: Duration::ZERO,
        }
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = tokens;
        self
    }

    pub fn cost(mut self, cost: f64) -> Self {
        self.cost_usd = cost;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Recorded invocation, for asserting call order and attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    Planner { rework: bool },
    Step { step_number: u32, attempt: u32 },
}

#[derive(Default)]
struct FakeInner {
    plans: VecDeque<PlanScript>,
    steps: HashMap<u32, VecDeque<StepScript>>,
    calls: Vec<FakeCall>,
}

pub struct FakeRuntime {
    kind: RuntimeKind,
    inner: Mutex<FakeInner>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self { kind: RuntimeKind::Claude, inner: Mutex::new(FakeInner::default()) }
    }

    /// Queue the next planner response (initial plan first, then rework plans).
    pub fn push_plan(&self, plan: ExecutionPlan) {
        self.push_plan_with_usage(plan, 100, 0.01);
    }

    pub fn push_plan_with_usage(&self, plan: ExecutionPlan, tokens_used: u64, cost_usd: f64) {
        self.inner.lock().plans.push_back(PlanScript { plan, tokens_used, cost_usd });
    }

    /// Queue the next attempt's script for a step number.
    pub fn script_step(&self, step_number: u32, script: StepScript) {
        self.inner.lock().steps.entry(step_number).or_default().push_back(script);
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.inner.lock().calls.clone()
    }
}

#[async_trait]
impl RuntimeAdapter for FakeRuntime {
    fn kind(&self) -> RuntimeKind {
        self.kind
    }

    fn prepare(&self, ctx: &StepContext) -> RuntimeInvocation {
        RuntimeInvocation {
            program: "fake".to_string(),
            args: vec![ctx.prompt.clone()],
            env: Default::default(),
            cwd: ctx.workspace.clone(),
        }
    }

    async fn run_step(
        &self,
        ctx: &StepContext,
        attempt: u32,
    ) -> Result<RuntimeStepResult, RuntimeAdapterError> {
        let script = {
            let mut inner = self.inner.lock();
            inner.calls.push(FakeCall::Step { step_number: ctx.step_number, attempt });
            inner
                .steps
                .get_mut(&ctx.step_number)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| StepScript::complete("scripted default"))
        };

        let slot = SpawnSlot::for_step(self.kind, &ctx.workspace, ctx.step_number, attempt);
        let _ = std::fs::write(&slot.stdout_path, b"");
        let _ = std::fs::write(&slot.stderr_path, b"");

        let timed_out = script.delay > ctx.timeout;
        let sleep = script.delay.min(ctx.timeout);
        let cancelled = if sleep.is_zero() {
            ctx.cancel.is_cancelled()
        } else {
            tokio::select! {
                _ = tokio::time::sleep(sleep) => false,
                _ = ctx.cancel.cancelled() => true,
            }
        };

        if !timed_out && !cancelled {
            if let Some(result) = &script.result {
                let json = serde_json::to_string_pretty(result)?;
                std::fs::write(&ctx.result_path, json).map_err(RuntimeAdapterError::DebugMeta)?;
            }
        }

        Ok(RuntimeStepResult {
            exit_code: if timed_out || cancelled { -1 } else { script.exit_code },
            stdout_path: slot.stdout_path,
            stderr_path: slot.stderr_path,
            duration_ms: script.delay.as_millis() as u64,
            tokens_used: script.tokens_used,
            cost_usd: script.cost_usd,
            runtime_id: format!("fake-{}-{attempt}", ctx.step_number),
            model: ctx.model.clone(),
            timed_out,
            cancelled,
        })
    }

    async fn run_planner(
        &self,
        ctx: &PlannerContext,
    ) -> Result<PlanGenerationResult, RuntimeAdapterError> {
        let script = {
            let mut inner = self.inner.lock();
            inner.calls.push(FakeCall::Planner { rework: ctx.rework.is_some() });
            inner.plans.pop_front()
        };
        match script {
            Some(script) => Ok(PlanGenerationResult {
                plan: script.plan,
                tokens_used: script.tokens_used,
                cost_usd: script.cost_usd,
                duration_ms: 1,
            }),
            None => Err(RuntimeAdapterError::NoPlan("no scripted plan".to_string())),
        }
    }
}
