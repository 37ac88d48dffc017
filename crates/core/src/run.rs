// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task run aggregate and its step executions.

use crate::clock::Clock;
use crate::plan::{ExecutionPlan, PlanStep, ValidatedPlan};
use crate::result::AgentResult;
use crate::ticket::TicketDetails;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a task run.
    pub struct RunId;
}

impl RunId {
    /// Run ids embed wall-clock millis so workspace paths sort by creation
    /// time: `run-<epoch-millis>-<random>`.
    pub fn generate(clock: &impl Clock) -> Self {
        Self::from_string(format!("run-{}-{}", clock.epoch_ms(), nanoid::nanoid!(6)))
    }
}

/// Run lifecycle status.
///
/// `WaitingHumanReview` and `Rework` are transient substates of `Executing`
/// that suspend the sequential driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Planning,
    Executing,
    WaitingHumanReview,
    Rework,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }
}

crate::simple_display! {
    RunStatus {
        Pending => "pending",
        Planning => "planning",
        Executing => "executing",
        WaitingHumanReview => "waiting_human_review",
        Rework => "rework",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// Status of one step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    NeedsRework,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped)
    }
}

crate::simple_display! {
    StepStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        NeedsRework => "needs_rework",
        Skipped => "skipped",
    }
}

/// Execution record for one plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_number: u32,
    pub agent: String,
    pub status: StepStatus,
    /// Opaque runtime identity of the last child that ran this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AgentResult>,
    /// Current attempt, starting at 1. Incremented when the step is
    /// re-executed after rework.
    #[serde(default = "default_attempt")]
    pub attempt: u32,
    #[serde(default)]
    pub rework_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_attempt() -> u32 {
    1
}

impl StepExecution {
    pub fn new(step: &PlanStep) -> Self {
        Self {
            step_number: step.step_number,
            agent: step.agent.clone(),
            status: StepStatus::Pending,
            container_id: None,
            tokens_used: 0,
            cost_usd: 0.0,
            started_at_ms: None,
            completed_at_ms: None,
            result: None,
            attempt: 1,
            rework_count: 0,
            error: None,
        }
    }

    /// Mark the step running. `status = Running` iff `started_at` is set and
    /// `completed_at` is unset, so a re-execution clears the completion mark.
    pub fn start(&mut self, epoch_ms: u64) {
        self.status = StepStatus::Running;
        self.started_at_ms = Some(epoch_ms);
        self.completed_at_ms = None;
        self.error = None;
    }

    /// Finish the step with a terminal-or-rework status.
    pub fn finish(&mut self, status: StepStatus, epoch_ms: u64) {
        self.status = status;
        self.completed_at_ms = Some(epoch_ms);
    }

    /// Reset for a post-rework re-execution.
    pub fn reset_for_retry(&mut self) {
        self.status = StepStatus::Pending;
        self.attempt += 1;
        self.rework_count += 1;
        self.result = None;
        self.error = None;
    }
}

/// Aggregate for one end-to-end execution of a ticket.
///
/// Created by the orchestration service at run start and mutated only by it;
/// never destroyed — the workspace is garbage-collected separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub run_id: RunId,
    pub project_id: String,
    pub ticket: TicketDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_plan: Option<ValidatedPlan>,
    pub status: RunStatus,
    /// Ordered by `step_number`; rework steps (≥ 900) append at the tail.
    #[serde(default)]
    pub steps: Vec<StepExecution>,
    #[serde(default)]
    pub total_tokens_used: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    /// Run-level rework cycles consumed, bounded by `max_rework_cycles`.
    #[serde(default)]
    pub rework_cycles: u32,
}

impl TaskRun {
    pub fn new(
        run_id: RunId,
        project_id: impl Into<String>,
        ticket: TicketDetails,
        epoch_ms: u64,
    ) -> Self {
        Self {
            run_id,
            project_id: project_id.into(),
            ticket,
            plan: None,
            validated_plan: None,
            status: RunStatus::Pending,
            steps: Vec::new(),
            total_tokens_used: 0,
            total_cost_usd: 0.0,
            created_at_ms: epoch_ms,
            started_at_ms: None,
            completed_at_ms: None,
            error: None,
            pr_url: None,
            rework_cycles: 0,
        }
    }

    pub fn step(&self, number: u32) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.step_number == number)
    }

    pub fn step_mut(&mut self, number: u32) -> Option<&mut StepExecution> {
        self.steps.iter_mut().find(|s| s.step_number == number)
    }

    /// Recompute run totals from step attributions.
    ///
    /// Called after every step transition so `total_tokens_used` equals the
    /// sum over steps at every observable point.
    pub fn recompute_totals(&mut self) {
        self.total_tokens_used = self.steps.iter().map(|s| s.tokens_used).sum();
        self.total_cost_usd = self.steps.iter().map(|s| s.cost_usd).sum();
    }

    /// Transition run status. Sets `completed_at` exactly when the new
    /// status is terminal.
    pub fn set_status(&mut self, status: RunStatus, epoch_ms: u64) {
        self.status = status;
        if status == RunStatus::Executing && self.started_at_ms.is_none() {
            self.started_at_ms = Some(epoch_ms);
        }
        if status.is_terminal() {
            self.completed_at_ms = Some(epoch_ms);
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Next free rework step number (≥ 900, insertion order).
    pub fn next_rework_number(&self) -> u32 {
        self.steps
            .iter()
            .map(|s| s.step_number)
            .filter(|n| *n >= crate::plan::REWORK_STEP_BASE)
            .max()
            .map(|n| n + 1)
            .unwrap_or(crate::plan::REWORK_STEP_BASE)
    }
}

crate::builder! {
    pub struct TaskRunBuilder => TaskRun {
        into {
            project_id: String = "proj",
        }
        set {
            run_id: RunId = RunId::from_string("run-1000000-test01"),
            ticket: TicketDetails = TicketDetails::default(),
            status: RunStatus = RunStatus::Pending,
            steps: Vec<StepExecution> = Vec::new(),
            total_tokens_used: u64 = 0,
            total_cost_usd: f64 = 0.0,
            created_at_ms: u64 = 1_000_000,
            rework_cycles: u32 = 0,
        }
        option {
            plan: ExecutionPlan = None,
            validated_plan: ValidatedPlan = None,
            started_at_ms: u64 = None,
            completed_at_ms: u64 = None,
            error: String = None,
            pr_url: String = None,
        }
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
