// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution plans: planner output and its validated form.

use crate::id::PlanId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// First step number reserved for dynamically injected rework steps.
///
/// Plan-time steps are numbered 1..N; anything at or above this base was
/// appended during execution in response to a `needs_rework` result.
pub const REWORK_STEP_BASE: u32 = 900;

/// Estimated effort for a step, as reported by the planner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

crate::simple_display! {
    Complexity {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
}

/// One input staged into `.agent-context/` before a step runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextInput {
    /// The normalized ticket.
    Ticket,
    /// A single file from the workspace.
    File { path: PathBuf },
    /// A directory subtree from the workspace.
    Directory { path: PathBuf },
    /// The structured result of an earlier step.
    StepOutput { step: u32 },
    /// A named file under `artifacts/`.
    Artifact { name: String },
}

/// One agent invocation defined by the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_number: u32,
    /// Agent id; resolved against the platform catalog during validation.
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Natural-language task description handed to the agent.
    pub task: String,
    #[serde(default)]
    pub context_inputs: Vec<ContextInput>,
    #[serde(default)]
    pub depends_on: Vec<u32>,
    #[serde(default)]
    pub complexity: Complexity,
}

impl PlanStep {
    /// True for steps injected during execution rather than by the planner.
    pub fn is_rework(&self) -> bool {
        self.step_number >= REWORK_STEP_BASE
    }
}

/// A pause point requiring an external decision file before execution resumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanGate {
    pub after_step: u32,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub artifacts_to_review: Vec<String>,
    /// Optional gates may auto-approve after a configured wait.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// Raw planner output, before rules and integrity checks are applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    #[serde(default)]
    pub plan_id: PlanId,
    pub ticket_id: String,
    #[serde(default)]
    pub classification: String,
    #[serde(default)]
    pub reasoning: String,
    pub steps: Vec<PlanStep>,
    /// Lists of step numbers that may run concurrently.
    #[serde(default)]
    pub parallel_groups: Vec<Vec<u32>>,
    #[serde(default)]
    pub human_gates: Vec<HumanGate>,
    /// Planner self-reported confidence in 0..=1, consulted by optional gates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Plan after rule application, step injection, remapping, and integrity
/// checks. Step numbers are unique and contiguous from 1; dependency edges
/// form a DAG; every gate and group member resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedPlan {
    pub plan_id: PlanId,
    pub ticket_id: String,
    #[serde(default)]
    pub classification: String,
    #[serde(default)]
    pub reasoning: String,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub parallel_groups: Vec<Vec<u32>>,
    #[serde(default)]
    pub human_gates: Vec<HumanGate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Agent id → model, from `set_model` rules. Resolved at execution time
    /// so dynamically injected rework steps pick overrides up too.
    #[serde(default)]
    pub model_overrides: BTreeMap<String, String>,
    /// Cost cap override from a `set_budget` rule, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_override_usd: Option<f64>,
    /// Token cap override from a `set_budget` rule, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens_override: Option<u64>,
}

impl ValidatedPlan {
    pub fn step(&self, number: u32) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.step_number == number)
    }

    pub fn max_step_number(&self) -> u32 {
        self.steps.iter().map(|s| s.step_number).max().unwrap_or(0)
    }

    /// Transitive `depends_on` closure of a step.
    pub fn depends_closure(&self, number: u32) -> BTreeSet<u32> {
        let mut closure = BTreeSet::new();
        let mut stack: Vec<u32> =
            self.step(number).map(|s| s.depends_on.clone()).unwrap_or_default();
        while let Some(dep) = stack.pop() {
            if closure.insert(dep) {
                if let Some(step) = self.step(dep) {
                    stack.extend(step.depends_on.iter().copied());
                }
            }
        }
        closure
    }

    /// The parallel group containing a step, if any.
    pub fn group_of(&self, number: u32) -> Option<&[u32]> {
        self.parallel_groups
            .iter()
            .find(|g| g.contains(&number))
            .map(|g| g.as_slice())
    }

    /// Gates that fire once the given step completes.
    pub fn gates_after(&self, number: u32) -> impl Iterator<Item = &HumanGate> {
        self.human_gates.iter().filter(move |g| g.after_step == number)
    }
}

#[cfg(test)]
#[path = "plan_tests.rs"]
mod tests;
