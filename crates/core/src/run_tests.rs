// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::plan::{Complexity, PlanStep, REWORK_STEP_BASE};
use crate::run::{RunStatus, StepExecution, StepStatus, TaskRun};

fn step(number: u32, agent: &str, depends_on: &[u32]) -> PlanStep {
    PlanStep {
        step_number: number,
        agent: agent.to_string(),
        model: None,
        task: format!("{agent} work"),
        context_inputs: Vec::new(),
        depends_on: depends_on.to_vec(),
        complexity: Complexity::Medium,
    }
}

#[test]
fn totals_are_sum_of_step_attributions() {
    let mut run = TaskRun::builder().build();
    let mut a = StepExecution::new(&step(1, "product", &[]));
    a.tokens_used = 100;
    a.cost_usd = 0.25;
    let mut b = StepExecution::new(&step(2, "developer", &[1]));
    b.tokens_used = 250;
    b.cost_usd = 0.75;
    run.steps = vec![a, b];
    run.recompute_totals();
    assert_eq!(run.total_tokens_used, 350);
    assert!((run.total_cost_usd - 1.0).abs() < f64::EPSILON);
}

#[test]
fn completed_at_set_only_on_terminal_status() {
    let mut run = TaskRun::builder().build();
    run.set_status(RunStatus::Planning, 1_000);
    assert_eq!(run.completed_at_ms, None);
    run.set_status(RunStatus::Executing, 2_000);
    assert_eq!(run.started_at_ms, Some(2_000));
    assert_eq!(run.completed_at_ms, None);
    run.set_status(RunStatus::Completed, 3_000);
    assert_eq!(run.completed_at_ms, Some(3_000));
    assert!(run.is_terminal());
}

#[test]
fn step_running_invariant() {
    let mut exec = StepExecution::new(&step(1, "developer", &[]));
    exec.start(1_000);
    assert_eq!(exec.status, StepStatus::Running);
    assert_eq!(exec.started_at_ms, Some(1_000));
    assert_eq!(exec.completed_at_ms, None);

    exec.finish(StepStatus::Completed, 2_000);
    assert_eq!(exec.completed_at_ms, Some(2_000));
    assert!(exec.status.is_terminal());
}

#[test]
fn retry_resets_result_and_bumps_attempt() {
    let mut exec = StepExecution::new(&step(3, "qa", &[]));
    exec.start(1_000);
    exec.finish(StepStatus::NeedsRework, 2_000);
    exec.reset_for_retry();
    assert_eq!(exec.status, StepStatus::Pending);
    assert_eq!(exec.attempt, 2);
    assert_eq!(exec.rework_count, 1);
    assert_eq!(exec.result, None);
}

#[test]
fn rework_numbers_allocate_from_base() {
    let mut run = TaskRun::builder().build();
    run.steps = vec![
        StepExecution::new(&step(1, "product", &[])),
        StepExecution::new(&step(2, "developer", &[1])),
    ];
    assert_eq!(run.next_rework_number(), REWORK_STEP_BASE);
    run.steps.push(StepExecution::new(&step(900, "developer", &[2])));
    assert_eq!(run.next_rework_number(), 901);
}

#[test]
fn run_serde_round_trip() {
    let mut run = TaskRun::builder().error("boom").build();
    run.steps = vec![StepExecution::new(&step(1, "product", &[]))];
    let json = serde_json::to_string(&run).unwrap();
    let back: TaskRun = serde_json::from_str(&json).unwrap();
    assert_eq!(back, run);
}
