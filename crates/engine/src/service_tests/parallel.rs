// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::test_helpers::{execute, plan, step, step_events, test_config};
use fab_adapters::fake::{FakeRuntime, StepScript};
use fab_core::{EventType, ExecutionPlan, RunStatus, StepStatus};
use std::sync::Arc;
use std::time::Duration;

/// S6 shape: 1, then parallel [2, 3], then 4 depending on both.
fn diamond_plan() -> ExecutionPlan {
    let mut plan = plan(vec![
        step(1, "product", &[]),
        step(2, "developer", &[1]),
        step(3, "qa", &[1]),
        step(4, "code-review", &[2, 3]),
    ]);
    plan.parallel_groups = vec![vec![2, 3]];
    plan
}

#[tokio::test]
async fn s6_group_members_run_between_their_dependencies() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(diamond_plan());
    fake.script_step(2, StepScript::complete("two").delay(Duration::from_millis(60)));
    fake.script_step(3, StepScript::complete("three").delay(Duration::from_millis(20)));

    let outcome = execute(&fake, test_config(base.path())).await;
    assert_eq!(outcome.run.status, RunStatus::Completed);

    let events = step_events(&outcome);
    let pos = |event: EventType, n: u32| {
        events
            .iter()
            .position(|(t, m)| *t == event && *m == n)
            .unwrap_or_else(|| panic!("missing {event:?} for step {n}"))
    };

    // Members started together, after step 1 completed.
    assert!(pos(EventType::StepCompleted, 1) < pos(EventType::StepStarted, 2));
    assert!(pos(EventType::StepCompleted, 1) < pos(EventType::StepStarted, 3));
    assert!(pos(EventType::StepStarted, 3) < pos(EventType::StepCompleted, 2));
    assert!(pos(EventType::StepStarted, 2) < pos(EventType::StepCompleted, 3));

    // Step 4 only after both members reached a terminal state.
    assert!(pos(EventType::StepCompleted, 2) < pos(EventType::StepStarted, 4));
    assert!(pos(EventType::StepCompleted, 3) < pos(EventType::StepStarted, 4));
}

#[tokio::test]
async fn member_failure_lets_siblings_finish_then_fails_the_run() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(diamond_plan());
    // Step 2 fails fast; step 3 is still in flight and must complete.
    fake.script_step(2, StepScript::failed("exploded"));
    fake.script_step(3, StepScript::complete("three").delay(Duration::from_millis(80)));

    let outcome = execute(&fake, test_config(base.path())).await;

    assert_eq!(outcome.run.status, RunStatus::Failed);
    assert_eq!(outcome.run.step(2).unwrap().status, StepStatus::Failed);
    // The sibling was not cancelled mid-flight.
    assert_eq!(outcome.run.step(3).unwrap().status, StepStatus::Completed);
    assert_eq!(outcome.run.step(4).unwrap().status, StepStatus::Pending);

    let events = step_events(&outcome);
    let failed2 = events
        .iter()
        .position(|(t, n)| *t == EventType::StepFailed && *n == 2)
        .unwrap();
    let completed3 = events
        .iter()
        .position(|(t, n)| *t == EventType::StepCompleted && *n == 3)
        .unwrap();
    assert!(failed2 < completed3, "failure settles first, sibling still finishes");
}

#[tokio::test]
async fn group_member_rework_runs_after_the_group() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(diamond_plan());
    fake.push_plan(plan(vec![step(1, "developer", &[])]));
    fake.script_step(3, StepScript::needs_rework("flaky tests", Some("developer")));
    fake.script_step(3, StepScript::complete("retest green"));

    let outcome = execute(&fake, test_config(base.path())).await;

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.run.rework_cycles, 1);
    assert_eq!(outcome.run.step(900).unwrap().status, StepStatus::Completed);
    assert_eq!(outcome.run.step(3).unwrap().attempt, 2);
    assert_eq!(outcome.run.step(4).unwrap().status, StepStatus::Completed);

    let started: Vec<u32> = step_events(&outcome)
        .into_iter()
        .filter(|(t, _)| *t == EventType::StepStarted)
        .map(|(_, n)| n)
        .collect();
    assert_eq!(started, vec![1, 2, 3, 900, 3, 4]);
}

#[tokio::test]
async fn budget_breach_in_group_waits_for_all_members() {
    let base = tempfile::tempdir().unwrap();
    let mut config = test_config(base.path());
    config.project.budget.per_task_max_cost_usd = Some(0.5);

    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(diamond_plan());
    fake.script_step(2, StepScript::complete("two").cost(0.6));
    fake.script_step(3, StepScript::complete("three").cost(0.1).delay(Duration::from_millis(60)));

    let outcome = execute(&fake, config).await;

    assert_eq!(outcome.run.status, RunStatus::Failed);
    // Both members finished before the breach halted the run.
    assert_eq!(outcome.run.step(2).unwrap().status, StepStatus::Completed);
    assert_eq!(outcome.run.step(3).unwrap().status, StepStatus::Completed);
    assert_eq!(outcome.run.step(4).unwrap().status, StepStatus::Pending);
    assert_eq!(outcome.store.by_type(EventType::AgentTokenLimitExceeded).len(), 1);
}
