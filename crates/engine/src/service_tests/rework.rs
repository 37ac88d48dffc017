// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::test_helpers::{
    execute, lifecycle_events, plan, sequential_plan, step, step_events, test_config,
};
use fab_adapters::fake::{FakeCall, FakeRuntime, StepScript};
use fab_core::{EventType, RunStatus, StepStatus};
use std::sync::Arc;

fn rework_plan() -> fab_core::ExecutionPlan {
    plan(vec![step(1, "developer", &[])])
}

#[tokio::test]
async fn s2_rework_once_then_succeed() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    fake.push_plan(rework_plan());
    fake.script_step(3, StepScript::needs_rework("tests failing", Some("developer")));
    fake.script_step(3, StepScript::complete("qa green"));

    let outcome = execute(&fake, test_config(base.path())).await;

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.run.rework_cycles, 1);

    let rework_events = outcome.store.by_type(EventType::StepReworkTriggered);
    assert_eq!(rework_events.len(), 1);
    let data: fab_core::event::data::ReworkTriggered =
        serde_json::from_value(rework_events[0].data.clone()).unwrap();
    assert_eq!(data.step_number, 3);
    assert_eq!(data.rework_steps, vec![900]);
    assert_eq!(data.target.as_deref(), Some("developer"));

    // Rework step 900 ran after the trigger, then step 3 re-ran.
    let started: Vec<u32> = step_events(&outcome)
        .into_iter()
        .filter(|(t, _)| *t == EventType::StepStarted)
        .map(|(_, n)| n)
        .collect();
    assert_eq!(started, vec![1, 2, 3, 900, 3]);

    // The rework step targeted the developer agent and depends on step 3.
    let rework_step = outcome.run.step(900).unwrap();
    assert_eq!(rework_step.agent, "developer");
    assert_eq!(rework_step.status, StepStatus::Completed);

    // Second planner call was a rework request.
    assert_eq!(
        fake.calls()
            .iter()
            .filter(|c| matches!(c, FakeCall::Planner { rework: true }))
            .count(),
        1
    );

    // Step 3 ran twice.
    let step3 = outcome.run.step(3).unwrap();
    assert_eq!(step3.attempt, 2);
    assert_eq!(step3.rework_count, 1);
    assert_eq!(step3.status, StepStatus::Completed);
}

#[tokio::test]
async fn s3_rework_exhausted_fails_the_run() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    for _ in 0..3 {
        fake.push_plan(rework_plan());
    }
    for _ in 0..4 {
        fake.script_step(3, StepScript::needs_rework("still failing", Some("developer")));
    }

    let outcome = execute(&fake, test_config(base.path())).await;

    assert_eq!(outcome.run.status, RunStatus::Failed);
    assert_eq!(outcome.exit_code, 1);
    assert_eq!(outcome.run.rework_cycles, 3);
    assert_eq!(outcome.store.by_type(EventType::StepReworkTriggered).len(), 3);

    let failed = outcome.store.by_type(EventType::TaskFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].data["error"], "rework_exhausted");

    // Rework steps were numbered from the reserved range in insertion order.
    let rework_numbers: Vec<u32> = outcome
        .run
        .steps
        .iter()
        .map(|s| s.step_number)
        .filter(|n| *n >= 900)
        .collect();
    assert_eq!(rework_numbers, vec![900, 901, 902]);
}

#[tokio::test]
async fn nested_rework_consumes_cycles_too() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(plan(vec![step(1, "qa", &[])]));
    fake.push_plan(rework_plan());
    fake.push_plan(rework_plan());
    // Step 1 needs rework; the rework step itself needs rework once.
    fake.script_step(1, StepScript::needs_rework("broken", None));
    fake.script_step(900, StepScript::needs_rework("fix is wrong", None));
    fake.script_step(900, StepScript::complete("fix of fix ok"));
    fake.script_step(1, StepScript::complete("finally green"));

    let outcome = execute(&fake, test_config(base.path())).await;

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.run.rework_cycles, 2);
    // 901 was injected for the nested cycle and ran before 900 re-ran.
    let started: Vec<u32> = step_events(&outcome)
        .into_iter()
        .filter(|(t, _)| *t == EventType::StepStarted)
        .map(|(_, n)| n)
        .collect();
    assert_eq!(started, vec![1, 900, 901, 900, 1]);
}

#[tokio::test]
async fn rework_planner_failure_fails_the_run() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    // No rework plan scripted: the rework planning call errors.
    fake.script_step(3, StepScript::needs_rework("nope", None));

    let outcome = execute(&fake, test_config(base.path())).await;

    assert_eq!(outcome.run.status, RunStatus::Failed);
    let failed = outcome.store.by_type(EventType::TaskFailed);
    assert_eq!(failed[0].data["error"], "runtime");

    let events = lifecycle_events(&outcome);
    assert_eq!(events.last(), Some(&EventType::TaskFailed));
}
