// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Round-trip: a run projected back from its event log matches the
//! terminal in-memory run state.

use crate::test_helpers::{execute, plan, sequential_plan, step, test_config};
use fab_adapters::fake::{FakeRuntime, StepScript};
use fab_core::RunStatus;
use fab_storage::{project_run, EventStore};
use std::sync::Arc;

#[tokio::test]
async fn completed_run_round_trips_through_the_event_log() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    fake.script_step(1, StepScript::complete("one").tokens(10).cost(0.1));
    fake.script_step(2, StepScript::complete("two").tokens(20).cost(0.2));
    fake.script_step(3, StepScript::complete("three").tokens(30).cost(0.3));

    let outcome = execute(&fake, test_config(base.path())).await;
    assert_eq!(outcome.run.status, RunStatus::Completed);

    let events = EventStore::load_from_file(&outcome.workspace.join(".events.jsonl")).unwrap();
    let projected = project_run(&events).unwrap();
    assert_eq!(projected, outcome.run);
}

#[tokio::test]
async fn rework_run_round_trips_including_dynamic_steps() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    fake.push_plan(plan(vec![step(1, "developer", &[])]));
    fake.script_step(3, StepScript::needs_rework("tests failing", Some("developer")));
    fake.script_step(3, StepScript::complete("green").tokens(40));

    let outcome = execute(&fake, test_config(base.path())).await;
    assert_eq!(outcome.run.status, RunStatus::Completed);

    let projected = project_run(&outcome.store.all()).unwrap();
    assert_eq!(projected, outcome.run);
}

#[tokio::test]
async fn failed_run_round_trips() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    fake.script_step(2, StepScript::failed("boom"));

    let outcome = execute(&fake, test_config(base.path())).await;
    assert_eq!(outcome.run.status, RunStatus::Failed);

    let projected = project_run(&outcome.store.all()).unwrap();
    assert_eq!(projected.status, RunStatus::Failed);
    assert_eq!(projected.error, outcome.run.error);
    assert_eq!(projected.total_tokens_used, outcome.run.total_tokens_used);
}
