// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::test_helpers::{
    execute, lifecycle_events, sequential_plan, step_events, test_config,
};
use fab_adapters::fake::{FakeCall, FakeRuntime, StepScript};
use fab_core::{EventType, RunStatus, StepStatus};
use std::sync::Arc;

#[tokio::test]
async fn s1_happy_path_sequential() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    for n in 1..=3 {
        fake.script_step(n, StepScript::complete(format!("step {n} done")).tokens(100));
    }

    let outcome = execute(&fake, test_config(base.path())).await;

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.run.total_tokens_used, 300);
    assert_eq!(
        lifecycle_events(&outcome),
        vec![
            EventType::TaskCreated,
            EventType::TaskPlanGenerated,
            EventType::TaskPlanValidated,
            EventType::TaskStarted,
            EventType::StepStarted,
            EventType::StepCompleted,
            EventType::StepStarted,
            EventType::StepCompleted,
            EventType::StepStarted,
            EventType::StepCompleted,
            EventType::TaskCompleted,
        ]
    );
    // Steps ran in dependency order.
    let started: Vec<u32> = step_events(&outcome)
        .into_iter()
        .filter(|(t, _)| *t == EventType::StepStarted)
        .map(|(_, n)| n)
        .collect();
    assert_eq!(started, vec![1, 2, 3]);
    assert_eq!(
        fake.calls()[0],
        FakeCall::Planner { rework: false },
    );
}

#[tokio::test]
async fn totals_in_events_match_sum_of_steps() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    fake.script_step(1, StepScript::complete("one").tokens(10).cost(0.1));
    fake.script_step(2, StepScript::complete("two").tokens(20).cost(0.2));
    fake.script_step(3, StepScript::complete("three").tokens(30).cost(0.3));

    let outcome = execute(&fake, test_config(base.path())).await;

    let mut running_total = 0u64;
    for event in outcome.store.by_type(EventType::StepCompleted) {
        let data: fab_core::event::data::StepCompleted =
            serde_json::from_value(event.data).unwrap();
        running_total += data.tokens_used;
        assert_eq!(data.total_tokens_used, running_total);
    }
    assert_eq!(outcome.run.total_tokens_used, 60);
    assert!((outcome.run.total_cost_usd - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn completed_run_sets_timestamps_and_step_states() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());

    let outcome = execute(&fake, test_config(base.path())).await;

    assert!(outcome.run.started_at_ms.is_some());
    assert!(outcome.run.completed_at_ms.is_some());
    assert!(outcome.run.steps.iter().all(|s| s.status == StepStatus::Completed));
    assert!(outcome.run.steps.iter().all(|s| s.container_id.is_some()));
    // Per-run log exists in the workspace.
    assert!(outcome.workspace.join(".events.jsonl").is_file());
}

#[tokio::test]
async fn pr_url_in_result_metadata_emits_pr_and_ticket_events() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    let mut result =
        fab_core::AgentResult::with_status(fab_core::AgentResultStatus::Complete, "shipped");
    result.metadata.insert(
        "pr_url".to_string(),
        serde_json::Value::String("https://example.com/pr/7".to_string()),
    );
    fake.script_step(3, StepScript::from_result(result));

    let outcome = execute(&fake, test_config(base.path())).await;

    assert_eq!(outcome.run.pr_url.as_deref(), Some("https://example.com/pr/7"));
    let tail: Vec<EventType> =
        lifecycle_events(&outcome).into_iter().rev().take(3).collect();
    assert_eq!(
        tail,
        vec![EventType::TaskCompleted, EventType::TicketUpdated, EventType::PrCreated]
    );
}

#[tokio::test]
async fn concurrent_runs_stay_disjoint() {
    let base = tempfile::tempdir().unwrap();
    let fake_a = Arc::new(FakeRuntime::new());
    fake_a.push_plan(sequential_plan());
    let fake_b = Arc::new(FakeRuntime::new());
    fake_b.push_plan(sequential_plan());

    let config_a = test_config(base.path());
    let config_b = test_config(base.path());
    let (a, b) = tokio::join!(execute(&fake_a, config_a), execute(&fake_b, config_b));

    assert_eq!(a.run.status, RunStatus::Completed);
    assert_eq!(b.run.status, RunStatus::Completed);
    assert_ne!(a.run.run_id, b.run.run_id);
    assert_ne!(a.workspace, b.workspace);
    // Each store only saw its own run.
    assert!(a.store.all().iter().all(|e| e.run_id == a.run.run_id));
    assert!(b.store.all().iter().all(|e| e.run_id == b.run.run_id));
}
