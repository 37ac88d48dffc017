// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::service::Orchestrator;
use crate::test_helpers::{execute, plan, sequential_plan, step, test_config, ticket};
use fab_adapters::fake::{FakeRuntime, StepScript};
use fab_adapters::runtime::RuntimeAdapter;
use fab_core::{EventType, FakeClock, RunStatus, StepStatus};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn planner_failure_fails_the_run_with_runtime_tag() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    // No plan scripted at all.

    let outcome = execute(&fake, test_config(base.path())).await;

    assert_eq!(outcome.run.status, RunStatus::Failed);
    assert_eq!(outcome.exit_code, 1);
    let failed = outcome.store.by_type(EventType::TaskFailed);
    assert_eq!(failed[0].data["error"], "runtime");
    assert!(outcome.store.by_type(EventType::StepStarted).is_empty());
}

#[tokio::test]
async fn plan_integrity_error_exits_two() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    // Forward dependency: step 1 depends on step 2.
    fake.push_plan(plan(vec![step(1, "product", &[2]), step(2, "developer", &[])]));

    let outcome = execute(&fake, test_config(base.path())).await;

    assert_eq!(outcome.run.status, RunStatus::Failed);
    assert_eq!(outcome.exit_code, 2);
    let failed = outcome.store.by_type(EventType::TaskFailed);
    assert_eq!(failed[0].data["error"], "plan_integrity");
}

#[tokio::test]
async fn configuration_error_exits_two() {
    let base = tempfile::tempdir().unwrap();
    let mut config = test_config(base.path());
    config.project.agent_catalog = Some(vec!["developer".to_string()]);
    config.project.rules = vec![fab_core::PlanRule {
        condition: fab_core::RuleCondition::Always,
        action: fab_core::RuleAction::RequireRole { role: fab_core::AgentRole::Security },
    }];
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(plan(vec![step(1, "developer", &[])]));

    let outcome = execute(&fake, config).await;

    assert_eq!(outcome.exit_code, 2);
    let failed = outcome.store.by_type(EventType::TaskFailed);
    assert_eq!(failed[0].data["error"], "configuration");
}

#[tokio::test]
async fn step_timeout_fails_step_and_run() {
    let base = tempfile::tempdir().unwrap();
    let mut config = test_config(base.path());
    config.project.limits.step_timeout_ms = 100;

    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    fake.script_step(1, StepScript::complete("slow").delay(Duration::from_secs(5)));

    let outcome = execute(&fake, config).await;

    assert_eq!(outcome.run.status, RunStatus::Failed);
    let step1 = outcome.run.step(1).unwrap();
    assert_eq!(step1.status, StepStatus::Failed);
    assert_eq!(step1.error.as_deref(), Some("timeout:100"));
    let failed = outcome.store.by_type(EventType::TaskFailed);
    assert_eq!(failed[0].data["error"], "timeout");
}

#[tokio::test]
async fn blocked_result_fails_the_step() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    fake.script_step(2, StepScript::blocked("missing credentials"));

    let outcome = execute(&fake, test_config(base.path())).await;

    assert_eq!(outcome.run.status, RunStatus::Failed);
    let step2 = outcome.run.step(2).unwrap();
    assert_eq!(step2.status, StepStatus::Failed);
    assert!(step2.error.as_deref().unwrap_or_default().starts_with("blocked"));
    // Step 3 never ran.
    assert_eq!(outcome.run.step(3).unwrap().status, StepStatus::Pending);
}

#[tokio::test]
async fn missing_result_file_fails_the_step() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    fake.script_step(1, StepScript::no_result());

    let outcome = execute(&fake, test_config(base.path())).await;

    assert_eq!(outcome.run.status, RunStatus::Failed);
    assert_eq!(outcome.run.step(1).unwrap().error.as_deref(), Some("no result"));
}

#[tokio::test]
async fn external_cancellation_skips_pending_steps() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    fake.script_step(2, StepScript::complete("slow").delay(Duration::from_secs(30)));

    let runtime: Arc<dyn RuntimeAdapter> = Arc::clone(&fake) as Arc<dyn RuntimeAdapter>;
    let orchestrator = Orchestrator::new(test_config(base.path()), runtime, FakeClock::new());
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
    });

    let outcome = orchestrator.execute(ticket()).await.unwrap();

    assert_eq!(outcome.run.status, RunStatus::Cancelled);
    assert_eq!(outcome.exit_code, 1);
    assert_eq!(outcome.run.step(1).unwrap().status, StepStatus::Completed);
    assert_eq!(outcome.run.step(2).unwrap().status, StepStatus::Failed);
    assert_eq!(outcome.run.step(2).unwrap().error.as_deref(), Some("cancelled"));
    assert_eq!(outcome.run.step(3).unwrap().status, StepStatus::Skipped);
    let failed = outcome.store.by_type(EventType::TaskFailed);
    assert_eq!(failed[0].data["error"], "cancelled");
}

#[tokio::test]
async fn run_timeout_fails_with_timeout_tag() {
    let base = tempfile::tempdir().unwrap();
    let mut config = test_config(base.path());
    config.project.limits.run_timeout_ms = Some(150);

    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    fake.script_step(2, StepScript::complete("slow").delay(Duration::from_secs(30)));

    let outcome = execute(&fake, config).await;

    assert_eq!(outcome.run.status, RunStatus::Failed);
    let failed = outcome.store.by_type(EventType::TaskFailed);
    assert_eq!(failed[0].data["error"], "run_timeout");
    assert_eq!(outcome.run.step(3).unwrap().status, StepStatus::Skipped);
}
