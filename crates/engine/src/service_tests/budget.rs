// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::test_helpers::{execute, lifecycle_events, plan, sequential_plan, step, test_config};
use fab_adapters::fake::{FakeRuntime, StepScript};
use fab_core::{EventType, RunStatus, StepStatus};
use std::sync::Arc;

#[tokio::test]
async fn s5_cost_breach_halts_before_next_step() {
    let base = tempfile::tempdir().unwrap();
    let mut config = test_config(base.path());
    config.project.budget.per_task_max_cost_usd = Some(1.0);

    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    fake.script_step(1, StepScript::complete("one").cost(0.4));
    fake.script_step(2, StepScript::complete("two").cost(0.7));
    fake.script_step(3, StepScript::complete("never runs"));

    let outcome = execute(&fake, config).await;

    assert_eq!(outcome.run.status, RunStatus::Failed);
    assert_eq!(outcome.exit_code, 1);
    // Step 3 was never started.
    assert_eq!(outcome.run.step(3).unwrap().status, StepStatus::Pending);

    let events = lifecycle_events(&outcome);
    let tail: Vec<_> = events.iter().rev().take(3).rev().collect();
    assert_eq!(
        tail,
        vec![
            &EventType::StepCompleted,
            &EventType::AgentTokenLimitExceeded,
            &EventType::TaskFailed,
        ]
    );
    let failed = outcome.store.by_type(EventType::TaskFailed);
    assert_eq!(failed[0].data["error"], "budget_exceeded");
}

#[tokio::test]
async fn token_cap_breach_fails_the_run() {
    let base = tempfile::tempdir().unwrap();
    let mut config = test_config(base.path());
    config.project.budget.max_total_tokens = Some(100);

    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    fake.script_step(1, StepScript::complete("one").tokens(60));
    fake.script_step(2, StepScript::complete("two").tokens(60));

    let outcome = execute(&fake, config).await;

    assert_eq!(outcome.run.status, RunStatus::Failed);
    assert_eq!(outcome.run.total_tokens_used, 120);
    assert_eq!(outcome.store.by_type(EventType::AgentTokenLimitExceeded).len(), 1);
    assert_eq!(outcome.run.step(3).unwrap().status, StepStatus::Pending);
}

#[tokio::test]
async fn per_agent_token_cap_is_enforced() {
    let base = tempfile::tempdir().unwrap();
    let mut config = test_config(base.path());
    config.project.budget.max_tokens_per_agent = Some(100);

    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(plan(vec![
        step(1, "developer", &[]),
        step(2, "developer", &[1]),
        step(3, "qa", &[2]),
    ]));
    fake.script_step(1, StepScript::complete("one").tokens(80));
    fake.script_step(2, StepScript::complete("two").tokens(30));

    let outcome = execute(&fake, config).await;

    assert_eq!(outcome.run.status, RunStatus::Failed);
    let failed = outcome.store.by_type(EventType::TaskFailed);
    assert!(failed[0].data["message"].as_str().unwrap().contains("developer"));
}

#[tokio::test]
async fn warning_fires_once_at_threshold_without_failing() {
    let base = tempfile::tempdir().unwrap();
    let mut config = test_config(base.path());
    config.project.budget.per_task_max_cost_usd = Some(10.0);
    config.project.budget.warn_threshold_pct = 80;

    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    fake.script_step(1, StepScript::complete("one").cost(4.0));
    fake.script_step(2, StepScript::complete("two").cost(4.5));
    fake.script_step(3, StepScript::complete("three").cost(0.5));

    let outcome = execute(&fake, config).await;

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.store.by_type(EventType::AgentTokenLimitWarning).len(), 1);
    assert_eq!(outcome.store.by_type(EventType::AgentTokenLimitExceeded).len(), 0);
}

#[tokio::test]
async fn set_budget_rule_tightens_the_cap() {
    let base = tempfile::tempdir().unwrap();
    let mut config = test_config(base.path());
    config.project.budget.per_task_max_cost_usd = Some(100.0);
    config.project.rules = vec![fab_core::PlanRule {
        condition: fab_core::RuleCondition::Always,
        action: fab_core::RuleAction::SetBudget {
            per_task_max_cost_usd: Some(0.5),
            max_total_tokens: None,
        },
    }];

    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(sequential_plan());
    fake.script_step(1, StepScript::complete("one").cost(0.6));

    let outcome = execute(&fake, config).await;

    assert_eq!(outcome.run.status, RunStatus::Failed);
    let failed = outcome.store.by_type(EventType::TaskFailed);
    assert_eq!(failed[0].data["error"], "budget_exceeded");
}
