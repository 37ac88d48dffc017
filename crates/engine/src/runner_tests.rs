// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::runner::{AgentRunner, PlannerRunRequest, StepFailureKind, StepRunRequest};
use crate::test_helpers::{agent, plan, step, ticket};
use fab_adapters::fake::{FakeCall, FakeRuntime, StepScript};
use fab_adapters::runtime::RuntimeAdapter;
use fab_core::config::{AgentRole, LimitsConfig, RuntimeConfig, RuntimeKind};
use fab_core::{layout, AgentResult, AgentResultStatus, ContextInput, RunId};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn runtime_config(sdk_mode: bool) -> RuntimeConfig {
    RuntimeConfig {
        kind: RuntimeKind::Claude,
        command: "true".to_string(),
        args: vec![],
        env: BTreeMap::new(),
        plugin_paths: vec![],
        sdk_mode,
        deny_commands: vec![],
        allow_paths: vec!["artifacts/**".to_string()],
        deny_paths: vec![],
        planner_model: None,
    }
}

fn runner(fake: &Arc<FakeRuntime>, sdk_mode: bool) -> AgentRunner {
    let mut limits = LimitsConfig::default();
    limits.step_timeout_ms = 1_000;
    AgentRunner::new(
        Arc::clone(fake) as Arc<dyn RuntimeAdapter>,
        &runtime_config(sdk_mode),
        limits,
    )
}

fn request(workspace: &Path) -> StepRunRequest {
    StepRunRequest {
        run_id: RunId::from_string("run-1-x"),
        ticket: ticket(),
        workspace: workspace.to_path_buf(),
        step: step(1, "developer", &[]),
        agent: agent("developer", AgentRole::Developer),
        model: None,
        attempt: 1,
        scoped_result: false,
        prior_results: BTreeMap::new(),
        cancel: CancellationToken::new(),
    }
}

#[tokio::test]
async fn completed_step_parses_and_consumes_result_file() {
    let ws = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.script_step(1, StepScript::complete("built the thing").tokens(500).cost(0.05));

    let outcome = runner(&fake, false).run_step(request(ws.path())).await;
    assert!(outcome.failure.is_none());
    let result = outcome.agent_result.unwrap();
    assert_eq!(result.status, AgentResultStatus::Complete);
    assert_eq!(result.summary, "built the thing");
    assert_eq!(outcome.tokens_used, 500);
    assert!((outcome.cost_usd - 0.05).abs() < f64::EPSILON);
    // One-shot: the result file is consumed.
    assert!(!ws.path().join(layout::RESULT_FILE).exists());
}

#[tokio::test]
async fn missing_result_file_is_a_failure() {
    let ws = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.script_step(1, StepScript::no_result());

    let outcome = runner(&fake, false).run_step(request(ws.path())).await;
    assert_eq!(outcome.failure, Some(StepFailureKind::NoResult));
    assert_eq!(outcome.failure.unwrap().error_string(), "no result");
}

#[tokio::test]
async fn non_zero_exit_is_a_failure() {
    let ws = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.script_step(1, StepScript::complete("wrote result anyway").exit_code(3));

    let outcome = runner(&fake, false).run_step(request(ws.path())).await;
    assert_eq!(outcome.failure, Some(StepFailureKind::NonZeroExit { code: 3 }));
}

#[tokio::test]
async fn timeout_reports_configured_budget() {
    let ws = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.script_step(1, StepScript::complete("slow").delay(Duration::from_secs(30)));

    let outcome = runner(&fake, false).run_step(request(ws.path())).await;
    assert_eq!(outcome.failure, Some(StepFailureKind::Timeout { ms: 1_000 }));
    assert_eq!(outcome.failure.unwrap().error_string(), "timeout:1000");
}

#[tokio::test]
async fn stages_context_inputs_and_task_file() {
    let ws = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(ws.path().join("artifacts")).unwrap();
    std::fs::write(ws.path().join("artifacts/design.md"), "# design").unwrap();
    std::fs::write(ws.path().join("notes.txt"), "notes").unwrap();

    let fake = Arc::new(FakeRuntime::new());
    let mut req = request(ws.path());
    req.step.context_inputs = vec![
        ContextInput::Ticket,
        ContextInput::File { path: "notes.txt".into() },
        ContextInput::StepOutput { step: 1 },
        ContextInput::Artifact { name: "design.md".to_string() },
    ];
    req.step.step_number = 2;
    req.prior_results.insert(
        1,
        AgentResult::with_status(AgentResultStatus::Complete, "step one summary"),
    );

    let outcome = runner(&fake, false).run_step(req).await;
    assert!(outcome.failure.is_none());

    let context = ws.path().join(layout::CONTEXT_DIR);
    assert!(context.join("ticket.json").is_file());
    assert!(context.join("files/notes.txt").is_file());
    assert!(context.join("1/result.json").is_file());
    assert_eq!(
        std::fs::read_to_string(context.join("1/summary.md")).unwrap(),
        "step one summary"
    );
    assert!(context.join("artifacts/design.md").is_file());

    let task = std::fs::read_to_string(ws.path().join(layout::TASK_FILE)).unwrap();
    assert!(task.starts_with("# Step 2: developer"));
}

#[tokio::test]
async fn scoped_result_path_for_group_members() {
    let ws = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    let mut req = request(ws.path());
    req.scoped_result = true;

    let outcome = runner(&fake, false).run_step(req).await;
    assert!(outcome.failure.is_none());
    // The canonical single-step path was never touched.
    assert!(!ws.path().join(layout::RESULT_FILE).exists());
    assert!(!ws.path().join(".agent-result.step-1.json").exists());
}

#[tokio::test]
async fn sdk_mode_rejects_artifact_writes_outside_allow_paths() {
    let ws = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    let mut result = AgentResult::with_status(AgentResultStatus::Complete, "escaped");
    result.artifacts_created = vec!["/etc/hosts".to_string()];
    fake.script_step(1, StepScript::from_result(result));

    let outcome = runner(&fake, true).run_step(request(ws.path())).await;
    assert!(matches!(outcome.failure, Some(StepFailureKind::Guardrail(_))));

    // Sealed CLI mode: the same result passes.
    let fake = Arc::new(FakeRuntime::new());
    let mut result = AgentResult::with_status(AgentResultStatus::Complete, "escaped");
    result.artifacts_created = vec!["/etc/hosts".to_string()];
    fake.script_step(1, StepScript::from_result(result));
    let outcome = runner(&fake, false).run_step(request(ws.path())).await;
    assert!(outcome.failure.is_none());
}

#[tokio::test]
async fn planner_requests_are_recorded_with_rework_flag() {
    let ws = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(plan(vec![step(1, "developer", &[])]));

    let runner = runner(&fake, false);
    let generated = runner
        .run_planner(PlannerRunRequest {
            run_id: RunId::from_string("run-1-x"),
            ticket: ticket(),
            workspace: ws.path().to_path_buf(),
            rework: None,
            cancel: CancellationToken::new(),
        })
        .await
        .unwrap();
    assert_eq!(generated.plan.steps.len(), 1);
    assert_eq!(fake.calls(), vec![FakeCall::Planner { rework: false }]);
}
