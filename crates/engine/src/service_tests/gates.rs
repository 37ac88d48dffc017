// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::test_helpers::{execute, sequential_plan, test_config};
use fab_adapters::fake::{FakeRuntime, StepScript};
use fab_core::{DecisionStatus, EventType, HumanGate, ReviewDecision, RunStatus, StepStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn gated_plan() -> fab_core::ExecutionPlan {
    let mut plan = sequential_plan();
    plan.human_gates = vec![HumanGate {
        after_step: 2,
        summary: "inspect the diff".to_string(),
        artifacts_to_review: vec!["artifacts/diff.patch".to_string()],
        required: true,
    }];
    plan
}

/// Find `review-1.pending.json` anywhere under the workspace base.
fn find_pending(base: &Path) -> Option<PathBuf> {
    fn walk(dir: &Path, needle: &str, hits: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else { return };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, needle, hits);
            } else if path.file_name().is_some_and(|n| n == needle) {
                hits.push(path);
            }
        }
    }
    let mut hits = Vec::new();
    walk(base, "review-1.pending.json", &mut hits);
    hits.pop()
}

/// Background reviewer: waits for the pending file, then writes a decision.
fn spawn_reviewer(base: PathBuf, status: DecisionStatus, feedback: &str) {
    let feedback = feedback.to_string();
    tokio::spawn(async move {
        for _ in 0..500 {
            if let Some(pending) = find_pending(&base) {
                let decision = ReviewDecision {
                    status,
                    reviewer_feedback: Some(feedback),
                    decided_at: "2026-01-01T00:00:00Z".to_string(),
                };
                let decision_path =
                    pending.with_file_name("review-1.decision.json");
                std::fs::write(
                    decision_path,
                    serde_json::to_string(&decision).unwrap_or_default(),
                )
                .ok();
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });
}

#[tokio::test]
async fn s4_gate_approved_resumes_execution() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(gated_plan());
    spawn_reviewer(base.path().to_path_buf(), DecisionStatus::Approved, "looks good");

    let outcome = execute(&fake, test_config(base.path())).await;

    assert_eq!(outcome.run.status, RunStatus::Completed);
    let requested = outcome.store.by_type(EventType::HumanGateRequested);
    assert_eq!(requested.len(), 1);
    assert_eq!(requested[0].data["review_id"], "review-1");
    assert_eq!(requested[0].data["after_step"], 2);

    let approved = outcome.store.by_type(EventType::HumanGateApproved);
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].data["reviewer_feedback"], "looks good");

    // Step 3 only started after the approval.
    let events: Vec<EventType> = outcome
        .store
        .by_run(&outcome.run.run_id)
        .iter()
        .map(|e| e.event_type)
        .collect();
    let approved_idx =
        events.iter().position(|t| *t == EventType::HumanGateApproved).unwrap();
    let step3_started = events
        .iter()
        .enumerate()
        .filter(|(_, t)| **t == EventType::StepStarted)
        .nth(2)
        .map(|(i, _)| i)
        .unwrap();
    assert!(approved_idx < step3_started, "gate decision must precede step 3");
}

#[tokio::test]
async fn gate_rejection_fails_the_run() {
    let base = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(gated_plan());
    spawn_reviewer(base.path().to_path_buf(), DecisionStatus::Rejected, "not like this");

    let outcome = execute(&fake, test_config(base.path())).await;

    assert_eq!(outcome.run.status, RunStatus::Failed);
    assert_eq!(outcome.exit_code, 1);
    assert_eq!(outcome.store.by_type(EventType::HumanGateRejected).len(), 1);
    let failed = outcome.store.by_type(EventType::TaskFailed);
    assert_eq!(failed[0].data["error"], "human_gate_rejected");
    assert!(failed[0].data["message"].as_str().unwrap().contains("not like this"));
    // Step 3 never started.
    assert_eq!(outcome.run.step(3).unwrap().status, StepStatus::Pending);
}

#[tokio::test]
async fn optional_gate_auto_approves_with_confident_plan() {
    let base = tempfile::tempdir().unwrap();
    let mut config = test_config(base.path());
    config.project.limits.gate_auto_approve_after_ms = Some(50);
    config.project.limits.gate_confidence_threshold = 0.8;

    let mut plan = gated_plan();
    plan.human_gates[0].required = false;
    plan.confidence = Some(0.95);

    let fake = Arc::new(FakeRuntime::new());
    fake.push_plan(plan);
    // No reviewer at all: the gate must resolve on its own.

    let outcome = execute(&fake, config).await;

    assert_eq!(outcome.run.status, RunStatus::Completed);
    let approved = outcome.store.by_type(EventType::HumanGateApproved);
    assert_eq!(approved.len(), 1);
    assert!(approved[0].data["reviewer_feedback"]
        .as_str()
        .unwrap()
        .starts_with("auto-approved"));
}
