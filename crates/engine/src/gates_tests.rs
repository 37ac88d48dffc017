// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::gates::{await_decision, request_review, GateError, GateWait};
use fab_core::{
    DecisionStatus, HumanReview, ReviewDecision, ReviewId, ReviewStatus, RunId, SystemClock,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn review(ws_run: &str) -> HumanReview {
    HumanReview {
        review_id: ReviewId::from_seq(1),
        run_id: RunId::from_string(ws_run),
        after_step: 2,
        status: ReviewStatus::Pending,
        summary: "look at the diff".to_string(),
        artifacts_to_review: vec!["artifacts/diff.patch".to_string()],
        reviewer_feedback: None,
        decided_at: None,
    }
}

fn wait(poll_ms: u64) -> GateWait {
    GateWait {
        poll: Duration::from_millis(poll_ms),
        auto_approve_after: None,
        confidence_threshold: 1.0,
    }
}

#[tokio::test]
async fn pending_file_is_written_with_review_contents() {
    let ws = tempfile::tempdir().unwrap();
    let path = request_review(ws.path(), &review("run-1-a")).await.unwrap();
    assert!(path.ends_with(".agentsdlc/reviews/review-1.pending.json"));
    let written: HumanReview =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written.status, ReviewStatus::Pending);
    assert_eq!(written.after_step, 2);
}

#[tokio::test]
async fn decision_file_written_mid_poll_is_picked_up() {
    let ws = tempfile::tempdir().unwrap();
    let review = review("run-1-a");
    request_review(ws.path(), &review).await.unwrap();

    let decision_path = review.review_id.decision_path(ws.path());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        let decision = ReviewDecision {
            status: DecisionStatus::Approved,
            reviewer_feedback: Some("ship it".to_string()),
            decided_at: "2026-01-01T00:00:00Z".to_string(),
        };
        std::fs::write(&decision_path, serde_json::to_string(&decision).unwrap()).unwrap();
    });

    let decision = await_decision(
        ws.path(),
        &review.review_id,
        true,
        0.0,
        &wait(20),
        &SystemClock,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(decision.status, DecisionStatus::Approved);
    assert_eq!(decision.reviewer_feedback.as_deref(), Some("ship it"));
}

#[tokio::test]
async fn rejection_is_returned_verbatim() {
    let ws = tempfile::tempdir().unwrap();
    let review = review("run-1-a");
    let decision = ReviewDecision {
        status: DecisionStatus::Rejected,
        reviewer_feedback: Some("wrong direction".to_string()),
        decided_at: "2026-01-01T00:00:00Z".to_string(),
    };
    std::fs::create_dir_all(ws.path().join(".agentsdlc/reviews")).unwrap();
    std::fs::write(
        review.review_id.decision_path(ws.path()),
        serde_json::to_string(&decision).unwrap(),
    )
    .unwrap();

    let got = await_decision(
        ws.path(),
        &review.review_id,
        true,
        0.0,
        &wait(10),
        &SystemClock,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(got.status, DecisionStatus::Rejected);
}

#[tokio::test]
async fn malformed_decision_file_keeps_polling() {
    let ws = tempfile::tempdir().unwrap();
    let review = review("run-1-a");
    std::fs::create_dir_all(ws.path().join(".agentsdlc/reviews")).unwrap();
    let decision_path = review.review_id.decision_path(ws.path());
    std::fs::write(&decision_path, "{\"status\": \"pending\"}").unwrap();

    let fix = decision_path.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let decision = ReviewDecision {
            status: DecisionStatus::Approved,
            reviewer_feedback: None,
            decided_at: "2026-01-01T00:00:00Z".to_string(),
        };
        std::fs::write(&fix, serde_json::to_string(&decision).unwrap()).unwrap();
    });

    let got = await_decision(
        ws.path(),
        &review.review_id,
        true,
        0.0,
        &wait(10),
        &SystemClock,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(got.status, DecisionStatus::Approved);
}

#[tokio::test]
async fn cancellation_interrupts_the_poll() {
    let ws = tempfile::tempdir().unwrap();
    let review = review("run-1-a");
    std::fs::create_dir_all(ws.path().join(".agentsdlc/reviews")).unwrap();
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
    });

    let result = await_decision(
        ws.path(),
        &review.review_id,
        true,
        0.0,
        &wait(10),
        &SystemClock,
        &cancel,
    )
    .await;
    assert!(matches!(result, Err(GateError::Cancelled)));
}

#[tokio::test]
async fn optional_gate_auto_approves_after_wait_with_confidence() {
    let ws = tempfile::tempdir().unwrap();
    let review = review("run-1-a");
    std::fs::create_dir_all(ws.path().join(".agentsdlc/reviews")).unwrap();
    let wait = GateWait {
        poll: Duration::from_millis(10),
        auto_approve_after: Some(Duration::from_millis(30)),
        confidence_threshold: 0.8,
    };

    let decision = await_decision(
        ws.path(),
        &review.review_id,
        false,
        0.95,
        &wait,
        &SystemClock,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(decision.status, DecisionStatus::Approved);
    assert!(decision.reviewer_feedback.unwrap_or_default().starts_with("auto-approved"));
    // The synthesized decision lands on disk for the audit trail.
    assert!(review.review_id.decision_path(ws.path()).exists());
}

#[tokio::test]
async fn required_gate_never_auto_approves() {
    let ws = tempfile::tempdir().unwrap();
    let review = review("run-1-a");
    std::fs::create_dir_all(ws.path().join(".agentsdlc/reviews")).unwrap();
    let wait = GateWait {
        poll: Duration::from_millis(10),
        auto_approve_after: Some(Duration::from_millis(20)),
        confidence_threshold: 0.1,
    };

    let polled = tokio::time::timeout(
        Duration::from_millis(150),
        await_decision(
            ws.path(),
            &review.review_id,
            true,
            0.99,
            &wait,
            &SystemClock,
            &CancellationToken::new(),
        ),
    )
    .await;
    assert!(polled.is_err(), "required gate must keep waiting");
}
