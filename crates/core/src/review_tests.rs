// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::review::{DecisionStatus, ReviewDecision, ReviewId};
use std::path::Path;
use yare::parameterized;

#[parameterized(
    simple = { "review-1", true },
    long = { "review-0042", true },
    missing_digits = { "review-", false },
    wrong_prefix = { "rev-1", false },
    letters = { "review-abc", false },
    trailing_junk = { "review-1x", false },
    empty = { "", false },
    path_traversal = { "review-../1", false },
)]
fn review_id_format(raw: &str, ok: bool) {
    assert_eq!(ReviewId::parse(raw).is_ok(), ok, "{raw:?}");
}

#[test]
fn from_seq_builds_valid_ids() {
    let id = ReviewId::from_seq(7);
    assert_eq!(id.as_str(), "review-7");
    assert!(ReviewId::parse(id.as_str()).is_ok());
}

#[test]
fn review_file_paths() {
    let id = ReviewId::from_seq(1);
    let ws = Path::new("/tmp/ws");
    assert_eq!(
        id.pending_path(ws),
        Path::new("/tmp/ws/.agentsdlc/reviews/review-1.pending.json")
    );
    assert_eq!(
        id.decision_path(ws),
        Path::new("/tmp/ws/.agentsdlc/reviews/review-1.decision.json")
    );
}

#[test]
fn decision_parses_terminal_statuses_only() {
    let approved: ReviewDecision = serde_json::from_str(
        r#"{"status":"approved","reviewer_feedback":"lgtm","decided_at":"2026-01-01T00:00:00Z"}"#,
    )
    .unwrap();
    assert_eq!(approved.status, DecisionStatus::Approved);

    let pending: Result<ReviewDecision, _> =
        serde_json::from_str(r#"{"status":"pending","decided_at":"2026-01-01T00:00:00Z"}"#);
    assert!(pending.is_err());
}

#[test]
fn decision_requires_decided_at() {
    let missing: Result<ReviewDecision, _> = serde_json::from_str(r#"{"status":"approved"}"#);
    assert!(missing.is_err());
}
