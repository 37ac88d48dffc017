// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human gate files and decision polling.
//!
//! The service writes `<review_id>.pending.json`, then polls for a
//! `<review_id>.decision.json` written by the reviewer tool or the monitor
//! API. Polling never busy-waits and the interval is capped at 2 s.

use fab_core::{iso8601, Clock, HumanReview, ReviewDecision, ReviewId};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("gate io: {0}")]
    Io(#[from] std::io::Error),
    #[error("gate decision encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("cancelled while waiting for decision")]
    Cancelled,
}

/// Polling parameters for one gate.
#[derive(Debug, Clone)]
pub struct GateWait {
    pub poll: Duration,
    /// Auto-approve window for non-required gates; `None` waits forever.
    pub auto_approve_after: Option<Duration>,
    pub confidence_threshold: f64,
}

/// Write the pending review file.
pub async fn request_review(
    workspace: &Path,
    review: &HumanReview,
) -> Result<PathBuf, GateError> {
    let path = review.review_id.pending_path(workspace);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(review)?;
    tokio::fs::write(&path, json).await?;
    tracing::info!(review_id = %review.review_id, path = %path.display(), "review requested");
    Ok(path)
}

/// Poll for the decision file.
///
/// A non-required gate auto-approves once the configured wait elapses and
/// the planner's reported confidence clears the threshold; the synthesized
/// decision is written to disk so the audit trail stays complete.
pub async fn await_decision(
    workspace: &Path,
    review_id: &ReviewId,
    required: bool,
    confidence: f64,
    wait: &GateWait,
    clock: &impl Clock,
    cancel: &CancellationToken,
) -> Result<ReviewDecision, GateError> {
    let decision_path = review_id.decision_path(workspace);
    let started = std::time::Instant::now();
    loop {
        match read_decision(&decision_path).await? {
            Some(decision) => {
                tracing::info!(review_id = %review_id, status = %decision.status, "decision received");
                return Ok(decision);
            }
            None => {
                if !required {
                    if let Some(after) = wait.auto_approve_after {
                        if started.elapsed() >= after && confidence > wait.confidence_threshold {
                            let decision = ReviewDecision {
                                status: fab_core::DecisionStatus::Approved,
                                reviewer_feedback: Some(format!(
                                    "auto-approved: confidence {confidence:.2} above threshold"
                                )),
                                decided_at: iso8601(clock.epoch_ms()),
                            };
                            tokio::fs::write(
                                &decision_path,
                                serde_json::to_string_pretty(&decision)?,
                            )
                            .await?;
                            tracing::info!(review_id = %review_id, "gate auto-approved");
                            return Ok(decision);
                        }
                    }
                }
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(wait.poll) => {}
            _ = cancel.cancelled() => return Err(GateError::Cancelled),
        }
    }
}

/// Read the decision file if present. A malformed file is treated as not
/// yet written (the reviewer may be mid-write); the poll keeps going.
async fn read_decision(path: &Path) -> Result<Option<ReviewDecision>, GateError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(GateError::Io(e)),
    };
    match serde_json::from_str::<ReviewDecision>(&raw) {
        Ok(decision) => Ok(Some(decision)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable decision file, retrying");
            Ok(None)
        }
    }
}

#[cfg(test)]
#[path = "gates_tests.rs"]
mod tests;
