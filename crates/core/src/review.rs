// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human gate reviews and their on-disk decision files.

use crate::run::RunId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory under the workspace holding gate files.
pub const REVIEWS_DIR: &str = ".agentsdlc/reviews";

crate::define_id! {
    /// Identifier for one human review, always `review-<digits>`.
    pub struct ReviewId;
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid review id {0:?} (expected review-<digits>)")]
pub struct InvalidReviewId(pub String);

impl ReviewId {
    /// Parse a review id, rejecting anything not matching `review-<digits>`.
    pub fn parse(s: &str) -> Result<Self, InvalidReviewId> {
        let digits = s.strip_prefix("review-").ok_or_else(|| InvalidReviewId(s.to_string()))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidReviewId(s.to_string()));
        }
        Ok(Self::from_string(s))
    }

    /// Build the nth review id for a run.
    pub fn from_seq(seq: u64) -> Self {
        Self::from_string(format!("review-{seq}"))
    }

    /// Path of the pending file the service writes.
    pub fn pending_path(&self, workspace: &Path) -> PathBuf {
        workspace.join(REVIEWS_DIR).join(format!("{self}.pending.json"))
    }

    /// Path of the decision file an external reviewer writes.
    pub fn decision_path(&self, workspace: &Path) -> PathBuf {
        workspace.join(REVIEWS_DIR).join(format!("{self}.decision.json"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

crate::simple_display! {
    ReviewStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

/// A human review as written to `<review_id>.pending.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanReview {
    pub review_id: ReviewId,
    pub run_id: RunId,
    pub after_step: u32,
    pub status: ReviewStatus,
    pub summary: String,
    #[serde(default)]
    pub artifacts_to_review: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<String>,
}

/// Contents of `<review_id>.decision.json`.
///
/// `status` admits only terminal values; a file claiming `pending` fails to
/// parse and the poll keeps waiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub status: DecisionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_feedback: Option<String>,
    pub decided_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Approved,
    Rejected,
}

crate::simple_display! {
    DecisionStatus {
        Approved => "approved",
        Rejected => "rejected",
    }
}

#[cfg(test)]
#[path = "review_tests.rs"]
mod tests;
