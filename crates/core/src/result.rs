// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured agent result, written by agents as `.agent-result.json`.

use serde::{Deserialize, Serialize};

/// Outcome an agent reports for its step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentResultStatus {
    Complete,
    NeedsRework,
    Blocked,
    Failed,
}

crate::simple_display! {
    AgentResultStatus {
        Complete => "complete",
        NeedsRework => "needs_rework",
        Blocked => "blocked",
        Failed => "failed",
    }
}

/// Structured result parsed from `.agent-result.json`.
///
/// The file is one-shot per step: the runner consumes (and removes) it after
/// the agent exits, so a stale result can never be attributed to a later step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub status: AgentResultStatus,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub artifacts_created: Vec<String>,
    #[serde(default)]
    pub artifacts_modified: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rework_reason: Option<String>,
    /// Agent id that should address the rework, if the agent knows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rework_target: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AgentResult {
    /// Minimal result with the given status (test and fallback paths).
    pub fn with_status(status: AgentResultStatus, summary: impl Into<String>) -> Self {
        Self {
            status,
            summary: summary.into(),
            artifacts_created: Vec::new(),
            artifacts_modified: Vec::new(),
            issues: Vec::new(),
            rework_reason: None,
            rework_target: None,
            metadata: serde_json::Map::new(),
        }
    }
}
