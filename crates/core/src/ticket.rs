// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Normalized ticket handed to the orchestrator.

use serde::{Deserialize, Serialize};

/// A ticket as normalized by the upstream fetcher.
///
/// Everything the planner and the rule engine can see about the work item.
/// Fetching and normalization happen outside this system; the orchestrator
/// treats the ticket as immutable input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketDetails {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// Classification suggested upstream; the planner may override it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification_hint: Option<String>,
    /// File paths the ticket is expected to touch (drives path-match rules).
    #[serde(default)]
    pub touched_paths: Vec<String>,
}

crate::builder! {
    pub struct TicketDetailsBuilder => TicketDetails {
        into {
            id: String = "tkt-1",
            title: String = "Add feature",
            body: String = "Implement the feature described in the ticket.",
        }
        set {
            labels: Vec<String> = Vec::new(),
            touched_paths: Vec<String> = Vec::new(),
        }
        option {
            priority: String = None,
            classification_hint: String = None,
        }
    }
}
