// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the orchestration service.
//!
//! Every terminal failure carries a short machine tag (reported in the
//! `task.failed` event data) and maps to a process exit code: configuration
//! and plan-integrity errors that fire before any step executes exit 2,
//! everything else exits 1.

use crate::validator::ValidateError;
use crate::workspace::WorkspaceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("plan integrity: {0}")]
    PlanIntegrity(String),
    #[error("runtime invocation: {0}")]
    RuntimeInvocation(String),
    #[error("runtime: {0}")]
    Runtime(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("budget exceeded: {0}")]
    Budget(String),
    #[error("guardrail denied: {0}")]
    GuardrailDenied(String),
    #[error("human gate: {0}")]
    HumanGate(String),
    #[error("git checkpoint: {0}")]
    Git(#[from] crate::git::GitError),
    #[error("workspace: {0}")]
    Workspace(#[from] WorkspaceError),
    #[error("event store: {0}")]
    Store(#[from] fab_storage::StoreError),
}

impl OrchestratorError {
    /// Short machine tag for `task.failed` event data.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::PlanIntegrity(_) => "plan_integrity",
            Self::RuntimeInvocation(_) => "runtime_invocation",
            Self::Runtime(_) => "runtime",
            Self::Timeout(_) => "timeout",
            Self::Budget(_) => "budget_exceeded",
            Self::GuardrailDenied(_) => "guardrail_denied",
            Self::HumanGate(_) => "human_gate",
            Self::Git(_) => "git",
            Self::Workspace(_) => "workspace",
            Self::Store(_) => "event_store",
        }
    }

    /// True for errors that abort a run before any step executes.
    pub fn is_pre_run(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::PlanIntegrity(_))
    }
}

impl From<ValidateError> for OrchestratorError {
    fn from(e: ValidateError) -> Self {
        if e.is_configuration() {
            Self::Configuration(e.to_string())
        } else {
            Self::PlanIntegrity(e.to_string())
        }
    }
}
