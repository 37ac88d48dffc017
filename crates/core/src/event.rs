// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Audit events appended to the per-run and global logs.

use crate::clock::iso8601;
use crate::run::RunId;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for one event row.
    pub struct EventId("evt-");
}

/// The closed set of event types.
///
/// Serialized as the dotted wire strings (`"task.created"`, ...); the set is
/// closed so consumers can exhaustively match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "task.plan_generated")]
    TaskPlanGenerated,
    #[serde(rename = "task.plan_validated")]
    TaskPlanValidated,
    #[serde(rename = "task.started")]
    TaskStarted,
    #[serde(rename = "task.completed")]
    TaskCompleted,
    #[serde(rename = "task.failed")]
    TaskFailed,
    #[serde(rename = "step.started")]
    StepStarted,
    #[serde(rename = "step.completed")]
    StepCompleted,
    #[serde(rename = "step.failed")]
    StepFailed,
    #[serde(rename = "step.committed")]
    StepCommitted,
    #[serde(rename = "step.rework_triggered")]
    StepReworkTriggered,
    #[serde(rename = "agent.spawned")]
    AgentSpawned,
    #[serde(rename = "agent.exited")]
    AgentExited,
    #[serde(rename = "agent.token_limit_warning")]
    AgentTokenLimitWarning,
    #[serde(rename = "agent.token_limit_exceeded")]
    AgentTokenLimitExceeded,
    #[serde(rename = "human_gate.requested")]
    HumanGateRequested,
    #[serde(rename = "human_gate.approved")]
    HumanGateApproved,
    #[serde(rename = "human_gate.rejected")]
    HumanGateRejected,
    #[serde(rename = "pr.created")]
    PrCreated,
    #[serde(rename = "ticket.updated")]
    TicketUpdated,
}

crate::simple_display! {
    EventType {
        TaskCreated => "task.created",
        TaskPlanGenerated => "task.plan_generated",
        TaskPlanValidated => "task.plan_validated",
        TaskStarted => "task.started",
        TaskCompleted => "task.completed",
        TaskFailed => "task.failed",
        StepStarted => "step.started",
        StepCompleted => "step.completed",
        StepFailed => "step.failed",
        StepCommitted => "step.committed",
        StepReworkTriggered => "step.rework_triggered",
        AgentSpawned => "agent.spawned",
        AgentExited => "agent.exited",
        AgentTokenLimitWarning => "agent.token_limit_warning",
        AgentTokenLimitExceeded => "agent.token_limit_exceeded",
        HumanGateRequested => "human_gate.requested",
        HumanGateApproved => "human_gate.approved",
        HumanGateRejected => "human_gate.rejected",
        PrCreated => "pr.created",
        TicketUpdated => "ticket.updated",
    }
}

/// One immutable audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub event_id: EventId,
    pub run_id: RunId,
    pub event_type: EventType,
    /// ISO-8601 UTC timestamp.
    pub timestamp: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl TaskEvent {
    pub fn new(
        event_type: EventType,
        run_id: &RunId,
        data: serde_json::Value,
        epoch_ms: u64,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            run_id: run_id.clone(),
            event_type,
            timestamp: iso8601(epoch_ms),
            data,
        }
    }
}

/// Typed payloads carried in `TaskEvent::data`.
///
/// `data` is free-form on the wire; these are the shapes the service writes
/// and the replay projection reads back.
pub mod data {
    use crate::plan::{ExecutionPlan, ValidatedPlan};
    use crate::result::AgentResult;
    use crate::ticket::TicketDetails;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TaskCreated {
        pub project_id: String,
        pub ticket: TicketDetails,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PlanGenerated {
        pub plan: ExecutionPlan,
        #[serde(default)]
        pub tokens_used: u64,
        #[serde(default)]
        pub cost_usd: f64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PlanValidated {
        pub plan: ValidatedPlan,
        #[serde(default)]
        pub warnings: Vec<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StepStarted {
        pub step_number: u32,
        pub agent: String,
        pub attempt: u32,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StepCompleted {
        pub step_number: u32,
        pub agent: String,
        pub tokens_used: u64,
        pub cost_usd: f64,
        pub total_tokens_used: u64,
        pub total_cost_usd: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub result: Option<AgentResult>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StepFailed {
        pub step_number: u32,
        pub agent: String,
        pub error: String,
        #[serde(default)]
        pub tokens_used: u64,
        #[serde(default)]
        pub cost_usd: f64,
        #[serde(default)]
        pub total_tokens_used: u64,
        #[serde(default)]
        pub total_cost_usd: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub result: Option<AgentResult>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StepCommitted {
        pub step_number: u32,
        pub commit: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ReworkTriggered {
        pub step_number: u32,
        pub rework_steps: Vec<u32>,
        pub reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub target: Option<String>,
        pub cycle: u32,
        #[serde(default)]
        pub tokens_used: u64,
        #[serde(default)]
        pub cost_usd: f64,
        #[serde(default)]
        pub total_tokens_used: u64,
        #[serde(default)]
        pub total_cost_usd: f64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AgentSpawned {
        pub step_number: u32,
        pub agent: String,
        pub runtime: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AgentExited {
        pub step_number: u32,
        pub agent: String,
        pub runtime_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub exit_code: Option<i32>,
        pub duration_ms: u64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TokenLimit {
        pub total_tokens_used: u64,
        pub total_cost_usd: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub max_total_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub per_task_max_cost_usd: Option<f64>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Gate {
        pub review_id: String,
        pub after_step: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub reviewer_feedback: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TaskCompleted {
        pub total_tokens_used: u64,
        pub total_cost_usd: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub pr_url: Option<String>,
    }

    /// `error` is the short machine tag; `message` the human diagnostic.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TaskFailed {
        pub error: String,
        pub message: String,
        #[serde(default)]
        pub total_tokens_used: u64,
        #[serde(default)]
        pub total_cost_usd: f64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PrCreated {
        pub url: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TicketUpdated {
        pub ticket_id: String,
        pub status: String,
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
