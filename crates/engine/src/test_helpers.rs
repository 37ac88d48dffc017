// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for engine tests.

use crate::service::{Orchestrator, RunOutcome};
use fab_adapters::fake::FakeRuntime;
use fab_adapters::runtime::RuntimeAdapter;
use fab_core::config::{
    AgentDef, AgentRole, FabConfig, PlatformConfig, ProjectConfig, RuntimeConfig, RuntimeKind,
};
use fab_core::{
    Complexity, EventType, ExecutionPlan, FakeClock, PlanId, PlanStep, TicketDetails,
};
use std::path::Path;
use std::sync::Arc;

pub fn agent(id: &str, role: AgentRole) -> AgentDef {
    AgentDef { id: id.to_string(), role, description: format!("{id} agent"), default_model: None }
}

/// Config with the standard agent catalog, a fake-friendly runtime, and
/// tight test timeouts.
pub fn test_config(workspace_base: &Path) -> FabConfig {
    let mut config = FabConfig {
        platform: PlatformConfig {
            agents: vec![
                agent("product", AgentRole::Product),
                agent("architect", AgentRole::Architect),
                agent("developer", AgentRole::Developer),
                agent("code-review", AgentRole::CodeReview),
                agent("qa", AgentRole::Qa),
                agent("security", AgentRole::Security),
            ],
            rules: vec![],
            events_dir: None,
            workspace_base: workspace_base.to_path_buf(),
        },
        project: ProjectConfig {
            id: "demo".to_string(),
            rules: vec![],
            agent_catalog: None,
            budget: Default::default(),
            limits: Default::default(),
        },
        runtime: RuntimeConfig {
            kind: RuntimeKind::Claude,
            command: "true".to_string(),
            args: vec![],
            env: Default::default(),
            plugin_paths: vec![],
            sdk_mode: false,
            deny_commands: vec![],
            allow_paths: vec![],
            deny_paths: vec![],
            planner_model: None,
        },
    };
    config.project.limits.step_timeout_ms = 5_000;
    config.project.limits.gate_poll_ms = 25;
    config
}

pub fn ticket() -> TicketDetails {
    TicketDetails::builder().id("tkt-1").title("Ship the widget").build()
}

pub fn step(number: u32, agent: &str, depends_on: &[u32]) -> PlanStep {
    PlanStep {
        step_number: number,
        agent: agent.to_string(),
        model: None,
        task: format!("{agent} work for step {number}"),
        context_inputs: Vec::new(),
        depends_on: depends_on.to_vec(),
        complexity: Complexity::Medium,
    }
}

pub fn plan(steps: Vec<PlanStep>) -> ExecutionPlan {
    ExecutionPlan {
        plan_id: PlanId::from_string("plan-1"),
        ticket_id: "tkt-1".to_string(),
        classification: "feature".to_string(),
        reasoning: "test plan".to_string(),
        steps,
        parallel_groups: Vec::new(),
        human_gates: Vec::new(),
        confidence: None,
    }
}

/// Three-step sequential plan used by most scenarios:
/// 1:product → 2:developer → 3:qa.
pub fn sequential_plan() -> ExecutionPlan {
    plan(vec![step(1, "product", &[]), step(2, "developer", &[1]), step(3, "qa", &[2])])
}

pub async fn execute(fake: &Arc<FakeRuntime>, config: FabConfig) -> RunOutcome {
    let runtime: Arc<dyn RuntimeAdapter> = Arc::clone(fake) as Arc<dyn RuntimeAdapter>;
    let orchestrator = Orchestrator::new(config, runtime, FakeClock::new());
    match orchestrator.execute(ticket()).await {
        Ok(outcome) => outcome,
        Err(e) => panic!("execute failed: {e}"),
    }
}

/// Event types for the run in store order, with the agent lifecycle noise
/// stripped.
pub fn lifecycle_events(outcome: &RunOutcome) -> Vec<EventType> {
    outcome
        .store
        .by_run(&outcome.run.run_id)
        .iter()
        .map(|e| e.event_type)
        .filter(|t| !matches!(t, EventType::AgentSpawned | EventType::AgentExited))
        .collect()
}

/// `(event_type, data.step_number)` pairs for step-addressed events.
pub fn step_events(outcome: &RunOutcome) -> Vec<(EventType, u32)> {
    outcome
        .store
        .by_run(&outcome.run.run_id)
        .iter()
        .filter_map(|e| {
            e.data
                .get("step_number")
                .and_then(|n| n.as_u64())
                .map(|n| (e.event_type, n as u32))
        })
        .collect()
}
