// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::replay::project_run;
use fab_core::event::data;
use fab_core::{
    AgentResult, AgentResultStatus, Complexity, EventType, PlanId, PlanStep, RunId, RunStatus,
    StepStatus, TaskEvent, TicketDetails, ValidatedPlan,
};
use std::collections::BTreeMap;

fn plan_step(number: u32, agent: &str, depends_on: &[u32]) -> PlanStep {
    PlanStep {
        step_number: number,
        agent: agent.to_string(),
        model: None,
        task: format!("{agent} work"),
        context_inputs: Vec::new(),
        depends_on: depends_on.to_vec(),
        complexity: Complexity::Medium,
    }
}

fn validated_plan() -> ValidatedPlan {
    ValidatedPlan {
        plan_id: PlanId::from_string("plan-test"),
        ticket_id: "tkt-1".to_string(),
        classification: "feature".to_string(),
        reasoning: String::new(),
        steps: vec![plan_step(1, "product", &[]), plan_step(2, "developer", &[1])],
        parallel_groups: Vec::new(),
        human_gates: Vec::new(),
        confidence: None,
        model_overrides: BTreeMap::new(),
        max_cost_override_usd: None,
        max_tokens_override: None,
    }
}

fn ev<T: serde::Serialize>(event_type: EventType, at: u64, payload: &T) -> TaskEvent {
    TaskEvent::new(
        event_type,
        &RunId::from_string("run-1000-abc"),
        serde_json::to_value(payload).unwrap(),
        at,
    )
}

fn happy_path_events() -> Vec<TaskEvent> {
    let result = AgentResult::with_status(AgentResultStatus::Complete, "done");
    vec![
        ev(
            EventType::TaskCreated,
            1_000,
            &data::TaskCreated {
                project_id: "proj".to_string(),
                ticket: TicketDetails { id: "tkt-1".to_string(), ..Default::default() },
            },
        ),
        ev(
            EventType::TaskPlanValidated,
            2_000,
            &data::PlanValidated { plan: validated_plan(), warnings: vec![] },
        ),
        ev(EventType::TaskStarted, 3_000, &serde_json::json!({})),
        ev(
            EventType::StepStarted,
            4_000,
            &data::StepStarted { step_number: 1, agent: "product".to_string(), attempt: 1 },
        ),
        ev(
            EventType::StepCompleted,
            5_000,
            &data::StepCompleted {
                step_number: 1,
                agent: "product".to_string(),
                tokens_used: 100,
                cost_usd: 0.1,
                total_tokens_used: 100,
                total_cost_usd: 0.1,
                result: Some(result.clone()),
            },
        ),
        ev(
            EventType::StepStarted,
            6_000,
            &data::StepStarted { step_number: 2, agent: "developer".to_string(), attempt: 1 },
        ),
        ev(
            EventType::StepCompleted,
            7_000,
            &data::StepCompleted {
                step_number: 2,
                agent: "developer".to_string(),
                tokens_used: 300,
                cost_usd: 0.4,
                total_tokens_used: 400,
                total_cost_usd: 0.5,
                result: Some(result),
            },
        ),
        ev(
            EventType::TaskCompleted,
            8_000,
            &data::TaskCompleted { total_tokens_used: 400, total_cost_usd: 0.5, pr_url: None },
        ),
    ]
}

#[test]
fn projects_completed_run() {
    let run = project_run(&happy_path_events()).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.project_id, "proj");
    assert_eq!(run.created_at_ms, 1_000);
    assert_eq!(run.started_at_ms, Some(3_000));
    assert_eq!(run.completed_at_ms, Some(8_000));
    assert_eq!(run.total_tokens_used, 400);
    assert_eq!(run.steps.len(), 2);
    assert_eq!(run.steps[0].status, StepStatus::Completed);
    assert_eq!(run.steps[1].tokens_used, 300);
    assert!(run.steps[1].result.is_some());
}

#[test]
fn duplicate_rows_are_idempotent() {
    let mut events = happy_path_events();
    // At-least-once delivery: duplicate a completion row.
    events.insert(5, events[4].clone());
    let run = project_run(&events).unwrap();
    assert_eq!(run.total_tokens_used, 400);
    assert_eq!(run.steps[0].tokens_used, 100);
}

#[test]
fn failed_tag_cancelled_projects_cancelled_status() {
    let events = vec![
        ev(
            EventType::TaskCreated,
            1_000,
            &data::TaskCreated {
                project_id: "proj".to_string(),
                ticket: TicketDetails::default(),
            },
        ),
        ev(
            EventType::TaskFailed,
            2_000,
            &data::TaskFailed {
                error: "cancelled".to_string(),
                message: "cancelled".to_string(),
                total_tokens_used: 0,
                total_cost_usd: 0.0,
            },
        ),
    ];
    let run = project_run(&events).unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
}

#[test]
fn rework_rows_create_dynamic_steps() {
    let mut events = happy_path_events();
    events.truncate(5); // created, validated, started, step1 started+completed
    events.push(ev(
        EventType::StepStarted,
        6_000,
        &data::StepStarted { step_number: 2, agent: "developer".to_string(), attempt: 1 },
    ));
    events.push(ev(
        EventType::StepReworkTriggered,
        7_000,
        &data::ReworkTriggered {
            step_number: 2,
            rework_steps: vec![900],
            reason: "tests failing".to_string(),
            target: Some("developer".to_string()),
            cycle: 1,
            tokens_used: 50,
            cost_usd: 0.05,
            total_tokens_used: 150,
            total_cost_usd: 0.15,
        },
    ));
    events.push(ev(
        EventType::StepStarted,
        8_000,
        &data::StepStarted { step_number: 900, agent: "developer".to_string(), attempt: 1 },
    ));
    let run = project_run(&events).unwrap();
    assert_eq!(run.rework_cycles, 1);
    assert_eq!(run.step(2).unwrap().status, StepStatus::NeedsRework);
    assert_eq!(run.step(900).unwrap().status, StepStatus::Running);
}

#[test]
fn ignores_rows_from_other_runs() {
    let mut events = happy_path_events();
    let mut foreign = events[0].clone();
    foreign.run_id = RunId::from_string("run-2000-zzz");
    events.push(foreign);
    let run = project_run(&events).unwrap();
    assert_eq!(run.run_id.as_str(), "run-1000-abc");
    assert_eq!(run.steps.len(), 2);
}

#[test]
fn no_created_row_yields_none() {
    assert!(project_run(&[]).is_none());
}
