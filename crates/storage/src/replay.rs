// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event-sourced projection of a run.
//!
//! Folds a run's audit rows back into the [`TaskRun`] they describe. Every
//! handler is idempotent: applying a duplicated row (possible after crash
//! replay, the store is at-least-once) yields the same state.

use fab_core::event::data;
use fab_core::{EventType, RunStatus, StepExecution, StepStatus, TaskEvent, TaskRun};

/// Project the events of one run into its run state.
///
/// Returns `None` when the slice contains no `task.created` row. Rows for
/// other runs are ignored, so a global log slice can be passed directly.
pub fn project_run(events: &[TaskEvent]) -> Option<TaskRun> {
    let created = events.iter().find(|e| e.event_type == EventType::TaskCreated)?;
    let run_id = created.run_id.clone();
    let head: data::TaskCreated = parse(created)?;
    let mut run =
        TaskRun::new(run_id.clone(), head.project_id, head.ticket, epoch_ms(created));

    for event in events.iter().filter(|e| e.run_id == run_id) {
        apply(&mut run, event);
    }
    run.recompute_totals();
    Some(run)
}

fn apply(run: &mut TaskRun, event: &TaskEvent) {
    let at = epoch_ms(event);
    match event.event_type {
        EventType::TaskCreated => {}
        EventType::TaskPlanGenerated => {
            if let Some(d) = parse::<data::PlanGenerated>(event) {
                run.plan = Some(d.plan);
            }
            run.set_status(RunStatus::Planning, at);
        }
        EventType::TaskPlanValidated => {
            if let Some(d) = parse::<data::PlanValidated>(event) {
                run.steps = d.plan.steps.iter().map(StepExecution::new).collect();
                run.validated_plan = Some(d.plan);
            }
        }
        EventType::TaskStarted => {
            run.set_status(RunStatus::Executing, at);
        }
        EventType::StepStarted => {
            if let Some(d) = parse::<data::StepStarted>(event) {
                let step = ensure_step(run, d.step_number, &d.agent);
                step.start(at);
                step.attempt = d.attempt;
                step.rework_count = d.attempt.saturating_sub(1);
            }
            run.status = RunStatus::Executing;
        }
        EventType::StepCompleted => {
            if let Some(d) = parse::<data::StepCompleted>(event) {
                let step = ensure_step(run, d.step_number, &d.agent);
                step.finish(StepStatus::Completed, at);
                step.tokens_used = d.tokens_used;
                step.cost_usd = d.cost_usd;
                step.result = d.result;
            }
        }
        EventType::StepFailed => {
            if let Some(d) = parse::<data::StepFailed>(event) {
                let step = ensure_step(run, d.step_number, &d.agent);
                step.finish(StepStatus::Failed, at);
                step.tokens_used = d.tokens_used;
                step.cost_usd = d.cost_usd;
                step.result = d.result;
                step.error = Some(d.error);
            }
        }
        EventType::StepCommitted => {}
        EventType::StepReworkTriggered => {
            if let Some(d) = parse::<data::ReworkTriggered>(event) {
                if let Some(step) = run.step_mut(d.step_number) {
                    step.finish(StepStatus::NeedsRework, at);
                    step.tokens_used = d.tokens_used;
                    step.cost_usd = d.cost_usd;
                }
                run.rework_cycles = d.cycle;
            }
            run.status = RunStatus::Rework;
        }
        EventType::AgentSpawned => {}
        EventType::AgentExited => {
            if let Some(d) = parse::<data::AgentExited>(event) {
                if let Some(step) = run.step_mut(d.step_number) {
                    step.container_id = Some(d.runtime_id);
                }
            }
        }
        EventType::AgentTokenLimitWarning | EventType::AgentTokenLimitExceeded => {}
        EventType::HumanGateRequested => {
            run.status = RunStatus::WaitingHumanReview;
        }
        EventType::HumanGateApproved => {
            run.status = RunStatus::Executing;
        }
        EventType::HumanGateRejected => {}
        EventType::TaskCompleted => {
            if let Some(d) = parse::<data::TaskCompleted>(event) {
                run.pr_url = d.pr_url;
            }
            run.set_status(RunStatus::Completed, at);
        }
        EventType::TaskFailed => {
            if let Some(d) = parse::<data::TaskFailed>(event) {
                let status = if d.error == "cancelled" {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Failed
                };
                run.error = Some(d.message);
                run.set_status(status, at);
            } else {
                run.set_status(RunStatus::Failed, at);
            }
        }
        EventType::PrCreated => {
            if let Some(d) = parse::<data::PrCreated>(event) {
                run.pr_url = Some(d.url);
            }
        }
        EventType::TicketUpdated => {}
    }
}

fn ensure_step<'r>(run: &'r mut TaskRun, number: u32, agent: &str) -> &'r mut StepExecution {
    // Rework steps are injected mid-run; their first row creates the record.
    let idx = match run.steps.iter().position(|s| s.step_number == number) {
        Some(idx) => idx,
        None => {
            run.steps.push(StepExecution {
                step_number: number,
                agent: agent.to_string(),
                status: StepStatus::Pending,
                container_id: None,
                tokens_used: 0,
                cost_usd: 0.0,
                started_at_ms: None,
                completed_at_ms: None,
                result: None,
                attempt: 1,
                rework_count: 0,
                error: None,
            });
            run.steps.len() - 1
        }
    };
    &mut run.steps[idx]
}

fn parse<T: serde::de::DeserializeOwned>(event: &TaskEvent) -> Option<T> {
    match serde_json::from_value(event.data.clone()) {
        Ok(d) => Some(d),
        Err(e) => {
            tracing::warn!(
                event = %event.event_type,
                error = %e,
                "event data does not match expected payload shape"
            );
            None
        }
    }
}

fn epoch_ms(event: &TaskEvent) -> u64 {
    chrono::DateTime::parse_from_rfc3339(&event.timestamp)
        .map(|t| t.timestamp_millis().max(0) as u64)
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "replay_tests.rs"]
mod tests;
