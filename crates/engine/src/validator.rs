// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plan validation: rule application, step injection, agent-id remapping,
//! and integrity checks.
//!
//! Coherence is restored where possible (remap, drop, renumber); structural
//! defects (duplicate numbers, dangling or forward dependencies, broken
//! groups and gates) fail hard before any step executes.

use fab_core::config::{AgentDef, AgentRole, FabConfig, PlanRule, RuleAction, RuleCondition};
use fab_core::{
    glob_match, ContextInput, ExecutionPlan, HumanGate, PlanStep, TicketDetails, ValidatedPlan,
};
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidateError {
    #[error("duplicate step number {0}")]
    DuplicateStepNumber(u32),
    #[error("step {step} depends on missing step {dep}")]
    DanglingDependency { step: u32, dep: u32 },
    #[error("step {step} depends on itself or a later step ({dep})")]
    ForwardDependency { step: u32, dep: u32 },
    #[error("parallel group references missing step {0}")]
    DanglingGroupMember(u32),
    #[error("parallel group member {member} depends on group member {dep}")]
    IntraGroupDependency { member: u32, dep: u32 },
    #[error("parallel group members {a} and {b} have different dependency closures")]
    GroupClosureMismatch { a: u32, b: u32 },
    #[error("human gate references missing step {0}")]
    DanglingGateReference(u32),
    #[error("no catalog agent available for role {0}")]
    NoAgentForRole(AgentRole),
    #[error("plan has no steps after validation")]
    EmptyPlan,
}

impl ValidateError {
    /// Configuration errors (exit 2) versus plan-integrity errors.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NoAgentForRole(_))
    }
}

/// Validated plan plus the warnings produced while restoring coherence.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub plan: ValidatedPlan,
    pub warnings: Vec<String>,
}

/// Applies platform and project rules to raw planner output.
pub struct PlanValidator {
    agents: IndexMap<String, AgentDef>,
    catalog: Option<Vec<String>>,
    rules: Vec<PlanRule>,
}

impl PlanValidator {
    pub fn new(config: &FabConfig) -> Self {
        Self {
            agents: config
                .platform
                .agents
                .iter()
                .map(|a| (a.id.clone(), a.clone()))
                .collect(),
            catalog: config.project.agent_catalog.clone(),
            rules: config.rules().cloned().collect(),
        }
    }

    pub fn validate(
        &self,
        plan: ExecutionPlan,
        ticket: &TicketDetails,
    ) -> Result<ValidationOutcome, ValidateError> {
        let mut warnings = Vec::new();

        let ExecutionPlan {
            plan_id,
            ticket_id,
            classification,
            reasoning,
            mut steps,
            mut parallel_groups,
            mut human_gates,
            confidence,
        } = plan;
        steps.sort_by_key(|s| s.step_number);

        self.remap_agents(&mut steps, &mut parallel_groups, &mut human_gates, &mut warnings);
        if steps.is_empty() {
            return Err(ValidateError::EmptyPlan);
        }
        renumber(&mut steps, &mut parallel_groups, &mut human_gates);

        let matched: Vec<&RuleAction> = self
            .rules
            .iter()
            .filter(|rule| condition_matches(&rule.condition, &classification, ticket))
            .map(|rule| &rule.action)
            .collect();

        let mut injected = BTreeSet::new();
        for action in &matched {
            match action {
                RuleAction::RequireAgent { agent } => {
                    if !steps.iter().any(|s| &s.agent == agent) {
                        if let Some(def) = self.agents.get(agent).cloned() {
                            let number = self.inject_step(&mut steps, &def, &mut warnings);
                            injected.insert(number);
                        } else {
                            warnings.push(format!(
                                "require_agent rule names unknown agent {agent:?}, skipping"
                            ));
                        }
                    }
                }
                RuleAction::RequireRole { role } => {
                    if !steps.iter().any(|s| self.role_of(&s.agent) == Some(*role)) {
                        let def = self
                            .agent_for_role(*role)
                            .cloned()
                            .ok_or(ValidateError::NoAgentForRole(*role))?;
                        let number = self.inject_step(&mut steps, &def, &mut warnings);
                        injected.insert(number);
                    }
                }
                _ => {}
            }
        }
        if !injected.is_empty() {
            let injected_after = renumber(&mut steps, &mut parallel_groups, &mut human_gates)
                .into_iter()
                .filter(|(old, _)| injected.contains(old))
                .map(|(_, new)| new)
                .collect::<BTreeSet<_>>();
            chain_injected_deps(&mut steps, &injected_after);
        }

        let mut model_overrides = BTreeMap::new();
        let mut max_cost_override_usd = None;
        let mut max_tokens_override = None;
        for action in &matched {
            match action {
                RuleAction::RequireHumanGate { agent, summary, required } => {
                    match self.gate_anchor(&steps, agent) {
                        Some(after_step) => human_gates.push(HumanGate {
                            after_step,
                            summary: summary
                                .clone()
                                .unwrap_or_else(|| format!("review output of {agent}")),
                            artifacts_to_review: Vec::new(),
                            required: *required,
                        }),
                        None => warnings.push(format!(
                            "gate rule for {agent:?} matched no step, skipping"
                        )),
                    }
                }
                RuleAction::SetModel { agent, model } => {
                    model_overrides.insert(agent.clone(), model.clone());
                }
                RuleAction::SetBudget { per_task_max_cost_usd, max_total_tokens } => {
                    if per_task_max_cost_usd.is_some() {
                        max_cost_override_usd = *per_task_max_cost_usd;
                    }
                    if max_total_tokens.is_some() {
                        max_tokens_override = *max_total_tokens;
                    }
                }
                _ => {}
            }
        }

        let validated = ValidatedPlan {
            plan_id,
            ticket_id,
            classification,
            reasoning,
            steps,
            parallel_groups,
            human_gates,
            confidence,
            model_overrides,
            max_cost_override_usd,
            max_tokens_override,
        };
        check_integrity(&validated)?;

        for warning in &warnings {
            tracing::warn!(plan_id = %validated.plan_id, "{warning}");
        }
        Ok(ValidationOutcome { plan: validated, warnings })
    }

    /// Remap unknown agent ids; drop steps that can't be resolved.
    fn remap_agents(
        &self,
        steps: &mut Vec<PlanStep>,
        parallel_groups: &mut Vec<Vec<u32>>,
        human_gates: &mut Vec<HumanGate>,
        warnings: &mut Vec<String>,
    ) {
        let mut dropped = BTreeSet::new();
        steps.retain_mut(|step| match self.resolve_agent_id(&step.agent) {
            Some(id) => {
                if id != step.agent {
                    warnings.push(format!(
                        "remapped unknown agent {:?} to {id:?} in step {}",
                        step.agent, step.step_number
                    ));
                    step.agent = id;
                }
                true
            }
            None => {
                warnings.push(format!(
                    "dropped step {} with unknown agent {:?}",
                    step.step_number, step.agent
                ));
                dropped.insert(step.step_number);
                false
            }
        });
        if dropped.is_empty() {
            return;
        }
        for step in steps.iter_mut() {
            let before = step.depends_on.len();
            step.depends_on.retain(|dep| !dropped.contains(dep));
            if step.depends_on.len() != before {
                warnings.push(format!(
                    "step {} lost dependencies on dropped steps",
                    step.step_number
                ));
            }
        }
        for group in parallel_groups.iter_mut() {
            group.retain(|member| !dropped.contains(member));
        }
        parallel_groups.retain(|group| group.len() > 1);
        human_gates.retain(|gate| {
            let keep = !dropped.contains(&gate.after_step);
            if !keep {
                warnings.push(format!(
                    "dropped gate referencing removed step {}",
                    gate.after_step
                ));
            }
            keep
        });
    }

    /// Hallucination guard: prefix-strip on `-` boundaries, then role
    /// substring constrained to the project catalog.
    fn resolve_agent_id(&self, raw: &str) -> Option<String> {
        if self.agents.contains_key(raw) {
            return Some(raw.to_string());
        }
        let mut rest = raw;
        while let Some(idx) = rest.find('-') {
            rest = &rest[idx + 1..];
            if self.agents.contains_key(rest) {
                return Some(rest.to_string());
            }
        }
        for agent in self.agents.values() {
            if raw.contains(&agent.role.to_string()) && self.in_catalog(&agent.id) {
                return Some(agent.id.clone());
            }
        }
        None
    }

    fn in_catalog(&self, id: &str) -> bool {
        self.catalog.as_ref().map_or(true, |c| c.iter().any(|a| a == id))
    }

    fn role_of(&self, agent_id: &str) -> Option<AgentRole> {
        self.agents.get(agent_id).map(|a| a.role)
    }

    fn agent_for_role(&self, role: AgentRole) -> Option<&AgentDef> {
        self.agents.values().find(|a| a.role == role && self.in_catalog(&a.id))
    }

    /// Insert a required step after the last step whose role precedes the
    /// new step's role in the canonical ordering; append when no such
    /// predecessor exists. The number is `max + 1` until the renumber pass.
    fn inject_step(
        &self,
        steps: &mut Vec<PlanStep>,
        agent: &AgentDef,
        warnings: &mut Vec<String>,
    ) -> u32 {
        let position = match steps
            .iter()
            .rposition(|s| self.role_of(&s.agent).is_some_and(|r| r < agent.role))
        {
            Some(idx) => idx + 1,
            None => steps.len(),
        };
        let number = steps.iter().map(|s| s.step_number).max().unwrap_or(0) + 1;
        let task = if agent.description.is_empty() {
            format!("Perform the mandatory {} pass for this ticket.", agent.role)
        } else {
            agent.description.clone()
        };
        steps.insert(
            position,
            PlanStep {
                step_number: number,
                agent: agent.id.clone(),
                model: agent.default_model.clone(),
                task,
                context_inputs: vec![ContextInput::Ticket],
                depends_on: Vec::new(),
                complexity: Default::default(),
            },
        );
        warnings.push(format!("injected required step for agent {:?}", agent.id));
        number
    }

    /// Last step of the named agent, falling back to the last step whose
    /// role matches the named agent's role.
    fn gate_anchor(&self, steps: &[PlanStep], agent_id: &str) -> Option<u32> {
        if let Some(step) = steps.iter().rev().find(|s| s.agent == agent_id) {
            return Some(step.step_number);
        }
        let role = self.role_of(agent_id)?;
        steps
            .iter()
            .rev()
            .find(|s| self.role_of(&s.agent) == Some(role))
            .map(|s| s.step_number)
    }
}

/// Renumber steps contiguously from 1 in list order, remapping dependency
/// edges, group members, and gate anchors. Returns the old→new mapping.
fn renumber(
    steps: &mut [PlanStep],
    parallel_groups: &mut [Vec<u32>],
    human_gates: &mut [HumanGate],
) -> BTreeMap<u32, u32> {
    let mapping: BTreeMap<u32, u32> = steps
        .iter()
        .enumerate()
        .map(|(idx, step)| (step.step_number, idx as u32 + 1))
        .collect();
    for step in steps.iter_mut() {
        if let Some(new) = mapping.get(&step.step_number) {
            step.step_number = *new;
        }
        for dep in step.depends_on.iter_mut() {
            if let Some(new) = mapping.get(dep) {
                *dep = *new;
            }
        }
        step.depends_on.sort_unstable();
        step.depends_on.dedup();
    }
    for group in parallel_groups.iter_mut() {
        for member in group.iter_mut() {
            if let Some(new) = mapping.get(member) {
                *member = *new;
            }
        }
    }
    for gate in human_gates.iter_mut() {
        if let Some(new) = mapping.get(&gate.after_step) {
            gate.after_step = *new;
        }
    }
    mapping
}

/// Injected steps depend on their positional predecessor so they slot into
/// the sequential order without reordering anything else.
fn chain_injected_deps(steps: &mut [PlanStep], injected: &BTreeSet<u32>) {
    for idx in 0..steps.len() {
        if injected.contains(&steps[idx].step_number) && idx > 0 {
            let predecessor = steps[idx - 1].step_number;
            steps[idx].depends_on = vec![predecessor];
        }
    }
}

fn condition_matches(
    condition: &RuleCondition,
    classification: &str,
    ticket: &TicketDetails,
) -> bool {
    match condition {
        RuleCondition::Always => true,
        RuleCondition::ClassificationIs { value } => classification == value,
        RuleCondition::LabelContains { value } => ticket.labels.iter().any(|l| l == value),
        RuleCondition::FilePathMatches { glob } => {
            ticket.touched_paths.iter().any(|p| glob_match(glob, p))
        }
        RuleCondition::PriorityIs { value } => ticket.priority.as_deref() == Some(value),
    }
}

/// Fail-hard structural checks over the final plan.
fn check_integrity(plan: &ValidatedPlan) -> Result<(), ValidateError> {
    let mut numbers = BTreeSet::new();
    for step in &plan.steps {
        if !numbers.insert(step.step_number) {
            return Err(ValidateError::DuplicateStepNumber(step.step_number));
        }
    }
    for step in &plan.steps {
        for dep in &step.depends_on {
            if !numbers.contains(dep) {
                return Err(ValidateError::DanglingDependency {
                    step: step.step_number,
                    dep: *dep,
                });
            }
            // Numeric order is execution order, so a forward (or self)
            // dependency is a cycle.
            if *dep >= step.step_number {
                return Err(ValidateError::ForwardDependency {
                    step: step.step_number,
                    dep: *dep,
                });
            }
        }
    }
    for group in &plan.parallel_groups {
        for member in group {
            if !numbers.contains(member) {
                return Err(ValidateError::DanglingGroupMember(*member));
            }
        }
        let closures: Vec<(u32, BTreeSet<u32>)> =
            group.iter().map(|m| (*m, plan.depends_closure(*m))).collect();
        for (member, closure) in &closures {
            for other in group {
                if other != member && closure.contains(other) {
                    return Err(ValidateError::IntraGroupDependency {
                        member: *member,
                        dep: *other,
                    });
                }
            }
        }
        for pair in closures.windows(2) {
            if pair[0].1 != pair[1].1 {
                return Err(ValidateError::GroupClosureMismatch { a: pair[0].0, b: pair[1].0 });
            }
        }
    }
    for gate in &plan.human_gates {
        if !numbers.contains(&gate.after_step) {
            return Err(ValidateError::DanglingGateReference(gate.after_step));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
