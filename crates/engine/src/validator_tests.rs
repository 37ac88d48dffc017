// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::test_helpers::{plan, step, test_config, ticket};
use crate::validator::{PlanValidator, ValidateError};
use fab_core::config::{AgentRole, PlanRule, RuleAction, RuleCondition};
use fab_core::{HumanGate, TicketDetails};

fn validator_with(rules: Vec<PlanRule>) -> PlanValidator {
    let dir = std::env::temp_dir();
    let mut config = test_config(&dir);
    config.project.rules = rules;
    PlanValidator::new(&config)
}

fn validator() -> PlanValidator {
    validator_with(vec![])
}

// ============================================================================
// agent-id remapping
// ============================================================================

#[test]
fn known_agents_pass_through() {
    let outcome = validator()
        .validate(plan(vec![step(1, "product", &[]), step(2, "developer", &[1])]), &ticket())
        .unwrap();
    let agents: Vec<_> = outcome.plan.steps.iter().map(|s| s.agent.as_str()).collect();
    assert_eq!(agents, vec!["product", "developer"]);
    assert!(outcome.warnings.is_empty());
}

#[test]
fn prefixed_agent_id_is_remapped_by_suffix() {
    let outcome =
        validator().validate(plan(vec![step(1, "js-developer", &[])]), &ticket()).unwrap();
    assert_eq!(outcome.plan.steps[0].agent, "developer");
    assert_eq!(outcome.warnings.len(), 1);
}

#[test]
fn role_substring_remaps_when_suffix_fails() {
    let outcome =
        validator().validate(plan(vec![step(1, "senior_qa_engineer", &[])]), &ticket()).unwrap();
    assert_eq!(outcome.plan.steps[0].agent, "qa");
}

#[test]
fn unknown_agent_drops_step_and_renumbers() {
    let outcome = validator()
        .validate(
            plan(vec![
                step(1, "product", &[]),
                step(2, "nonsense", &[1]),
                step(3, "qa", &[2]),
            ]),
            &ticket(),
        )
        .unwrap();
    let numbers: Vec<_> = outcome.plan.steps.iter().map(|s| s.step_number).collect();
    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(outcome.plan.steps[1].agent, "qa");
    // The dangling dependency on the dropped step is removed too.
    assert!(outcome.plan.steps[1].depends_on.is_empty());
    assert!(outcome.warnings.iter().any(|w| w.contains("nonsense")));
}

#[test]
fn all_steps_unknown_is_an_empty_plan() {
    let result = validator().validate(plan(vec![step(1, "gibberish", &[])]), &ticket());
    assert_eq!(result.err(), Some(ValidateError::EmptyPlan));
}

#[test]
fn catalog_constrains_role_substring_remap() {
    let dir = std::env::temp_dir();
    let mut config = test_config(&dir);
    config.project.agent_catalog = Some(vec!["product".to_string(), "developer".to_string()]);
    let validator = PlanValidator::new(&config);
    // "qa" is known but outside the catalog, so the substring rule skips it
    // and the step is dropped.
    let result = validator.validate(plan(vec![step(1, "some qa person", &[])]), &ticket());
    assert_eq!(result.err(), Some(ValidateError::EmptyPlan));
}

// ============================================================================
// rule evaluation and injection
// ============================================================================

#[test]
fn require_agent_injects_once() {
    let rules = vec![PlanRule {
        condition: RuleCondition::Always,
        action: RuleAction::RequireAgent { agent: "security".to_string() },
    }];
    let outcome = validator_with(rules.clone())
        .validate(
            plan(vec![step(1, "product", &[]), step(2, "developer", &[1]), step(3, "qa", &[2])]),
            &ticket(),
        )
        .unwrap();
    // security sorts after qa in the canonical ordering.
    let agents: Vec<_> = outcome.plan.steps.iter().map(|s| s.agent.as_str()).collect();
    assert_eq!(agents, vec!["product", "developer", "qa", "security"]);
    let numbers: Vec<_> = outcome.plan.steps.iter().map(|s| s.step_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert_eq!(outcome.plan.steps[3].depends_on, vec![3]);

    // A plan that already has the agent is untouched.
    let outcome = validator_with(rules)
        .validate(
            plan(vec![step(1, "security", &[]), step(2, "developer", &[1])]),
            &ticket(),
        )
        .unwrap();
    assert_eq!(outcome.plan.steps.len(), 2);
}

#[test]
fn injection_lands_after_last_preceding_role() {
    let rules = vec![PlanRule {
        condition: RuleCondition::Always,
        action: RuleAction::RequireRole { role: AgentRole::CodeReview },
    }];
    let outcome = validator_with(rules)
        .validate(
            plan(vec![step(1, "product", &[]), step(2, "developer", &[1]), step(3, "qa", &[2])]),
            &ticket(),
        )
        .unwrap();
    // code-review precedes qa, so it slots between developer and qa.
    let agents: Vec<_> = outcome.plan.steps.iter().map(|s| s.agent.as_str()).collect();
    assert_eq!(agents, vec!["product", "developer", "code-review", "qa"]);
    // Numbers stay contiguous and the displaced qa step keeps its edge to
    // the developer step.
    let numbers: Vec<_> = outcome.plan.steps.iter().map(|s| s.step_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert_eq!(outcome.plan.steps[3].depends_on, vec![2]);
}

#[test]
fn require_role_without_catalog_candidate_is_configuration_error() {
    let dir = std::env::temp_dir();
    let mut config = test_config(&dir);
    config.project.agent_catalog = Some(vec!["product".to_string(), "developer".to_string()]);
    config.project.rules = vec![PlanRule {
        condition: RuleCondition::Always,
        action: RuleAction::RequireRole { role: AgentRole::Security },
    }];
    let validator = PlanValidator::new(&config);
    let result = validator.validate(plan(vec![step(1, "developer", &[])]), &ticket());
    let err = result.err();
    assert_eq!(err, Some(ValidateError::NoAgentForRole(AgentRole::Security)));
    assert!(err.is_some_and(|e| e.is_configuration()));
}

#[test]
fn conditions_gate_rule_application() {
    let rules = vec![
        PlanRule {
            condition: RuleCondition::LabelContains { value: "security".to_string() },
            action: RuleAction::RequireAgent { agent: "security".to_string() },
        },
        PlanRule {
            condition: RuleCondition::FilePathMatches { glob: "src/auth/**".to_string() },
            action: RuleAction::RequireAgent { agent: "code-review".to_string() },
        },
        PlanRule {
            condition: RuleCondition::PriorityIs { value: "critical".to_string() },
            action: RuleAction::RequireAgent { agent: "architect".to_string() },
        },
    ];

    let plain = validator_with(rules.clone())
        .validate(plan(vec![step(1, "developer", &[])]), &ticket())
        .unwrap();
    assert_eq!(plain.plan.steps.len(), 1);

    let matching_ticket = TicketDetails {
        labels: vec!["security".to_string()],
        priority: Some("critical".to_string()),
        touched_paths: vec!["src/auth/login.rs".to_string()],
        ..ticket()
    };
    let enriched = validator_with(rules)
        .validate(plan(vec![step(1, "developer", &[])]), &matching_ticket)
        .unwrap();
    let agents: Vec<_> = enriched.plan.steps.iter().map(|s| s.agent.as_str()).collect();
    // architect has no preceding role in the plan, so it appends.
    assert_eq!(agents, vec!["developer", "code-review", "security", "architect"]);
}

#[test]
fn classification_condition_reads_the_plan() {
    let rules = vec![PlanRule {
        condition: RuleCondition::ClassificationIs { value: "feature".to_string() },
        action: RuleAction::RequireAgent { agent: "qa".to_string() },
    }];
    let outcome = validator_with(rules)
        .validate(plan(vec![step(1, "developer", &[])]), &ticket())
        .unwrap();
    assert!(outcome.plan.steps.iter().any(|s| s.agent == "qa"));
}

#[test]
fn require_human_gate_attaches_after_last_agent_step() {
    let rules = vec![PlanRule {
        condition: RuleCondition::Always,
        action: RuleAction::RequireHumanGate {
            agent: "developer".to_string(),
            summary: Some("check the diff".to_string()),
            required: true,
        },
    }];
    let outcome = validator_with(rules)
        .validate(
            plan(vec![
                step(1, "developer", &[]),
                step(2, "developer", &[1]),
                step(3, "qa", &[2]),
            ]),
            &ticket(),
        )
        .unwrap();
    assert_eq!(outcome.plan.human_gates.len(), 1);
    assert_eq!(outcome.plan.human_gates[0].after_step, 2);
    assert_eq!(outcome.plan.human_gates[0].summary, "check the diff");
}

#[test]
fn set_model_and_budget_are_recorded_not_baked() {
    let rules = vec![
        PlanRule {
            condition: RuleCondition::Always,
            action: RuleAction::SetModel {
                agent: "developer".to_string(),
                model: "opus".to_string(),
            },
        },
        PlanRule {
            condition: RuleCondition::Always,
            action: RuleAction::SetBudget {
                per_task_max_cost_usd: Some(2.5),
                max_total_tokens: Some(50_000),
            },
        },
    ];
    let outcome = validator_with(rules)
        .validate(plan(vec![step(1, "developer", &[])]), &ticket())
        .unwrap();
    assert_eq!(outcome.plan.model_overrides.get("developer").map(String::as_str), Some("opus"));
    assert_eq!(outcome.plan.max_cost_override_usd, Some(2.5));
    assert_eq!(outcome.plan.max_tokens_override, Some(50_000));
    // The step itself keeps its planner-assigned model (none).
    assert_eq!(outcome.plan.steps[0].model, None);
}

// ============================================================================
// integrity checks
// ============================================================================

#[test]
fn forward_dependency_is_rejected() {
    let result =
        validator().validate(plan(vec![step(1, "product", &[2]), step(2, "qa", &[1])]), &ticket());
    assert_eq!(result.err(), Some(ValidateError::ForwardDependency { step: 1, dep: 2 }));
}

#[test]
fn self_dependency_is_rejected() {
    let result = validator().validate(plan(vec![step(1, "product", &[1])]), &ticket());
    assert_eq!(result.err(), Some(ValidateError::ForwardDependency { step: 1, dep: 1 }));
}

#[test]
fn group_member_depending_on_sibling_is_rejected() {
    let mut raw = plan(vec![
        step(1, "product", &[]),
        step(2, "developer", &[1]),
        step(3, "qa", &[1, 2]),
    ]);
    raw.parallel_groups = vec![vec![2, 3]];
    let result = validator().validate(raw, &ticket());
    assert_eq!(result.err(), Some(ValidateError::IntraGroupDependency { member: 3, dep: 2 }));
}

#[test]
fn group_members_must_share_dependency_closure() {
    let mut raw = plan(vec![
        step(1, "product", &[]),
        step(2, "architect", &[1]),
        step(3, "developer", &[1]),
        step(4, "qa", &[2]),
    ]);
    raw.parallel_groups = vec![vec![3, 4]];
    let result = validator().validate(raw, &ticket());
    assert!(matches!(result.err(), Some(ValidateError::GroupClosureMismatch { .. })));
}

#[test]
fn dangling_group_member_is_rejected() {
    let mut raw = plan(vec![step(1, "product", &[])]);
    raw.parallel_groups = vec![vec![1, 9]];
    let result = validator().validate(raw, &ticket());
    assert_eq!(result.err(), Some(ValidateError::DanglingGroupMember(9)));
}

#[test]
fn dangling_gate_is_rejected() {
    let mut raw = plan(vec![step(1, "product", &[])]);
    raw.human_gates = vec![HumanGate {
        after_step: 7,
        summary: String::new(),
        artifacts_to_review: vec![],
        required: true,
    }];
    let result = validator().validate(raw, &ticket());
    assert_eq!(result.err(), Some(ValidateError::DanglingGateReference(7)));
}

#[test]
fn planner_gates_survive_renumbering() {
    let mut raw = plan(vec![
        step(1, "product", &[]),
        step(5, "nonsense", &[]),
        step(9, "developer", &[1]),
    ]);
    raw.human_gates = vec![HumanGate {
        after_step: 9,
        summary: "review".to_string(),
        artifacts_to_review: vec![],
        required: true,
    }];
    let outcome = validator().validate(raw, &ticket()).unwrap();
    assert_eq!(outcome.plan.steps.len(), 2);
    assert_eq!(outcome.plan.human_gates[0].after_step, 2);
}
