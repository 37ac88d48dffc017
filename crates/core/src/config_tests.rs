// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::config::{AgentRole, ConfigError, FabConfig, RuleAction, RuleCondition, RuntimeKind};

const MINIMAL: &str = r#"
[[platform.agents]]
id = "product"
role = "product"

[[platform.agents]]
id = "developer"
role = "developer"
default_model = "opus"

[[platform.agents]]
id = "qa"
role = "qa"

[project]
id = "demo"

[runtime]
kind = "claude"
command = "claude"
"#;

#[test]
fn minimal_config_parses() {
    let config = FabConfig::from_toml_str(MINIMAL).unwrap();
    assert_eq!(config.project.id, "demo");
    assert_eq!(config.runtime.kind, RuntimeKind::Claude);
    assert_eq!(config.agent("developer").unwrap().role, AgentRole::Developer);
    assert_eq!(config.agent("developer").unwrap().default_model.as_deref(), Some("opus"));
    assert_eq!(config.project.limits.max_rework_cycles, 3);
    assert_eq!(config.project.budget.warn_threshold_pct, 80);
}

#[test]
fn rules_parse_and_concatenate_platform_first() {
    let toml = format!(
        "{MINIMAL}
[[platform.rules]]
condition = {{ when = \"always\" }}
action = {{ do = \"require_agent\", agent = \"qa\" }}

[[project.rules]]
condition = {{ when = \"label_contains\", value = \"security\" }}
action = {{ do = \"require_role\", role = \"security\" }}
"
    );
    let config = FabConfig::from_toml_str(&toml).unwrap();
    let rules: Vec<_> = config.rules().collect();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].condition, RuleCondition::Always);
    assert!(matches!(rules[0].action, RuleAction::RequireAgent { ref agent } if agent == "qa"));
    assert!(matches!(rules[1].action, RuleAction::RequireRole { role: AgentRole::Security }));
}

#[test]
fn empty_agent_catalog_is_rejected() {
    let toml = r#"
[project]
id = "demo"

[runtime]
kind = "claude"
command = "claude"
"#;
    assert!(matches!(FabConfig::from_toml_str(toml), Err(ConfigError::NoAgents)));
}

#[test]
fn duplicate_agent_ids_are_rejected() {
    let toml = r#"
[[platform.agents]]
id = "developer"
role = "developer"

[[platform.agents]]
id = "developer"
role = "qa"

[project]
id = "demo"

[runtime]
kind = "codex"
command = "codex"
"#;
    assert!(matches!(FabConfig::from_toml_str(toml), Err(ConfigError::DuplicateAgent(_))));
}

#[test]
fn project_catalog_must_reference_known_agents() {
    let toml = MINIMAL.replace(
        "[project]\nid = \"demo\"",
        "[project]\nid = \"demo\"\nagent_catalog = [\"developer\", \"ghost\"]",
    );
    assert!(matches!(
        FabConfig::from_toml_str(&toml),
        Err(ConfigError::UnknownCatalogAgent(ref id)) if id == "ghost"
    ));
}

#[test]
fn rule_referencing_unknown_agent_is_rejected() {
    let toml = format!(
        "{MINIMAL}
[[project.rules]]
condition = {{ when = \"always\" }}
action = {{ do = \"set_model\", agent = \"ghost\", model = \"opus\" }}
"
    );
    assert!(matches!(
        FabConfig::from_toml_str(&toml),
        Err(ConfigError::UnknownRuleAgent(ref id)) if id == "ghost"
    ));
}

#[test]
fn role_ordering_is_canonical() {
    use AgentRole::*;
    let mut roles = vec![Devops, Developer, Product, Qa, Architect, Security, CodeReview, UiUx];
    roles.sort();
    assert_eq!(
        roles,
        vec![Product, Architect, UiUx, Developer, CodeReview, Qa, Security, Devops]
    );
}

#[test]
fn gate_poll_is_clamped_to_two_seconds() {
    let mut config = FabConfig::from_toml_str(MINIMAL).unwrap();
    config.project.limits.gate_poll_ms = 30_000;
    assert_eq!(config.project.limits.gate_poll(), std::time::Duration::from_secs(2));
}
