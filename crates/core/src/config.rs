// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed configuration: agent catalog, plan rules, budgets, runtimes.
//!
//! The CLI loads one toml file into [`FabConfig`]; the orchestrator and the
//! validator receive the typed structs and never touch the file again.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Canonical role ordering used for step-insertion points:
/// product → architect → ui-ux → developer → code-review → qa → security → devops.
///
/// `Ord` derives this ordering from variant order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum AgentRole {
    Product,
    Architect,
    UiUx,
    Developer,
    CodeReview,
    Qa,
    Security,
    Devops,
}

crate::simple_display! {
    AgentRole {
        Product => "product",
        Architect => "architect",
        UiUx => "ui-ux",
        Developer => "developer",
        CodeReview => "code-review",
        Qa => "qa",
        Security => "security",
        Devops => "devops",
    }
}

/// One agent definition from the platform catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDef {
    pub id: String,
    pub role: AgentRole,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// Condition half of a plan rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum RuleCondition {
    Always,
    ClassificationIs { value: String },
    LabelContains { value: String },
    FilePathMatches { glob: String },
    PriorityIs { value: String },
}

/// Action half of a plan rule.
///
/// `SetModel` and `SetBudget` are recorded on the validated plan for
/// execution time; they never alter the step list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "do", rename_all = "snake_case")]
pub enum RuleAction {
    RequireAgent {
        agent: String,
    },
    RequireRole {
        role: AgentRole,
    },
    RequireHumanGate {
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        #[serde(default = "default_true")]
        required: bool,
    },
    SetModel {
        agent: String,
        model: String,
    },
    SetBudget {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        per_task_max_cost_usd: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_total_tokens: Option<u64>,
    },
}

fn default_true() -> bool {
    true
}

/// One platform or project rule applied during plan validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRule {
    pub condition: RuleCondition,
    pub action: RuleAction,
}

/// Token and cost caps for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_task_max_cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens_per_agent: Option<u64>,
    /// Percentage of a cap at which a warning event fires, 0 disables.
    #[serde(default = "default_warn_pct")]
    pub warn_threshold_pct: u8,
}

fn default_warn_pct() -> u8 {
    80
}

/// Timeouts, rework bounds, and gate polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_ms: Option<u64>,
    #[serde(default = "default_max_rework")]
    pub max_rework_cycles: u32,
    /// Human-gate decision poll interval; clamped to at most 2 s.
    #[serde(default = "default_gate_poll_ms")]
    pub gate_poll_ms: u64,
    /// After this wait, a non-required gate may auto-approve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_auto_approve_after_ms: Option<u64>,
    /// Planner confidence required for auto-approval.
    #[serde(default = "default_confidence")]
    pub gate_confidence_threshold: f64,
}

fn default_step_timeout_ms() -> u64 {
    30 * 60 * 1000
}

fn default_max_rework() -> u32 {
    3
}

fn default_gate_poll_ms() -> u64 {
    2_000
}

fn default_confidence() -> f64 {
    1.0
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: default_step_timeout_ms(),
            run_timeout_ms: None,
            max_rework_cycles: default_max_rework(),
            gate_poll_ms: default_gate_poll_ms(),
            gate_auto_approve_after_ms: None,
            gate_confidence_threshold: default_confidence(),
        }
    }
}

impl LimitsConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn gate_poll(&self) -> Duration {
        Duration::from_millis(self.gate_poll_ms.min(2_000))
    }
}

/// Which runtime variant executes agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Claude,
    Codex,
}

crate::simple_display! {
    RuntimeKind {
        Claude => "claude",
        Codex => "codex",
    }
}

/// Runtime subprocess configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub kind: RuntimeKind,
    /// Executable invoked per step and per planner call.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Plugin/skill paths exposed to the runtime.
    #[serde(default)]
    pub plugin_paths: Vec<PathBuf>,
    /// In-process SDK mode; enables guardrail enforcement.
    #[serde(default)]
    pub sdk_mode: bool,
    #[serde(default)]
    pub deny_commands: Vec<String>,
    #[serde(default)]
    pub allow_paths: Vec<String>,
    #[serde(default)]
    pub deny_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner_model: Option<String>,
}

/// Platform-wide configuration shared by every project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub agents: Vec<AgentDef>,
    #[serde(default)]
    pub rules: Vec<PlanRule>,
    /// Directory for the global events log; absent disables it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_dir: Option<PathBuf>,
    /// Base directory for run workspaces: `<base>/<project>/<run>`.
    #[serde(default = "default_workspace_base")]
    pub workspace_base: PathBuf,
}

fn default_workspace_base() -> PathBuf {
    PathBuf::from(".fab/workspaces")
}

/// Per-project configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub id: String,
    #[serde(default)]
    pub rules: Vec<PlanRule>,
    /// Restricts which catalog agents this project may use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_catalog: Option<Vec<String>>,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("platform agent catalog is empty")]
    NoAgents,
    #[error("duplicate agent id {0:?}")]
    DuplicateAgent(String),
    #[error("project catalog references unknown agent {0:?}")]
    UnknownCatalogAgent(String),
    #[error("rule references unknown agent {0:?}")]
    UnknownRuleAgent(String),
}

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabConfig {
    #[serde(default)]
    pub platform: PlatformConfig,
    pub project: ProjectConfig,
    pub runtime: RuntimeConfig,
}

impl FabConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: FabConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Coherence checks that must pass before any run starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.platform.agents.is_empty() {
            return Err(ConfigError::NoAgents);
        }
        let mut seen = std::collections::BTreeSet::new();
        for agent in &self.platform.agents {
            if !seen.insert(agent.id.as_str()) {
                return Err(ConfigError::DuplicateAgent(agent.id.clone()));
            }
        }
        if let Some(catalog) = &self.project.agent_catalog {
            for id in catalog {
                if !seen.contains(id.as_str()) {
                    return Err(ConfigError::UnknownCatalogAgent(id.clone()));
                }
            }
        }
        for rule in self.platform.rules.iter().chain(self.project.rules.iter()) {
            let agent = match &rule.action {
                RuleAction::RequireAgent { agent } => Some(agent),
                RuleAction::RequireHumanGate { agent, .. } => Some(agent),
                RuleAction::SetModel { agent, .. } => Some(agent),
                _ => None,
            };
            if let Some(agent) = agent {
                if !seen.contains(agent.as_str()) {
                    return Err(ConfigError::UnknownRuleAgent(agent.clone()));
                }
            }
        }
        Ok(())
    }

    pub fn agent(&self, id: &str) -> Option<&AgentDef> {
        self.platform.agents.iter().find(|a| a.id == id)
    }

    /// Platform rules followed by project rules, in application order.
    pub fn rules(&self) -> impl Iterator<Item = &PlanRule> {
        self.platform.rules.iter().chain(self.project.rules.iter())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
