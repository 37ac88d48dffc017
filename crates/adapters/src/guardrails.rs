// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Guardrail policy for SDK-mode runtimes.
//!
//! A sealed CLI child enforces its own sandbox; in SDK mode the orchestrator
//! is the enforcement point. Command patterns in `deny_commands` block
//! execution; file writes must match `allow_paths` (when non-empty) and must
//! not match `deny_paths`. Patterns with glob metacharacters match as globs,
//! plain patterns match as substrings.

use fab_core::config::RuntimeConfig;
use fab_core::glob_match;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("guardrail_denied: {0}")]
pub struct GuardrailViolation(pub String);

#[derive(Debug, Clone, Default)]
pub struct GuardrailPolicy {
    enabled: bool,
    deny_commands: Vec<String>,
    allow_paths: Vec<String>,
    deny_paths: Vec<String>,
}

impl GuardrailPolicy {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            enabled: config.sdk_mode,
            deny_commands: config.deny_commands.clone(),
            allow_paths: config.allow_paths.clone(),
            deny_paths: config.deny_paths.clone(),
        }
    }

    /// Policy that never denies (sealed-CLI mode).
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn check_command(&self, command_line: &str) -> Result<(), GuardrailViolation> {
        if !self.enabled {
            return Ok(());
        }
        for pattern in &self.deny_commands {
            if pattern_hits(pattern, command_line) {
                return Err(GuardrailViolation(format!(
                    "command matches deny pattern {pattern:?}"
                )));
            }
        }
        Ok(())
    }

    pub fn check_write(&self, path: &str) -> Result<(), GuardrailViolation> {
        if !self.enabled {
            return Ok(());
        }
        for pattern in &self.deny_paths {
            if glob_match(pattern, path) {
                return Err(GuardrailViolation(format!(
                    "write to {path:?} matches deny path {pattern:?}"
                )));
            }
        }
        if !self.allow_paths.is_empty()
            && !self.allow_paths.iter().any(|pattern| glob_match(pattern, path))
        {
            return Err(GuardrailViolation(format!(
                "write to {path:?} outside allowed paths"
            )));
        }
        Ok(())
    }
}

fn pattern_hits(pattern: &str, command_line: &str) -> bool {
    if pattern.contains(['*', '?']) {
        glob_match(pattern, command_line)
    } else {
        command_line.contains(pattern)
    }
}

#[cfg(test)]
#[path = "guardrails_tests.rs"]
mod tests;
