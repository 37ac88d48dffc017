// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::guardrails::GuardrailPolicy;
use fab_core::config::{RuntimeConfig, RuntimeKind};
use std::collections::BTreeMap;
use yare::parameterized;

fn policy(sdk_mode: bool) -> GuardrailPolicy {
    GuardrailPolicy::from_config(&RuntimeConfig {
        kind: RuntimeKind::Claude,
        command: "claude".to_string(),
        args: vec![],
        env: BTreeMap::new(),
        plugin_paths: vec![],
        sdk_mode,
        deny_commands: vec!["rm -rf".to_string(), "git push*--force*".to_string()],
        allow_paths: vec!["src/**".to_string(), "artifacts/**".to_string()],
        deny_paths: vec!["src/secrets/**".to_string()],
        planner_model: None,
    })
}

#[parameterized(
    substring_hit = { "sh -c rm -rf /tmp/x", false },
    glob_hit = { "git push origin main --force-with-lease", false },
    clean_command = { "cargo test --workspace", true },
    partial_is_fine = { "rm file.txt", true },
)]
fn command_deny_patterns(command_line: &str, ok: bool) {
    assert_eq!(policy(true).check_command(command_line).is_ok(), ok, "{command_line:?}");
}

#[parameterized(
    allowed_src = { "src/main.rs", true },
    allowed_artifact = { "artifacts/report.md", true },
    outside_allow = { "Cargo.toml", false },
    denied_subtree = { "src/secrets/key.pem", false },
)]
fn write_path_policy(path: &str, ok: bool) {
    assert_eq!(policy(true).check_write(path).is_ok(), ok, "{path:?}");
}

#[test]
fn sealed_cli_mode_never_denies() {
    let policy = policy(false);
    assert!(policy.check_command("rm -rf /").is_ok());
    assert!(policy.check_write("/etc/passwd").is_ok());
}

#[test]
fn empty_allow_list_permits_all_paths() {
    let policy = GuardrailPolicy::from_config(&RuntimeConfig {
        kind: RuntimeKind::Claude,
        command: "claude".to_string(),
        args: vec![],
        env: BTreeMap::new(),
        plugin_paths: vec![],
        sdk_mode: true,
        deny_commands: vec![],
        allow_paths: vec![],
        deny_paths: vec!["*.pem".to_string()],
        planner_model: None,
    });
    assert!(policy.check_write("anything/goes.rs").is_ok());
    assert!(policy.check_write("key.pem").is_err());
}
