// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI surface: help, config validation, exit codes.

use assert_cmd::Command;

const GOOD_CONFIG: &str = r#"
[[platform.agents]]
id = "developer"
role = "developer"

[project]
id = "demo"

[runtime]
kind = "claude"
command = "claude"
"#;

#[test]
fn help_lists_subcommands() {
    let output = Command::cargo_bin("fab").unwrap().arg("--help").assert().success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
    for subcommand in ["run", "validate", "replay"] {
        assert!(stdout.contains(subcommand), "help missing {subcommand}");
    }
}

#[test]
fn validate_accepts_a_good_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("fab.toml");
    std::fs::write(&config, GOOD_CONFIG).unwrap();

    let assert = Command::cargo_bin("fab")
        .unwrap()
        .args(["validate", "--config"])
        .arg(&config)
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.contains("config ok"), "unexpected stdout: {stdout}");
}

#[test]
fn validate_rejects_missing_config_with_exit_two() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("fab")
        .unwrap()
        .args(["validate", "--config"])
        .arg(dir.path().join("absent.toml"))
        .assert()
        .code(2);
}

#[test]
fn validate_rejects_incoherent_config_with_exit_two() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("fab.toml");
    // Rule references an agent the platform doesn't define.
    std::fs::write(
        &config,
        format!(
            "{GOOD_CONFIG}
[[project.rules]]
condition = {{ when = \"always\" }}
action = {{ do = \"require_agent\", agent = \"ghost\" }}
"
        ),
    )
    .unwrap();

    Command::cargo_bin("fab")
        .unwrap()
        .args(["validate", "--config"])
        .arg(&config)
        .assert()
        .code(2);
}

#[test]
fn replay_rejects_empty_log_with_exit_two() {
    let dir = tempfile::tempdir().unwrap();
    let events = dir.path().join(".events.jsonl");
    std::fs::write(&events, "").unwrap();

    Command::cargo_bin("fab").unwrap().arg("replay").arg(&events).assert().code(2);
}
