// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end run through the real binary with a stub runtime child.

use assert_cmd::Command;
use std::path::Path;

/// Stand-in for a runtime CLI: emits a plan when invoked as the planner,
/// a completed result when invoked as an agent.
const STUB_RUNTIME: &str = r#"#!/bin/sh
if [ "$FAB_STAGE" = "planner" ]; then
cat > .agent-plan.json <<'PLAN'
{
  "ticket_id": "tkt-1",
  "classification": "feature",
  "steps": [
    {"step_number": 1, "agent": "product", "task": "write the spec"},
    {"step_number": 2, "agent": "developer", "task": "build it", "depends_on": [1]},
    {"step_number": 3, "agent": "qa", "task": "verify it", "depends_on": [2]}
  ]
}
PLAN
else
cat > "${FAB_RESULT_PATH:-.agent-result.json}" <<RESULT
{"status": "complete", "summary": "step ${FAB_STEP_NUMBER} done"}
RESULT
fi
echo '{"type":"result","total_cost_usd":0.01,"usage":{"input_tokens":50,"output_tokens":10}}'
"#;

const TICKET: &str = r#"{
  "id": "tkt-1",
  "title": "Ship the widget",
  "body": "Make it so.",
  "labels": ["feature"]
}"#;

fn write_fixture(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let stub = dir.join("stub-runtime.sh");
    std::fs::write(&stub, STUB_RUNTIME).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let config = dir.join("fab.toml");
    std::fs::write(
        &config,
        format!(
            r#"
[platform]
workspace_base = "{base}"

[[platform.agents]]
id = "product"
role = "product"

[[platform.agents]]
id = "developer"
role = "developer"

[[platform.agents]]
id = "qa"
role = "qa"

[project]
id = "demo"

[runtime]
kind = "claude"
command = "{command}"
"#,
            base = dir.join("workspaces").display(),
            command = stub.display(),
        ),
    )
    .unwrap();

    let ticket = dir.join("ticket.json");
    std::fs::write(&ticket, TICKET).unwrap();
    (config, ticket)
}

fn event_types(events_path: &Path) -> Vec<String> {
    std::fs::read_to_string(events_path)
        .unwrap()
        .lines()
        .map(|line| {
            let row: serde_json::Value = serde_json::from_str(line).unwrap();
            row["event_type"].as_str().unwrap().to_string()
        })
        .collect()
}

#[test]
fn run_completes_and_writes_the_event_log() {
    let dir = tempfile::tempdir().unwrap();
    let (config, ticket) = write_fixture(dir.path());

    let assert = Command::cargo_bin("fab")
        .unwrap()
        .args(["run", "--config"])
        .arg(&config)
        .arg("--ticket")
        .arg(&ticket)
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let run: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(run["status"], "completed");
    assert_eq!(run["steps"].as_array().unwrap().len(), 3);
    // Exact counters from the stub's stream-json result line.
    assert_eq!(run["total_tokens_used"], 180);

    // The per-run log records a valid state-machine path.
    let workspace = dir
        .path()
        .join("workspaces/demo")
        .join(run["run_id"].as_str().unwrap());
    let types = event_types(&workspace.join(".events.jsonl"));
    let lifecycle: Vec<&str> = types
        .iter()
        .map(String::as_str)
        .filter(|t| !t.starts_with("agent."))
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            "task.created",
            "task.plan_generated",
            "task.plan_validated",
            "task.started",
            "step.started",
            "step.completed",
            "step.started",
            "step.completed",
            "step.started",
            "step.completed",
            "task.completed",
        ]
    );

    // Runtime artifacts landed under their stable names.
    assert!(workspace.join(".claude-runtime.step-1.attempt-1.stdout.log").is_file());
    assert!(workspace.join(".claude-runtime.step-1.attempt-1.debug.json").is_file());
    assert!(workspace.join(".claude-runtime.planner.attempt-1.stdout.log").is_file());

    // Replay reproduces the terminal state.
    let replay = Command::cargo_bin("fab")
        .unwrap()
        .arg("replay")
        .arg(workspace.join(".events.jsonl"))
        .assert()
        .success();
    let replayed: serde_json::Value =
        serde_json::from_str(&String::from_utf8_lossy(&replay.get_output().stdout)).unwrap();
    assert_eq!(replayed["status"], "completed");
    assert_eq!(replayed["total_tokens_used"], run["total_tokens_used"]);
}

#[test]
fn failing_agent_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let (config, ticket) = write_fixture(dir.path());
    // Overwrite the stub: agents report failure.
    let stub = dir.path().join("stub-runtime.sh");
    std::fs::write(
        &stub,
        STUB_RUNTIME.replace(r#""status": "complete""#, r#""status": "failed""#),
    )
    .unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    Command::cargo_bin("fab")
        .unwrap()
        .args(["run", "--config"])
        .arg(&config)
        .arg("--ticket")
        .arg(&ticket)
        .assert()
        .code(1);
}
