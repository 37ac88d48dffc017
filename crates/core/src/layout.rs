// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stable workspace layout shared by the runner, the runtimes, and agents.

use crate::config::RuntimeKind;

/// Task description for the current step.
pub const TASK_FILE: &str = ".agent-task.md";

/// Structured result, one-shot per step.
pub const RESULT_FILE: &str = ".agent-result.json";

/// Plan emitted by the planner subprocess.
pub const PLAN_FILE: &str = ".agent-plan.json";

/// Staged context inputs.
pub const CONTEXT_DIR: &str = ".agent-context";

/// Agent-produced files.
pub const ARTIFACTS_DIR: &str = "artifacts";

/// `.<runtime>-runtime.step-<n>.attempt-<m>.stdout.log`
pub fn step_stdout_log(kind: RuntimeKind, step: u32, attempt: u32) -> String {
    format!(".{kind}-runtime.step-{step}.attempt-{attempt}.stdout.log")
}

pub fn step_stderr_log(kind: RuntimeKind, step: u32, attempt: u32) -> String {
    format!(".{kind}-runtime.step-{step}.attempt-{attempt}.stderr.log")
}

pub fn step_debug_json(kind: RuntimeKind, step: u32, attempt: u32) -> String {
    format!(".{kind}-runtime.step-{step}.attempt-{attempt}.debug.json")
}

/// Planner invocations use the same naming with a `planner` slot.
pub fn planner_stdout_log(kind: RuntimeKind, attempt: u32) -> String {
    format!(".{kind}-runtime.planner.attempt-{attempt}.stdout.log")
}

pub fn planner_stderr_log(kind: RuntimeKind, attempt: u32) -> String {
    format!(".{kind}-runtime.planner.attempt-{attempt}.stderr.log")
}

pub fn planner_debug_json(kind: RuntimeKind, attempt: u32) -> String {
    format!(".{kind}-runtime.planner.attempt-{attempt}.debug.json")
}
