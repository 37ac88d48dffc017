// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-step checkpoint commits: stage-and-commit-if-dirty.

use fab_adapters::subprocess::{run_with_timeout, SubprocessError, GIT_COMMAND_TIMEOUT};
use fab_core::RunId;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {op} failed (exit {exit_code}): {stderr}")]
    Command { op: &'static str, exit_code: i32, stderr: String },
    #[error("git {op}: {source}")]
    Exec {
        op: &'static str,
        #[source]
        source: SubprocessError,
    },
}

/// Stage all dirty files and commit them as a step checkpoint.
///
/// Returns `Ok(Some(sha))` when a commit was created, `Ok(None)` when the
/// workspace is not a git repository or nothing was staged. A failing git
/// command is an error, never silently swallowed.
pub async fn commit_step_checkpoint(
    workspace: &Path,
    run_id: &RunId,
    step_number: u32,
) -> Result<Option<String>, GitError> {
    if !workspace.join(".git").exists() {
        return Ok(None);
    }

    run_git(workspace, "add", &["add", "-A"]).await?;

    // `diff --cached --quiet` exits 1 when something is staged.
    let status = git_command(workspace, &["diff", "--cached", "--quiet"]);
    let output = run_with_timeout(status, GIT_COMMAND_TIMEOUT, "git diff")
        .await
        .map_err(|e| GitError::Exec { op: "diff", source: e })?;
    if output.status.success() {
        tracing::debug!(run_id = %run_id, step = step_number, "nothing staged, skipping checkpoint");
        return Ok(None);
    }

    let message = format!("checkpoint: step {step_number} ({run_id})");
    run_git(workspace, "commit", &["commit", "-m", &message]).await?;

    let output = run_git(workspace, "rev-parse", &["rev-parse", "HEAD"]).await?;
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    tracing::info!(run_id = %run_id, step = step_number, commit = %sha, "step checkpoint committed");
    Ok(Some(sha))
}

fn git_command(workspace: &Path, args: &[&str]) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("git");
    cmd.args(args)
        .current_dir(workspace)
        // Identity overrides so checkpoints work in bare environments.
        .env("GIT_AUTHOR_NAME", "fab")
        .env("GIT_AUTHOR_EMAIL", "fab@localhost")
        .env("GIT_COMMITTER_NAME", "fab")
        .env("GIT_COMMITTER_EMAIL", "fab@localhost")
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE");
    cmd
}

async fn run_git(
    workspace: &Path,
    op: &'static str,
    args: &[&str],
) -> Result<std::process::Output, GitError> {
    let cmd = git_command(workspace, args);
    let output = run_with_timeout(cmd, GIT_COMMAND_TIMEOUT, "git")
        .await
        .map_err(|e| GitError::Exec { op, source: e })?;
    if !output.status.success() {
        return Err(GitError::Command {
            op,
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

#[cfg(test)]
#[path = "git_tests.rs"]
mod tests;
