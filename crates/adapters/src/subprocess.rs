// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess execution with timeouts and streamed stdio.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Timeout for git plumbing commands (add/commit/rev-parse).
pub const GIT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Grace period between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("{label} failed to start: {source}")]
    Spawn {
        label: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{label} timed out after {timeout_ms}ms")]
    Timeout { label: String, timeout_ms: u64 },
    #[error("{label} io: {source}")]
    Io {
        label: String,
        #[source]
        source: std::io::Error,
    },
}

impl SubprocessError {
    fn io(label: &str, source: std::io::Error) -> Self {
        Self::Io { label: label.to_string(), source }
    }
}

/// Run a command to completion with captured output, killing it when the
/// timeout elapses (the child is reaped via kill-on-drop).
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    label: &str,
) -> Result<std::process::Output, SubprocessError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let child = cmd
        .spawn()
        .map_err(|e| SubprocessError::Spawn { label: label.to_string(), source: e })?;
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(SubprocessError::io(label, e)),
        Err(_) => Err(SubprocessError::Timeout {
            label: label.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Exit information from a streamed child run.
#[derive(Debug, Clone)]
pub struct StreamedExit {
    /// Exit code, `-1` when the child was terminated by us or by a signal.
    pub exit_code: i32,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub cancelled: bool,
    pub pid: Option<u32>,
}

/// Spawn a child streaming stdout/stderr to files.
///
/// On timeout or cancellation the child gets SIGTERM, then SIGKILL after a
/// grace period. The stdio copy tasks are joined before returning so the
/// log files are complete.
pub async fn spawn_streaming(
    mut cmd: Command,
    stdout_path: &Path,
    stderr_path: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
    label: &str,
) -> Result<StreamedExit, SubprocessError> {
    let mut stdout_file = tokio::fs::File::create(stdout_path)
        .await
        .map_err(|e| SubprocessError::io(label, e))?;
    let mut stderr_file = tokio::fs::File::create(stderr_path)
        .await
        .map_err(|e| SubprocessError::io(label, e))?;

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = std::time::Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|e| SubprocessError::Spawn { label: label.to_string(), source: e })?;
    let pid = child.id();

    let child_stdout = child.stdout.take();
    let child_stderr = child.stderr.take();
    let out_task = tokio::spawn(async move {
        if let Some(mut stream) = child_stdout {
            let _ = tokio::io::copy(&mut stream, &mut stdout_file).await;
            let _ = stdout_file.flush().await;
        }
    });
    let err_task = tokio::spawn(async move {
        if let Some(mut stream) = child_stderr {
            let _ = tokio::io::copy(&mut stream, &mut stderr_file).await;
            let _ = stderr_file.flush().await;
        }
    });

    enum Wait {
        Exited(std::process::ExitStatus),
        TimedOut,
        Cancelled,
    }

    let waited = tokio::select! {
        status = child.wait() => Wait::Exited(status.map_err(|e| SubprocessError::io(label, e))?),
        _ = tokio::time::sleep(timeout) => Wait::TimedOut,
        _ = cancel.cancelled() => Wait::Cancelled,
    };

    let (exit_code, timed_out, cancelled) = match waited {
        Wait::Exited(status) => (status.code().unwrap_or(-1), false, false),
        Wait::TimedOut => {
            tracing::warn!(label, timeout_ms = timeout.as_millis() as u64, "child timed out");
            terminate(&mut child).await;
            (-1, true, false)
        }
        Wait::Cancelled => {
            tracing::info!(label, "child cancelled");
            terminate(&mut child).await;
            (-1, false, true)
        }
    };

    let _ = out_task.await;
    let _ = err_task.await;

    Ok(StreamedExit {
        exit_code,
        duration_ms: start.elapsed().as_millis() as u64,
        timed_out,
        cancelled,
        pid,
    })
}

/// SIGTERM the child, escalating to SIGKILL after the grace period.
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
    }
    if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
