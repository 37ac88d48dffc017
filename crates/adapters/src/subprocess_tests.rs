// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::subprocess::{run_with_timeout, spawn_streaming, SubprocessError};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

fn sh(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

#[tokio::test]
async fn run_with_timeout_captures_output() {
    let output = run_with_timeout(sh("echo hello; echo oops >&2"), Duration::from_secs(5), "echo")
        .await
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello\n");
    assert_eq!(String::from_utf8_lossy(&output.stderr), "oops\n");
}

#[tokio::test]
async fn run_with_timeout_times_out() {
    let started = std::time::Instant::now();
    let result = run_with_timeout(sh("sleep 10"), Duration::from_millis(100), "sleeper").await;
    assert!(matches!(result, Err(SubprocessError::Timeout { .. })));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn run_with_timeout_unknown_executable() {
    let cmd = Command::new("definitely-not-a-real-binary-fab");
    let result = run_with_timeout(cmd, Duration::from_secs(1), "ghost").await;
    assert!(matches!(result, Err(SubprocessError::Spawn { .. })));
}

#[tokio::test]
async fn spawn_streaming_writes_both_logs() {
    let dir = tempfile::tempdir().unwrap();
    let stdout = dir.path().join("out.log");
    let stderr = dir.path().join("err.log");
    let cancel = CancellationToken::new();
    let exit = spawn_streaming(
        sh("printf line1; printf err1 >&2"),
        &stdout,
        &stderr,
        Duration::from_secs(5),
        &cancel,
        "stream",
    )
    .await
    .unwrap();

    assert_eq!(exit.exit_code, 0);
    assert!(!exit.timed_out);
    assert!(!exit.cancelled);
    assert_eq!(std::fs::read_to_string(&stdout).unwrap(), "line1");
    assert_eq!(std::fs::read_to_string(&stderr).unwrap(), "err1");
}

#[tokio::test]
async fn spawn_streaming_kills_on_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let started = std::time::Instant::now();
    let exit = spawn_streaming(
        sh("sleep 30"),
        &dir.path().join("out.log"),
        &dir.path().join("err.log"),
        Duration::from_millis(100),
        &cancel,
        "sleeper",
    )
    .await
    .unwrap();

    assert!(exit.timed_out);
    assert_eq!(exit.exit_code, -1);
    // SIGTERM should land well before the kill-grace window.
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn spawn_streaming_honors_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    let exit = spawn_streaming(
        sh("sleep 30"),
        &dir.path().join("out.log"),
        &dir.path().join("err.log"),
        Duration::from_secs(60),
        &cancel,
        "sleeper",
    )
    .await
    .unwrap();

    assert!(exit.cancelled);
    assert!(!exit.timed_out);
}
