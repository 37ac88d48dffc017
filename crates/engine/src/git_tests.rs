// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::git::commit_step_checkpoint;
use fab_core::RunId;
use std::path::Path;
use std::process::Command;

fn init_repo(dir: &Path) {
    let status = Command::new("git")
        .args(["init", "-q"])
        .current_dir(dir)
        .status()
        .unwrap();
    assert!(status.success());
}

fn run_id() -> RunId {
    RunId::from_string("run-1000-abc")
}

#[tokio::test]
async fn non_repo_workspace_is_a_noop() {
    let ws = tempfile::tempdir().unwrap();
    let commit = commit_step_checkpoint(ws.path(), &run_id(), 1).await.unwrap();
    assert_eq!(commit, None);
}

#[tokio::test]
async fn dirty_workspace_gets_a_checkpoint_commit() {
    let ws = tempfile::tempdir().unwrap();
    init_repo(ws.path());
    std::fs::write(ws.path().join("main.rs"), "fn main() {}").unwrap();

    let commit = commit_step_checkpoint(ws.path(), &run_id(), 2).await.unwrap();
    let sha = commit.unwrap();
    assert_eq!(sha.len(), 40);

    let log = Command::new("git")
        .args(["log", "-1", "--format=%s"])
        .current_dir(ws.path())
        .output()
        .unwrap();
    let subject = String::from_utf8_lossy(&log.stdout);
    assert_eq!(subject.trim(), "checkpoint: step 2 (run-1000-abc)");
}

#[tokio::test]
async fn clean_workspace_commits_nothing() {
    let ws = tempfile::tempdir().unwrap();
    init_repo(ws.path());
    std::fs::write(ws.path().join("main.rs"), "fn main() {}").unwrap();
    let first = commit_step_checkpoint(ws.path(), &run_id(), 1).await.unwrap();
    assert!(first.is_some());

    // Nothing changed since the checkpoint: no commit, no error.
    let second = commit_step_checkpoint(ws.path(), &run_id(), 2).await.unwrap();
    assert_eq!(second, None);
}

#[tokio::test]
async fn successive_steps_produce_distinct_commits() {
    let ws = tempfile::tempdir().unwrap();
    init_repo(ws.path());
    std::fs::write(ws.path().join("a.txt"), "one").unwrap();
    let first = commit_step_checkpoint(ws.path(), &run_id(), 1).await.unwrap().unwrap();
    std::fs::write(ws.path().join("b.txt"), "two").unwrap();
    let second = commit_step_checkpoint(ws.path(), &run_id(), 2).await.unwrap().unwrap();
    assert_ne!(first, second);
}
