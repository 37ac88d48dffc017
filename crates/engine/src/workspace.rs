// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run workspace directories: `<base>/<project>/<run>`.

use fab_core::{layout, RunId, REVIEWS_DIR};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("create workspace {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("remove workspace {path}: {source}")]
    Remove {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Creates and cleans per-run workspace trees.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base: PathBuf,
}

impl WorkspaceManager {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn run_dir(&self, project_id: &str, run_id: &RunId) -> PathBuf {
        self.base.join(project_id).join(run_id.as_str())
    }

    /// Create the run workspace with its stable subdirectories.
    pub async fn create(&self, project_id: &str, run_id: &RunId) -> Result<PathBuf, WorkspaceError> {
        let root = self.run_dir(project_id, run_id);
        for dir in [
            root.clone(),
            root.join(layout::ARTIFACTS_DIR),
            root.join(layout::CONTEXT_DIR),
            root.join(REVIEWS_DIR),
        ] {
            tokio::fs::create_dir_all(&dir).await.map_err(|e| WorkspaceError::Create {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        tracing::info!(run_id = %run_id, path = %root.display(), "workspace created");
        Ok(root)
    }

    /// Remove a run workspace tree.
    pub async fn remove(&self, project_id: &str, run_id: &RunId) -> Result<(), WorkspaceError> {
        let root = self.run_dir(project_id, run_id);
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {
                tracing::info!(run_id = %run_id, path = %root.display(), "workspace removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(WorkspaceError::Remove { path: root.display().to_string(), source: e })
            }
        }
    }
}

impl WorkspaceManager {
    pub fn base(&self) -> &Path {
        &self.base
    }
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
