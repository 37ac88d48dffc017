// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only event store.
//!
//! Events are buffered in memory until [`EventStore::initialize`] learns the
//! run workspace, then drained in order to the per-run log and, when
//! configured, the global log. Writes are JSONL with a single writer
//! sequence; durability is at-least-once and consumers must tolerate
//! duplicate rows after crash replay.

use fab_core::{EventType, RunId, TaskEvent};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Per-run log file name inside the workspace.
pub const RUN_LOG_FILE: &str = ".events.jsonl";

/// Global log file name inside the configured events directory.
pub const GLOBAL_LOG_FILE: &str = "events.jsonl";

/// Default pre-initialize buffer capacity. Sized for a run's worth of
/// plan-time events; overflow drops the oldest row with a warning.
const DEFAULT_BUFFER_CAPACITY: usize = 512;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event log io: {0}")]
    Io(#[from] std::io::Error),
    #[error("event encode: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
pub struct EventStoreConfig {
    /// Directory of the shared cross-run log; `None` disables it.
    pub global_events_dir: Option<PathBuf>,
    /// Pre-initialize buffer capacity override.
    pub buffer_capacity: Option<usize>,
}

struct Inner {
    events: Vec<TaskEvent>,
    buffer: VecDeque<TaskEvent>,
    buffer_capacity: usize,
    dropped: u64,
    run_log: Option<File>,
    global_log: Option<File>,
}

/// Append-only store for one run's events.
pub struct EventStore {
    global_events_dir: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl EventStore {
    pub fn new(config: EventStoreConfig) -> Self {
        Self {
            global_events_dir: config.global_events_dir,
            inner: Mutex::new(Inner {
                events: Vec::new(),
                buffer: VecDeque::new(),
                buffer_capacity: config.buffer_capacity.unwrap_or(DEFAULT_BUFFER_CAPACITY),
                dropped: 0,
                run_log: None,
                global_log: None,
            }),
        }
    }

    /// Open the log files and drain buffered events to them in order.
    pub fn initialize(&self, workspace: &Path) -> Result<(), StoreError> {
        let run_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(workspace.join(RUN_LOG_FILE))?;
        let global_log = match &self.global_events_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Some(OpenOptions::new().create(true).append(true).open(dir.join(GLOBAL_LOG_FILE))?)
            }
            None => None,
        };

        let mut inner = self.inner.lock();
        inner.run_log = Some(run_log);
        inner.global_log = global_log;
        while let Some(event) = inner.buffer.pop_front() {
            inner.append_line(&event)?;
        }
        Ok(())
    }

    /// Append one event: in-memory list always, log files when open,
    /// stderr in human form. Append failures propagate after the in-memory
    /// update.
    pub fn store(&self, event: TaskEvent) -> Result<(), StoreError> {
        tracing::info!(
            run_id = %event.run_id,
            event = %event.event_type,
            "event"
        );

        let mut inner = self.inner.lock();
        inner.events.push(event.clone());

        if inner.run_log.is_some() {
            inner.append_line(&event)
        } else {
            if inner.buffer.len() >= inner.buffer_capacity {
                inner.buffer.pop_front();
                inner.dropped += 1;
                tracing::warn!(
                    dropped = inner.dropped,
                    capacity = inner.buffer_capacity,
                    "event buffer overflow, dropping oldest"
                );
            }
            inner.buffer.push_back(event);
            Ok(())
        }
    }

    pub fn by_run(&self, run_id: &RunId) -> Vec<TaskEvent> {
        self.inner.lock().events.iter().filter(|e| &e.run_id == run_id).cloned().collect()
    }

    pub fn by_type(&self, event_type: EventType) -> Vec<TaskEvent> {
        self.inner.lock().events.iter().filter(|e| e.event_type == event_type).cloned().collect()
    }

    pub fn all(&self) -> Vec<TaskEvent> {
        self.inner.lock().events.clone()
    }

    /// Number of buffered events dropped before `initialize`.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Replay a JSONL log for debugging. Malformed lines are skipped with a
    /// warning so a torn tail write doesn't poison the replay.
    pub fn load_from_file(path: &Path) -> Result<Vec<TaskEvent>, StoreError> {
        let reader = BufReader::new(File::open(path)?);
        let mut events = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TaskEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(line = line_no + 1, error = %e, "skipping malformed event row");
                }
            }
        }
        Ok(events)
    }

    /// Flush both logs.
    pub fn close(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(f) = inner.run_log.as_mut() {
            f.flush()?;
        }
        if let Some(f) = inner.global_log.as_mut() {
            f.flush()?;
        }
        Ok(())
    }
}

impl Inner {
    fn append_line(&mut self, event: &TaskEvent) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        if let Some(f) = self.run_log.as_mut() {
            f.write_all(line.as_bytes())?;
        }
        if let Some(f) = self.global_log.as_mut() {
            f.write_all(line.as_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "event_log_tests.rs"]
mod tests;
