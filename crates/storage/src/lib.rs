// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fab-storage: append-only event logs and their replay projection

pub mod event_log;
pub mod replay;

pub use event_log::{EventStore, EventStoreConfig, StoreError, GLOBAL_LOG_FILE, RUN_LOG_FILE};
pub use replay::project_run;
