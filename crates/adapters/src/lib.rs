// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fab-adapters: runtime subprocess adapters and their spawn plumbing

pub mod guardrails;
pub mod runtime;
pub mod subprocess;

mod claude;
mod codex;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use claude::ClaudeRuntime;
pub use codex::CodexRuntime;
pub use guardrails::{GuardrailPolicy, GuardrailViolation};
pub use runtime::{
    runtime_for_config, PlanGenerationResult, PlannerContext, ReworkRequest, RuntimeAdapter,
    RuntimeAdapterError, RuntimeDebugMeta, RuntimeInvocation, RuntimeStepResult, StepContext,
};
pub use subprocess::{run_with_timeout, SubprocessError};

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeCall, FakeRuntime, PlanScript, StepScript};
