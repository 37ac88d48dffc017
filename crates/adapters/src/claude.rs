// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Claude-style runtime: headless CLI invocation with stream-json output.

use crate::guardrails::GuardrailPolicy;
use crate::runtime::{
    approx_tokens_from_stdout, base_env, consume_plan_file, runtime_id, stream_invocation,
    write_debug_meta, PlanGenerationResult, PlannerContext, RuntimeAdapter, RuntimeAdapterError,
    RuntimeDebugMeta, RuntimeInvocation, RuntimeStepResult, SpawnSlot, StepContext,
    UsageCounters,
};
use async_trait::async_trait;
use fab_core::config::{RuntimeConfig, RuntimeKind};
use std::path::Path;
use tracing::Instrument;

pub struct ClaudeRuntime {
    config: RuntimeConfig,
    guardrails: GuardrailPolicy,
}

impl ClaudeRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let guardrails = GuardrailPolicy::from_config(&config);
        Self { config, guardrails }
    }

    fn invocation(
        &self,
        prompt: &str,
        model: Option<&str>,
        cwd: &Path,
        env: std::collections::BTreeMap<String, String>,
    ) -> RuntimeInvocation {
        let mut args = self.config.args.clone();
        args.extend([
            "-p".to_string(),
            prompt.to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ]);
        if let Some(model) = model {
            args.push("--model".to_string());
            args.push(model.to_string());
        }
        RuntimeInvocation {
            program: self.config.command.clone(),
            args,
            env,
            cwd: cwd.to_path_buf(),
        }
    }
}

#[async_trait]
impl RuntimeAdapter for ClaudeRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Claude
    }

    fn prepare(&self, ctx: &StepContext) -> RuntimeInvocation {
        let mut env = base_env(&self.config, &ctx.run_id, "agent");
        env.insert("FAB_STEP_NUMBER".to_string(), ctx.step_number.to_string());
        env.insert("FAB_AGENT".to_string(), ctx.agent.id.clone());
        env.insert("FAB_RESULT_PATH".to_string(), ctx.result_path.display().to_string());
        self.invocation(&ctx.prompt, ctx.model.as_deref(), &ctx.workspace, env)
    }

    async fn run_step(
        &self,
        ctx: &StepContext,
        attempt: u32,
    ) -> Result<RuntimeStepResult, RuntimeAdapterError> {
        let span = tracing::info_span!(
            "runtime.step",
            runtime = %self.kind(),
            step = ctx.step_number,
            attempt
        );
        async {
            let inv = self.prepare(ctx);
            self.guardrails
                .check_command(&inv.command_line())
                .map_err(|v| RuntimeAdapterError::GuardrailDenied(v.to_string()))?;

            let slot = SpawnSlot::for_step(self.kind(), &ctx.workspace, ctx.step_number, attempt);
            let exit =
                stream_invocation(&inv, &slot, ctx.timeout, &ctx.cancel, "claude step").await?;

            let usage = parse_stream_usage(&slot.stdout_path);
            let tokens_used = usage
                .total_tokens()
                .unwrap_or_else(|| approx_tokens_from_stdout(&slot.stdout_path));
            let cost_usd = usage.cost_usd.unwrap_or(0.0);
            let model = usage.model.clone().or_else(|| ctx.model.clone());
            let id = runtime_id(self.kind(), &exit);

            write_debug_meta(
                &slot.debug_path,
                &RuntimeDebugMeta {
                    model: model.clone(),
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    total_tokens: usage.total_tokens(),
                    cost_usd: usage.cost_usd,
                    runtime_id: id.clone(),
                    exit_code: exit.exit_code,
                    duration_ms: exit.duration_ms,
                },
            )?;

            tracing::info!(
                exit_code = exit.exit_code,
                tokens_used,
                elapsed_ms = exit.duration_ms,
                "step child exited"
            );

            Ok(RuntimeStepResult {
                exit_code: exit.exit_code,
                stdout_path: slot.stdout_path,
                stderr_path: slot.stderr_path,
                duration_ms: exit.duration_ms,
                tokens_used,
                cost_usd,
                runtime_id: id,
                model,
                timed_out: exit.timed_out,
                cancelled: exit.cancelled,
            })
        }
        .instrument(span)
        .await
    }

    async fn run_planner(
        &self,
        ctx: &PlannerContext,
    ) -> Result<PlanGenerationResult, RuntimeAdapterError> {
        let span = tracing::info_span!("runtime.planner", runtime = %self.kind());
        async {
            let mut env = base_env(&self.config, &ctx.run_id, "planner");
            env.insert("FAB_TICKET_ID".to_string(), ctx.ticket.id.clone());
            let model =
                ctx.model.clone().or_else(|| self.config.planner_model.clone());
            let inv = self.invocation(&ctx.prompt, model.as_deref(), &ctx.workspace, env);

            let slot = SpawnSlot::for_planner(self.kind(), &ctx.workspace, 1);
            let exit =
                stream_invocation(&inv, &slot, ctx.timeout, &ctx.cancel, "claude planner").await?;
            if exit.timed_out {
                return Err(RuntimeAdapterError::NoPlan(format!(
                    "planner timed out after {}ms",
                    ctx.timeout.as_millis()
                )));
            }
            if exit.exit_code != 0 {
                return Err(RuntimeAdapterError::NoPlan(format!(
                    "planner exited {}",
                    exit.exit_code
                )));
            }

            let usage = parse_stream_usage(&slot.stdout_path);
            let tokens_used = usage
                .total_tokens()
                .unwrap_or_else(|| approx_tokens_from_stdout(&slot.stdout_path));

            write_debug_meta(
                &slot.debug_path,
                &RuntimeDebugMeta {
                    model: usage.model.clone().or(model),
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    total_tokens: usage.total_tokens(),
                    cost_usd: usage.cost_usd,
                    runtime_id: runtime_id(self.kind(), &exit),
                    exit_code: exit.exit_code,
                    duration_ms: exit.duration_ms,
                },
            )?;

            let plan = consume_plan_file(&ctx.workspace)?;
            Ok(PlanGenerationResult {
                plan,
                tokens_used,
                cost_usd: usage.cost_usd.unwrap_or(0.0),
                duration_ms: exit.duration_ms,
            })
        }
        .instrument(span)
        .await
    }
}

/// Extract exact counters from stream-json output.
///
/// The `system:init` line carries the concrete model; the final `result`
/// line carries usage and cost. Lines that don't parse are skipped.
pub(crate) fn parse_stream_usage(stdout_path: &Path) -> UsageCounters {
    let mut usage = UsageCounters::default();
    let Ok(contents) = std::fs::read_to_string(stdout_path) else {
        return usage;
    };
    for line in contents.lines() {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        match value.get("type").and_then(|t| t.as_str()) {
            Some("system") => {
                if let Some(model) = value.get("model").and_then(|m| m.as_str()) {
                    usage.model = Some(model.to_string());
                }
            }
            Some("result") => {
                if let Some(cost) = value.get("total_cost_usd").and_then(|c| c.as_f64()) {
                    usage.cost_usd = Some(cost);
                }
                if let Some(u) = value.get("usage") {
                    usage.input_tokens = u.get("input_tokens").and_then(|t| t.as_u64());
                    usage.output_tokens = u.get("output_tokens").and_then(|t| t.as_u64());
                }
                if let Some(model) = value.get("model").and_then(|m| m.as_str()) {
                    usage.model = Some(model.to_string());
                }
            }
            _ => {}
        }
    }
    usage
}

#[cfg(test)]
#[path = "claude_tests.rs"]
mod tests;
