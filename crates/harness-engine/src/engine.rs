//! The [`StepEngine`]: one step's full lifecycle (§4.4).

use std::time::Instant;

use chrono::Utc;
use harness_budget::{assemble_prompt, BudgetStatus, BudgetTracker, ContextBudget, PriorStep, StepBudget};
use harness_core::flow::{AgentRole, BudgetOverride};
use harness_core::{ContextTruncation, HandoffEnvelope, HandoffTier, Receipt, ReceiptBuilder, StepContext, StepResult, StepStatus, TokenUsage};
use harness_error::{ErrorCode, HarnessError, HarnessErrorDto};
use harness_protocol::Event;
use harness_store::RunStore;
use harness_transport::structured_output::{select_strategy, StructuredOutputStrategy, MAX_MICROLOOP_RETRIES};
use harness_transport::{ExecuteOptions, Transport};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::output::StepOutputPayload;

/// Handoff tier used when the caller doesn't pick one explicitly.
const DEFAULT_HANDOFF_TIER: HandoffTier = HandoffTier::Standard;

/// One structured line written to a step's `logs/<step_id>.jsonl` file.
#[derive(Debug, Clone, Serialize)]
pub struct StepLogEntry<'a> {
    /// RFC 3339 timestamp.
    pub ts: String,
    /// `"step_start"` or `"step_end"`.
    pub event: &'static str,
    /// Owning run.
    pub run_id: &'a str,
    /// Owning flow.
    pub flow_key: &'a str,
    /// This step's id.
    pub step_id: &'a str,
    /// This step's agent key.
    pub agent_key: &'a str,
    /// Terminal status, present only on `step_end`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StepStatus>,
    /// Duration in milliseconds, present only on `step_end`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Inputs that vary per attempt but are not carried on [`StepContext`]
/// itself (the budget-override chain and the destination step for the
/// handoff envelope).
#[derive(Debug, Clone, Copy, Default)]
pub struct AttemptOptions<'a> {
    /// Step-level budget override, if the flow config declares one.
    pub step_budget_override: Option<&'a BudgetOverride>,
    /// Flow-level budget override, if the flow config declares one.
    pub flow_budget_override: Option<&'a BudgetOverride>,
    /// Destination step id this attempt's handoff envelope targets.
    pub to_step: Option<&'a str>,
    /// Handoff tier to use for this attempt's envelope.
    pub tier: Option<HandoffTier>,
}

/// Executes one step's full lifecycle against a [`RunStore`] and a
/// [`Transport`]: prompt assembly, transport invocation, structured-output
/// parsing, and receipt/handoff writing.
pub struct StepEngine<'s> {
    store: &'s RunStore,
}

impl<'s> StepEngine<'s> {
    /// Build an engine writing artifacts through `store`.
    #[must_use]
    pub fn new(store: &'s RunStore) -> Self {
        Self { store }
    }

    /// Execute one attempt of `ctx` against `transport`.
    ///
    /// Returns the [`StepResult`] (for orchestrator bookkeeping) alongside
    /// the [`Receipt`] that was written to disk. Failure semantics (§4.4):
    /// a transport error, parse failure, handoff overflow, or timeout
    /// yields `status != PASS` with `error` populated, but a receipt is
    /// always written — a step either reaches PASS, or it reaches a
    /// different terminal status with a reason on disk.
    pub async fn execute(
        &self,
        ctx: &StepContext,
        attempt: u32,
        opts: AttemptOptions<'_>,
        step_budget: StepBudget,
        transport: &dyn Transport,
    ) -> (StepResult, Receipt) {
        let wall_start = Instant::now();
        let started_at = Utc::now().to_rfc3339();
        self.log(ctx, "step_start", None, None);

        if let Err(err) = validate_role_separation(ctx) {
            return self.finish(ctx, attempt, &started_at, wall_start, transport.engine_id(), StepStatus::Fail, None, None, None, err);
        }

        let context_budget = ContextBudget::resolve(opts.step_budget_override, opts.flow_budget_override, None);
        let prior: Vec<PriorStep> = ctx
            .prior_steps
            .iter()
            .map(|p| PriorStep {
                step_id: p.step_id.clone(),
                full_text: p.receipt_json.clone(),
                handoff_summary: p.handoff_json.clone(),
            })
            .collect();
        let (prompt, truncation) = assemble_prompt(&base_prompt(ctx), &prior, &context_budget);

        let strategy = select_strategy(transport.capabilities());
        let tracker = BudgetTracker::new(step_budget);
        tracker.start_timer();

        let options = ExecuteOptions { output_schema: None, token_budget: step_budget.token_budget };

        match self.run_with_strategy(ctx, transport, &prompt, &options, strategy, &tracker).await {
            Ok((payload, usage)) => {
                if let BudgetStatus::Exceeded(violation) = tracker.check() {
                    let err = HarnessError::new(ErrorCode::Timeout, violation.to_string());
                    return self.finish(ctx, attempt, &started_at, wall_start, transport.engine_id(), StepStatus::Timeout, Some(usage), Some(truncation), None, err);
                }

                let tier = opts.tier.unwrap_or(DEFAULT_HANDOFF_TIER);
                let to_step = opts.to_step.unwrap_or_default().to_string();
                let evidence = payload.evidence.clone();
                let routing_signal = payload.routing_signal;
                let forensic_summary = payload.forensic_summary.clone();
                let handoff = payload.into_handoff(ctx.step_id.clone(), to_step, tier);

                if !handoff.within_cap() {
                    let err = HarnessError::new(ErrorCode::HandoffOverflow, "handoff envelope exceeds its tier cap")
                        .with_context("tier_bytes", handoff.tier.byte_cap())
                        .with_context("serialized_bytes", handoff.serialized_len());
                    return self.finish(ctx, attempt, &started_at, wall_start, transport.engine_id(), StepStatus::Fail, Some(usage), Some(truncation), Some(evidence), err);
                }

                self.succeed(
                    ctx,
                    attempt,
                    &started_at,
                    wall_start,
                    transport.engine_id(),
                    strategy,
                    usage,
                    evidence,
                    truncation,
                    handoff,
                    routing_signal,
                    forensic_summary,
                )
            }
            Err(err) => {
                self.finish(ctx, attempt, &started_at, wall_start, transport.engine_id(), StepStatus::Fail, None, Some(truncation), None, err)
            }
        }
    }

    async fn run_with_strategy(
        &self,
        ctx: &StepContext,
        transport: &dyn Transport,
        prompt: &str,
        options: &ExecuteOptions,
        strategy: StructuredOutputStrategy,
        tracker: &BudgetTracker,
    ) -> Result<(StepOutputPayload, TokenUsage), HarnessError> {
        let max_attempts = match strategy {
            StructuredOutputStrategy::Microloop => MAX_MICROLOOP_RETRIES,
            StructuredOutputStrategy::None | StructuredOutputStrategy::BestEffort => 1,
        };

        let mut attempt_prompt = prompt.to_string();
        let mut last_err = None;
        for attempt in 1..=max_attempts {
            let (events, usage) = self.invoke_once(ctx, transport, &attempt_prompt, options, tracker).await?;
            match extract_payload(&events, strategy) {
                Ok(payload) => return Ok((payload, usage)),
                Err(err) => {
                    last_err = Some(err);
                    attempt_prompt = format!(
                        "{prompt}\n---\nYour attempt {attempt} reply did not contain parseable structured \
                         output. Reply again with a single fenced JSON block matching the required schema."
                    );
                }
            }
        }
        Err(last_err.unwrap_or_else(|| HarnessError::new(ErrorCode::StructuredOutputError, "transport produced no structured output")))
    }

    async fn invoke_once(
        &self,
        ctx: &StepContext,
        transport: &dyn Transport,
        prompt: &str,
        options: &ExecuteOptions,
        tracker: &BudgetTracker,
    ) -> Result<(Vec<Event>, TokenUsage), HarnessError> {
        let (tx, mut rx) = mpsc::channel::<Event>(32);
        let transcript_path = self.store.transcript_path(&ctx.flow_key, &ctx.step_id, &ctx.agent_key, transport.engine_id());

        let collector = async {
            let mut events = Vec::new();
            let mut usage = TokenUsage::default();
            while let Some(event) = rx.recv().await {
                let _ = self.store.append_jsonl(&transcript_path, &event);
                if let Event::Usage { input_tokens, output_tokens } = &event {
                    usage.prompt = *input_tokens;
                    usage.completion = *output_tokens;
                    usage.total = input_tokens + output_tokens;
                    tracker.record_tokens(input_tokens + output_tokens);
                }
                events.push(event);
            }
            (events, usage)
        };

        let (exec_result, (events, usage)) = tokio::join!(transport.execute(prompt, options, tx), collector);
        exec_result?;
        Ok((events, usage))
    }

    #[allow(clippy::too_many_arguments)]
    fn succeed(
        &self,
        ctx: &StepContext,
        attempt: u32,
        started_at: &str,
        wall_start: Instant,
        engine_id: &str,
        strategy: StructuredOutputStrategy,
        usage: TokenUsage,
        evidence: harness_core::Evidence,
        truncation: ContextTruncation,
        handoff: HandoffEnvelope,
        routing_signal: Option<harness_core::RoutingDecision>,
        forensic_summary: Option<String>,
    ) -> (StepResult, Receipt) {
        let duration_ms = wall_start.elapsed().as_millis() as u64;
        let ended_at = Utc::now().to_rfc3339();

        let mut builder = ReceiptBuilder::new(ctx.run_id.clone(), ctx.flow_key.clone(), ctx.step_id.clone(), ctx.agent_key.clone(), engine_id)
            .attempt(attempt)
            .transport_mode(strategy_name(strategy))
            .timing(started_at, ended_at.as_str(), duration_ms)
            .status(StepStatus::Pass)
            .token_usage(usage)
            .evidence(evidence);
        if truncation.truncated {
            builder = builder.context_truncation(truncation);
        }
        if let Some(decision) = routing_signal {
            builder = builder.routing_signal(decision);
        }
        if let Some(summary) = forensic_summary {
            builder = builder.forensic_summary(summary);
        }
        let receipt = builder.build();

        let receipt_path = self.store.receipt_path(&ctx.flow_key, &ctx.step_id, &ctx.agent_key);
        let handoff_path = self.store.handoff_path(&ctx.flow_key, &ctx.step_id, &ctx.agent_key);
        let _ = write_json(self.store, &receipt_path, &receipt);
        let _ = write_json(self.store, &handoff_path, &handoff);

        let result = StepResult {
            status: StepStatus::Pass,
            started_at: started_at.to_string(),
            ended_at,
            duration_ms,
            token_usage: Some(usage),
            transcript_path: self.store.transcript_path(&ctx.flow_key, &ctx.step_id, &ctx.agent_key, engine_id).display().to_string(),
            receipt_path: receipt_path.display().to_string(),
            handoff_path: Some(handoff_path.display().to_string()),
            context_truncation: truncation.truncated.then_some(truncation),
            error: None,
        };

        self.log(ctx, "step_end", Some(StepStatus::Pass), Some(duration_ms));
        (result, receipt)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        ctx: &StepContext,
        attempt: u32,
        started_at: &str,
        wall_start: Instant,
        engine_id: &str,
        status: StepStatus,
        usage: Option<TokenUsage>,
        truncation: Option<ContextTruncation>,
        evidence: Option<harness_core::Evidence>,
        error: HarnessError,
    ) -> (StepResult, Receipt) {
        let duration_ms = wall_start.elapsed().as_millis() as u64;
        let ended_at = Utc::now().to_rfc3339();
        let dto = HarnessErrorDto::from(&error);

        let mut builder = ReceiptBuilder::new(ctx.run_id.clone(), ctx.flow_key.clone(), ctx.step_id.clone(), ctx.agent_key.clone(), engine_id)
            .attempt(attempt)
            .timing(started_at, ended_at.as_str(), duration_ms)
            .status(status)
            .evidence(evidence.unwrap_or(harness_core::Evidence::Unmeasured {
                measured: false,
                reason: "step did not reach PASS".to_string(),
            }))
            .error(dto.clone());
        if let Some(usage) = usage {
            builder = builder.token_usage(usage);
        }
        if let Some(truncation) = truncation {
            if truncation.truncated {
                builder = builder.context_truncation(truncation);
            }
        }
        let receipt = builder.build();

        let receipt_path = self.store.receipt_path(&ctx.flow_key, &ctx.step_id, &ctx.agent_key);
        let _ = write_json(self.store, &receipt_path, &receipt);

        let result = StepResult {
            status,
            started_at: started_at.to_string(),
            ended_at,
            duration_ms,
            token_usage: usage,
            transcript_path: self.store.transcript_path(&ctx.flow_key, &ctx.step_id, &ctx.agent_key, engine_id).display().to_string(),
            receipt_path: receipt_path.display().to_string(),
            handoff_path: None,
            context_truncation: truncation.filter(|t| t.truncated),
            error: Some(dto),
        };

        self.log(ctx, "step_end", Some(status), Some(duration_ms));
        (result, receipt)
    }

    fn log(&self, ctx: &StepContext, event: &'static str, status: Option<StepStatus>, duration_ms: Option<u64>) {
        let entry = StepLogEntry {
            ts: Utc::now().to_rfc3339(),
            event,
            run_id: &ctx.run_id,
            flow_key: &ctx.flow_key,
            step_id: &ctx.step_id,
            agent_key: &ctx.agent_key,
            status,
            duration_ms,
        };
        let log_path = self.store.log_path(&ctx.flow_key, &ctx.step_id);
        let _ = self.store.append_jsonl(&log_path, &entry);
    }
}

fn write_json<T: Serialize>(store: &RunStore, path: &std::path::Path, value: &T) -> Result<(), HarnessError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| HarnessError::new(ErrorCode::Internal, "failed to serialize artifact").with_source(e))?;
    store.write(path, &bytes)?;
    Ok(())
}

fn base_prompt(ctx: &StepContext) -> String {
    format!(
        "step_id={} agent_key={} role={:?} run_id={} flow_key={}",
        ctx.step_id, ctx.agent_key, ctx.role, ctx.run_id, ctx.flow_key
    )
}

/// An author/critic role is never allowed to review its own prior artifact
/// within the same step (§4.4 invariant): a critic whose immediately
/// preceding prior step was authored by the same agent is rejected before
/// any transport invocation.
fn validate_role_separation(ctx: &StepContext) -> Result<(), HarnessError> {
    if ctx.role == AgentRole::Critic {
        if let Some(last) = ctx.prior_steps.last() {
            if last.agent_key == ctx.agent_key {
                return Err(HarnessError::new(
                    ErrorCode::ConfigError,
                    "a critic step cannot review its own prior artifact",
                )
                .with_context("agent_key", ctx.agent_key.clone()));
            }
        }
    }
    Ok(())
}

fn extract_payload(events: &[Event], strategy: StructuredOutputStrategy) -> Result<StepOutputPayload, HarnessError> {
    let result = events.iter().rev().find_map(|e| match e {
        Event::Result { output, .. } => Some(output.as_ref()),
        _ => None,
    });

    match strategy {
        StructuredOutputStrategy::None => {
            let output = result.flatten().ok_or_else(|| {
                HarnessError::new(ErrorCode::StructuredOutputError, "transport produced no terminal output value")
            })?;
            StepOutputPayload::from_value(output)
        }
        StructuredOutputStrategy::BestEffort | StructuredOutputStrategy::Microloop => {
            if let Some(Some(output)) = result {
                if let Ok(payload) = StepOutputPayload::from_value(output) {
                    return Ok(payload);
                }
            }
            let text = last_message_text(events).ok_or_else(|| {
                HarnessError::new(ErrorCode::StructuredOutputError, "no message text to extract structured output from")
            })?;
            StepOutputPayload::from_best_effort_text(&text)
        }
    }
}

fn last_message_text(events: &[Event]) -> Option<String> {
    events.iter().rev().find_map(|e| match e {
        Event::Message { text } => Some(text.clone()),
        _ => None,
    })
}

fn strategy_name(strategy: StructuredOutputStrategy) -> &'static str {
    match strategy {
        StructuredOutputStrategy::None => "none",
        StructuredOutputStrategy::BestEffort => "best-effort",
        StructuredOutputStrategy::Microloop => "microloop",
    }
}
