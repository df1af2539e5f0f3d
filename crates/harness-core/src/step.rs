//! Per-invocation context and outcome types.

use crate::flow::AgentRole;
use crate::receipt::{ContextTruncation, TokenUsage};
use harness_error::HarnessErrorDto;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Terminal status of one step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    /// The step completed and produced its required outputs.
    Pass,
    /// The step failed (transport error, parse failure, handoff overflow).
    Fail,
    /// The step was not attempted because a required input was missing.
    Skip,
    /// The step exceeded its wall-clock timeout or was interrupted.
    Timeout,
}

/// Budget triple in effect for one step invocation, resolved from the
/// override chain (step → flow → profile → built-in default).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct EffectiveBudget {
    /// Total character budget for the assembled prompt.
    pub context_total: usize,
    /// Character budget for full-text recent history.
    pub history_recent_max: usize,
    /// Character budget for summarized older history.
    pub history_older_max: usize,
}

/// A prior step's artifacts, as seen by the [`crate::hashing`]-stable
/// prompt assembly. Produced lazily by the run store for the context
/// budgeter to consume.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PriorStepDescriptor {
    /// Step id of the prior step.
    pub step_id: String,
    /// Agent key of the prior step.
    pub agent_key: String,
    /// Full receipt body, serialized, used for "recent" inclusion.
    pub receipt_json: String,
    /// Handoff envelope body, serialized, used for "older" summarized
    /// inclusion — only handoffs are allowed in the summarized tier.
    pub handoff_json: String,
}

/// The input assembled per step invocation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepContext {
    /// Owning run.
    pub run_id: String,
    /// Owning flow.
    pub flow_key: String,
    /// This step's id.
    pub step_id: String,
    /// This step's agent key.
    pub agent_key: String,
    /// Role the agent plays for this step.
    pub role: AgentRole,
    /// Resolved budget for this invocation.
    pub budget: EffectiveBudget,
    /// Prior steps in the flow, most-recent last.
    pub prior_steps: Vec<PriorStepDescriptor>,
    /// Optional caller-injected inputs (e.g. a DETOUR sidequest's seed
    /// data). Never persisted verbatim — only pointers survive into the
    /// handoff envelope.
    #[serde(default)]
    pub injected_inputs: std::collections::BTreeMap<String, String>,
}

/// Outcome of one step attempt.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepResult {
    /// Terminal status.
    pub status: StepStatus,
    /// Attempt start time (RFC 3339).
    pub started_at: String,
    /// Attempt end time (RFC 3339).
    pub ended_at: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Token usage, if the transport reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    /// Path to the raw transcript (`llm/<step>-<agent>-<engine>.jsonl`).
    pub transcript_path: String,
    /// Path to the written receipt.
    pub receipt_path: String,
    /// Path to the written handoff envelope, if any was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_path: Option<String>,
    /// Context truncation info, if truncation occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_truncation: Option<ContextTruncation>,
    /// Structured error, if `status` is `FAIL`, `SKIP`, or `TIMEOUT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<HarnessErrorDto>,
}

impl StepResult {
    /// Whether this result reached a terminal status with a receipt on
    /// disk (invariant 2: a step receipt exists iff the step reached a
    /// terminal status).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            StepStatus::Pass | StepStatus::Fail | StepStatus::Skip | StepStatus::Timeout
        )
    }
}
