//! Routing decision enum and append-only decision records (§4.5, §4.6).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Exactly one decision terminates each step. Ordered here from lowest to
/// highest authority; [`RoutingDecision::highest_authority`] collapses a
/// set of signals to the single one the orchestrator acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingDecision {
    /// Advance to the next declared step.
    Continue,
    /// Re-enter the loop partner.
    Loop,
    /// Run a named sidequest before returning to the next step.
    Detour,
    /// Insert a sub-flow before advancing.
    InjectFlow,
    /// Mark unverified; still write receipt; advance under degradation.
    Escalate,
    /// End the flow; subsequent steps are skipped.
    Terminate,
}

impl RoutingDecision {
    /// Collapse a set of signals observed on one receipt to the single
    /// highest-authority decision, per the fixed precedence order
    /// `TERMINATE > ESCALATE > INJECT_FLOW > DETOUR > LOOP > CONTINUE`.
    ///
    /// Returns [`RoutingDecision::Continue`] if `signals` is empty (no
    /// routing signal present is implicit CONTINUE).
    #[must_use]
    pub fn highest_authority(signals: &[RoutingDecision]) -> RoutingDecision {
        signals
            .iter()
            .copied()
            .max()
            .unwrap_or(RoutingDecision::Continue)
    }

    /// Whether this decision must append a `routing/decisions.jsonl` entry.
    /// `CONTINUE` is implicit and never logged (scenario 1).
    #[must_use]
    pub fn is_logged(self) -> bool {
        self != RoutingDecision::Continue
    }
}

/// Append-only record written to `routing/decisions.jsonl`. Never
/// retracted — only superseded by a later record (invariant 6).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RoutingDecisionRecord {
    /// RFC 3339 timestamp.
    pub ts: String,
    /// Owning run.
    pub run_id: String,
    /// Owning flow.
    pub flow_key: String,
    /// Step that produced this decision.
    pub step_id: String,
    /// The collapsed decision.
    pub decision: RoutingDecision,
    /// Short machine-readable reason (e.g. `"max_iterations"`,
    /// `"stall_identical_signature"`, `"blocked_missing_input"`).
    pub reason: String,
    /// Critic-produced forensic tag used for detour-catalog matching, if
    /// any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forensic_summary: Option<String>,
    /// Next step id, if the decision determines one explicitly (e.g.
    /// DETOUR's sidequest, INJECT_FLOW's sub-flow entry step).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<String>,
}
