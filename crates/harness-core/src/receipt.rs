//! Receipt, handoff envelope, and degradation log schemas (§3).

use crate::hashing::receipt_hash;
use crate::routing::RoutingDecision;
use harness_error::HarnessErrorDto;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prompt/completion/total token counts for one step attempt.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt: u64,
    /// Tokens produced by the completion.
    pub completion: u64,
    /// `prompt + completion`.
    pub total: u64,
}

/// A pointer to measured evidence, or a documented reason why none exists.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Evidence {
    /// Evidence was measured and recorded at `evidence_path`.
    Measured {
        /// Always `true` for this variant.
        measured: bool,
        /// Path to the evidence artifact, relative to the flow directory.
        evidence_path: String,
    },
    /// No evidence was measured, with a documented reason (fix-forward:
    /// ambiguity becomes an assumption, never a silent gap).
    Unmeasured {
        /// Always `false` for this variant.
        measured: bool,
        /// Why no evidence was measured.
        reason: String,
    },
}

/// Closed enum of verdicts a critic role may render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum CriticVerdict {
    /// The critic accepts the artifact; loop terminates.
    Verified,
    /// The critic rejects the artifact but iteration may still help.
    Unverified,
    /// The critic rejects the artifact and further iteration will not help.
    Terminal,
}

/// History-truncation metrics recorded when the context budgeter dropped
/// any prior step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct ContextTruncation {
    /// Number of prior steps included (full or summarized).
    pub steps_included: usize,
    /// Total number of prior steps available.
    pub steps_total: usize,
    /// Characters actually used in the assembled prompt.
    pub chars_used: usize,
    /// Character budget that was in effect.
    pub budget_chars: usize,
    /// Whether any prior step had to be dropped or summarized.
    pub truncated: bool,
}

/// The durable proof-of-work for one step (§3 "Receipt").
///
/// Receipts never mutate after write; a microloop's later attempt
/// overwrites only the *latest* receipt file, and `receipt_sha256` is
/// computed over the canonical JSON of the receipt with this very field
/// nulled out, so hashing never references itself.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Receipt {
    /// Schema/contract version (`harness_core::CONTRACT_VERSION` at write
    /// time).
    pub schema_version: String,
    /// Opaque engine identifier of the transport that produced this
    /// receipt (e.g. `"stub"`, `"claude-sdk"`).
    pub engine_id: String,
    /// Structured-output fallback mode used (`"none"`, `"best-effort"`,
    /// `"microloop"`).
    pub transport_mode: String,
    /// Upstream model/vendor identifier, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Owning run.
    pub run_id: String,
    /// Owning flow.
    pub flow_key: String,
    /// This step's id.
    pub step_id: String,
    /// This step's agent key.
    pub agent_key: String,
    /// Attempt index within this step's microloop (1-based).
    pub attempt: u32,
    /// Attempt start time (RFC 3339).
    pub started_at: String,
    /// Attempt end time (RFC 3339).
    pub ended_at: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Terminal status.
    pub status: crate::step::StepStatus,
    /// Token usage, if the transport reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    /// Evidence pointer for this step's claimed work.
    pub evidence: Evidence,
    /// Verdicts keyed by role name (only populated for critic steps).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub critic_verdicts: BTreeMap<String, CriticVerdict>,
    /// Present only when the context budgeter truncated history for this
    /// attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_truncation: Option<ContextTruncation>,
    /// Structured error, present iff `status != PASS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<HarnessErrorDto>,
    /// Routing signal observed on this step's output, if any. Absent means
    /// implicit `CONTINUE` (§4.6). The orchestrator reads this back from
    /// disk to decide the next step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_signal: Option<RoutingDecision>,
    /// Critic-produced forensic tag used for detour-catalog matching, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forensic_summary: Option<String>,
    /// SHA-256 of this receipt's canonical JSON with this field nulled.
    pub receipt_sha256: Option<String>,
}

impl Receipt {
    /// Recompute and splice in `receipt_sha256`, nulling it first so the
    /// hash never covers itself.
    pub fn finalize_hash(&mut self) {
        self.receipt_sha256 = None;
        let hash = receipt_hash(&self);
        self.receipt_sha256 = Some(hash);
    }

    /// Deterministic on-disk filename for this receipt (invariant 1).
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.step_id, self.agent_key)
    }
}

/// Fluent builder for [`Receipt`], following the `PASS`/`FAIL`/etc.
/// terminal-status contract.
#[derive(Debug, Clone)]
pub struct ReceiptBuilder {
    receipt: Receipt,
}

impl ReceiptBuilder {
    /// Start building a receipt for one step attempt.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        flow_key: impl Into<String>,
        step_id: impl Into<String>,
        agent_key: impl Into<String>,
        engine_id: impl Into<String>,
    ) -> Self {
        Self {
            receipt: Receipt {
                schema_version: crate::CONTRACT_VERSION.to_string(),
                engine_id: engine_id.into(),
                transport_mode: "none".to_string(),
                provider: None,
                run_id: run_id.into(),
                flow_key: flow_key.into(),
                step_id: step_id.into(),
                agent_key: agent_key.into(),
                attempt: 1,
                started_at: String::new(),
                ended_at: String::new(),
                duration_ms: 0,
                status: crate::step::StepStatus::Pass,
                token_usage: None,
                evidence: Evidence::Unmeasured {
                    measured: false,
                    reason: "no evidence recorded".to_string(),
                },
                critic_verdicts: BTreeMap::new(),
                context_truncation: None,
                error: None,
                routing_signal: None,
                forensic_summary: None,
                receipt_sha256: None,
            },
        }
    }

    /// Set the attempt index (1-based).
    #[must_use]
    pub fn attempt(mut self, attempt: u32) -> Self {
        self.receipt.attempt = attempt;
        self
    }

    /// Set the transport-mode fallback strategy.
    #[must_use]
    pub fn transport_mode(mut self, mode: impl Into<String>) -> Self {
        self.receipt.transport_mode = mode.into();
        self
    }

    /// Set the provider identifier.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.receipt.provider = Some(provider.into());
        self
    }

    /// Set start/end timestamps and derived duration.
    #[must_use]
    pub fn timing(mut self, started_at: impl Into<String>, ended_at: impl Into<String>, duration_ms: u64) -> Self {
        self.receipt.started_at = started_at.into();
        self.receipt.ended_at = ended_at.into();
        self.receipt.duration_ms = duration_ms;
        self
    }

    /// Set terminal status.
    #[must_use]
    pub fn status(mut self, status: crate::step::StepStatus) -> Self {
        self.receipt.status = status;
        self
    }

    /// Set token usage.
    #[must_use]
    pub fn token_usage(mut self, usage: TokenUsage) -> Self {
        self.receipt.token_usage = Some(usage);
        self
    }

    /// Set the evidence pointer.
    #[must_use]
    pub fn evidence(mut self, evidence: Evidence) -> Self {
        self.receipt.evidence = evidence;
        self
    }

    /// Record a critic verdict under `role`.
    #[must_use]
    pub fn critic_verdict(mut self, role: impl Into<String>, verdict: CriticVerdict) -> Self {
        self.receipt.critic_verdicts.insert(role.into(), verdict);
        self
    }

    /// Attach context-truncation metrics.
    #[must_use]
    pub fn context_truncation(mut self, truncation: ContextTruncation) -> Self {
        self.receipt.context_truncation = Some(truncation);
        self
    }

    /// Attach a structured error (required for any non-PASS status).
    #[must_use]
    pub fn error(mut self, error: HarnessErrorDto) -> Self {
        self.receipt.error = Some(error);
        self
    }

    /// Set the routing signal observed on this step's output.
    #[must_use]
    pub fn routing_signal(mut self, decision: RoutingDecision) -> Self {
        self.receipt.routing_signal = Some(decision);
        self
    }

    /// Set the critic-produced forensic tag.
    #[must_use]
    pub fn forensic_summary(mut self, summary: impl Into<String>) -> Self {
        self.receipt.forensic_summary = Some(summary.into());
        self
    }

    /// Finalize: compute `receipt_sha256` and return the built [`Receipt`].
    #[must_use]
    pub fn build(mut self) -> Receipt {
        self.receipt.finalize_hash();
        self.receipt
    }
}

// ---------------------------------------------------------------------------
// Handoff envelope
// ---------------------------------------------------------------------------

/// Tier caps in UTF-8 bytes of the serialized envelope, approximating the
/// spec's token caps (≤500 / ≤2000 / ≤5000 tokens) at a conservative 4
/// bytes/token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HandoffTier {
    /// ≤500 tokens.
    Minimal,
    /// ≤2000 tokens.
    Standard,
    /// ≤5000 tokens.
    Heavy,
}

impl HandoffTier {
    /// Byte cap for this tier (4 bytes/token approximation).
    #[must_use]
    pub fn byte_cap(self) -> usize {
        match self {
            Self::Minimal => 500 * 4,
            Self::Standard => 2000 * 4,
            Self::Heavy => 5000 * 4,
        }
    }
}

/// A bounded, pointer-dominant structure carrying state between steps.
/// Prose is forbidden: `notes` exists for terse rationale only, and
/// `pointers` must reference artifacts already written to disk rather than
/// embed their content (invariant 4).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HandoffEnvelope {
    /// Declared tier, bounding this envelope's serialized size.
    pub tier: HandoffTier,
    /// Originating step id.
    pub from_step: String,
    /// Destination step id.
    pub to_step: String,
    /// Pointers to on-disk artifacts (paths relative to the flow
    /// directory); content dominates via reference, never by value.
    #[serde(default)]
    pub pointers: Vec<String>,
    /// Structured fields the destination step may consume directly.
    #[serde(default)]
    pub structured_fields: BTreeMap<String, serde_json::Value>,
    /// Short rationale; not a substitute for pointers.
    #[serde(default)]
    pub notes: String,
}

impl HandoffEnvelope {
    /// Serialized byte length of this envelope.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(usize::MAX)
    }

    /// Whether this envelope fits within its declared tier's cap
    /// (testable property "handoff size bound").
    #[must_use]
    pub fn within_cap(&self) -> bool {
        self.serialized_len() <= self.tier.byte_cap()
    }

    /// Deterministic on-disk filename (mirrors the receipt's naming).
    #[must_use]
    pub fn file_name(&self, agent_key: &str) -> String {
        format!("{}-{}.json", self.from_step, agent_key)
    }
}

// ---------------------------------------------------------------------------
// Degradation log (schema v1.1)
// ---------------------------------------------------------------------------

/// Blocking tier of a degradation entry's originating selftest step.
/// `Kernel` is deliberately absent: KERNEL-tier failures are never logged
/// here (invariant, §3 "Degradation Entry").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DegradationSeverity {
    /// Critical, non-blocking-in-degraded-mode failure.
    Critical,
    /// Warning-level issue.
    Warning,
    /// Informational-only issue.
    Info,
}

/// Status of the selftest step that produced this entry. Only failing
/// statuses are ever logged here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum DegradationStatus {
    /// The step failed its check.
    Fail,
    /// The step exceeded its timeout.
    Timeout,
}

/// One JSONL line in `selftest_degradations.log` (schema v1.1).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DegradationEntry {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Selftest step id that produced this entry.
    pub step_id: String,
    /// Human-readable step name.
    pub step_name: String,
    /// Non-KERNEL tier (`"governance"` or `"optional"`).
    pub tier: String,
    /// Terminal status; never anything but FAIL/TIMEOUT.
    pub status: DegradationStatus,
    /// Short machine-readable reason.
    pub reason: String,
    /// Human-readable message.
    pub message: String,
    /// Severity classification.
    pub severity: DegradationSeverity,
    /// Suggested remediation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl DegradationEntry {
    /// Whether this entry satisfies the degradation-log invariants
    /// (testable property): tier is never "kernel"; status is FAIL or
    /// TIMEOUT.
    #[must_use]
    pub fn satisfies_invariants(&self) -> bool {
        self.tier != "kernel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepStatus;

    #[test]
    fn receipt_hash_is_stable_across_rebuilds() {
        let a = ReceiptBuilder::new("run-1", "signal", "normalize", "signal-normalizer", "stub")
            .timing("2026-01-01T00:00:00Z", "2026-01-01T00:00:01Z", 1000)
            .status(StepStatus::Pass)
            .build();
        let b = ReceiptBuilder::new("run-1", "signal", "normalize", "signal-normalizer", "stub")
            .timing("2026-01-01T00:00:00Z", "2026-01-01T00:00:01Z", 1000)
            .status(StepStatus::Pass)
            .build();
        assert_eq!(a.receipt_sha256, b.receipt_sha256);
    }

    #[test]
    fn receipt_hash_changes_with_status() {
        let a = ReceiptBuilder::new("run-1", "signal", "normalize", "signal-normalizer", "stub")
            .status(StepStatus::Pass)
            .build();
        let b = ReceiptBuilder::new("run-1", "signal", "normalize", "signal-normalizer", "stub")
            .status(StepStatus::Fail)
            .build();
        assert_ne!(a.receipt_sha256, b.receipt_sha256);
    }

    #[test]
    fn deterministic_receipt_file_name() {
        let r = ReceiptBuilder::new("run-1", "signal", "normalize", "signal-normalizer", "stub").build();
        assert_eq!(r.file_name(), "normalize-signal-normalizer.json");
    }

    #[test]
    fn handoff_within_cap() {
        let env = HandoffEnvelope {
            tier: HandoffTier::Minimal,
            from_step: "normalize".into(),
            to_step: "next".into(),
            pointers: vec!["signal/problem_statement.md".into()],
            structured_fields: BTreeMap::new(),
            notes: "ok".into(),
        };
        assert!(env.within_cap());
    }

    #[test]
    fn handoff_over_cap_detected() {
        let env = HandoffEnvelope {
            tier: HandoffTier::Minimal,
            from_step: "normalize".into(),
            to_step: "next".into(),
            pointers: vec![],
            structured_fields: BTreeMap::new(),
            notes: "x".repeat(5000),
        };
        assert!(!env.within_cap());
    }

    #[test]
    fn degradation_entry_rejects_kernel_tier() {
        let entry = DegradationEntry {
            timestamp: "2026-01-01T00:00:00Z".into(),
            step_id: "agents-governance".into(),
            step_name: "agents governance".into(),
            tier: "kernel".into(),
            status: DegradationStatus::Fail,
            reason: "x".into(),
            message: "x".into(),
            severity: DegradationSeverity::Critical,
            remediation: None,
        };
        assert!(!entry.satisfies_invariants());
    }
}
