//! Response envelopes for the read-only HTTP surface (§6). Every payload
//! carries a `version` field; a breaking shape change requires bumping
//! [`crate::HTTP_API_VERSION`].

use harness_core::{DegradationEntry, Receipt, StepStatus};
use harness_selftest::{Severity, Tier};
use serde::{Deserialize, Serialize};

/// One entry in `GET /api/runs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run directory name.
    pub run_id: String,
    /// RFC 3339 last-modified time of the run directory.
    pub modified_at: String,
    /// Pipeline flow keys with at least an empty directory present.
    pub flows_present: Vec<String>,
}

/// `GET /api/runs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsResponse {
    /// Response schema version.
    pub version: u32,
    /// Page of runs, most recently modified first.
    pub runs: Vec<RunSummary>,
    /// Total runs under `RUN_BASE`, independent of pagination.
    pub total: usize,
    /// Page size requested.
    pub limit: usize,
    /// Page offset requested.
    pub offset: usize,
    /// Whether more runs exist past this page.
    pub has_more: bool,
}

/// `GET /api/runs/<id>/timeline`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineResponse {
    /// Response schema version.
    pub version: u32,
    /// The run this timeline belongs to.
    pub run_id: String,
    /// Every log record across every flow, in chronological order.
    pub events: Vec<harness_telemetry::LogRecord>,
}

/// One step's timing entry in `GET /api/runs/<id>/flows/<flow>/timing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTiming {
    /// Step id.
    pub step_id: String,
    /// Agent that executed the step.
    pub agent_key: String,
    /// Final attempt index recorded.
    pub attempt: u32,
    /// Terminal status.
    pub status: StepStatus,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Attempt start time.
    pub started_at: String,
    /// Attempt end time.
    pub ended_at: String,
}

/// `GET /api/runs/<id>/flows/<flow>/timing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowTimingResponse {
    /// Response schema version.
    pub version: u32,
    /// The flow this timing summary belongs to.
    pub flow_key: String,
    /// One entry per receipted step, ordered by start time.
    pub steps: Vec<StepTiming>,
}

/// `GET /api/runs/<id>/flows/<flow>/steps/<step>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDetailResponse {
    /// Response schema version.
    pub version: u32,
    /// The step's current receipt.
    pub receipt: Receipt,
}

/// One step's registry entry in `GET /api/selftest/plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelftestStepSummary {
    /// Step id.
    pub step_id: String,
    /// Human-readable name.
    pub name: String,
    /// Blocking tier.
    pub tier: Tier,
    /// Severity classification.
    pub severity: Severity,
    /// Report category grouping.
    pub category: String,
    /// Declared dependency step ids.
    pub dependencies: Vec<String>,
}

/// `GET /api/selftest/plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelftestPlanResponse {
    /// Response schema version.
    pub version: u32,
    /// The fixed 16-step plan.
    pub steps: Vec<SelftestStepSummary>,
}

/// Governance rollup for `GET /platform/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlatformStatus {
    /// No failing step at or above warning severity.
    Green,
    /// At least one warning-severity failure, no critical failure.
    Yellow,
    /// At least one critical-severity failure.
    Red,
}

/// `GET /platform/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformStatusResponse {
    /// Response schema version.
    pub version: u32,
    /// The rollup.
    pub status: PlatformStatus,
    /// The run this rollup was computed from, if one was requested and found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// `GET /api/selftest/degradations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationsResponse {
    /// Response schema version.
    pub version: u32,
    /// The degradation log tail, most recent last.
    pub entries: Vec<DegradationEntry>,
}

/// A structured error body for any non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable error code (`"not_found"`, `"invalid_request"`, ...).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// Build an error with the given code and message.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }

    /// 404 — resource not found.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    /// 400 — the request was malformed or invalid.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new("invalid_request", message)
    }

    /// 500 — unexpected internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}
