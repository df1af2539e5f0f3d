// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for the SDLC harness.
//!
//! Every harness error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context. Use the builder returned by
//! [`HarnessError::new`] to construct errors fluently. Errors never unwind
//! across the Flow Orchestrator boundary: they are converted into a
//! terminal [`crate::ErrorCode`] on a receipt's `error` field first.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration / flow-graph validation errors.
    Config,
    /// Run-store / artifact-writer errors.
    Store,
    /// Context budgeting errors.
    Budget,
    /// Transport-port errors.
    Transport,
    /// Structured-output parsing errors.
    Protocol,
    /// Handoff-envelope errors.
    Handoff,
    /// Timeout / cancellation errors.
    Timeout,
    /// Missing-artifact errors.
    Artifact,
    /// Selftest / governance errors.
    Governance,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Store => "store",
            Self::Budget => "budget",
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Handoff => "handoff",
            Self::Timeout => "timeout",
            Self::Artifact => "artifact",
            Self::Governance => "governance",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code, one per error taxonomy kind.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Invalid flow, cycle, or unknown agent key; surfaced at load, exit 2.
    ConfigError,
    /// Attempt to write outside the run root.
    PathViolation,
    /// A write would exceed the per-artifact capacity cap.
    CapacityExceeded,
    /// Prompt cannot fit the assigned budget.
    BudgetInfeasible,
    /// Transport backend failure.
    TransportError,
    /// Structured-output parsing failure.
    StructuredOutputError,
    /// Handoff envelope exceeds its tier cap.
    HandoffOverflow,
    /// Wall-clock timeout exceeded.
    Timeout,
    /// Required input artifact absent.
    ArtifactMissing,
    /// Selftest step failed; tier determines blocking.
    GovernanceFailure,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError => ErrorCategory::Config,
            Self::PathViolation | Self::CapacityExceeded => ErrorCategory::Store,
            Self::BudgetInfeasible => ErrorCategory::Budget,
            Self::TransportError => ErrorCategory::Transport,
            Self::StructuredOutputError => ErrorCategory::Protocol,
            Self::HandoffOverflow => ErrorCategory::Handoff,
            Self::Timeout => ErrorCategory::Timeout,
            Self::ArtifactMissing => ErrorCategory::Artifact,
            Self::GovernanceFailure => ErrorCategory::Governance,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"CONFIG_ERROR"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigError => "CONFIG_ERROR",
            Self::PathViolation => "PATH_VIOLATION",
            Self::CapacityExceeded => "CAPACITY_EXCEEDED",
            Self::BudgetInfeasible => "BUDGET_INFEASIBLE",
            Self::TransportError => "TRANSPORT_ERROR",
            Self::StructuredOutputError => "STRUCTURED_OUTPUT_ERROR",
            Self::HandoffOverflow => "HANDOFF_OVERFLOW",
            Self::Timeout => "TIMEOUT",
            Self::ArtifactMissing => "ARTIFACT_MISSING",
            Self::GovernanceFailure => "GOVERNANCE_FAILURE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// HarnessError
// ---------------------------------------------------------------------------

/// Unified harness error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Examples
///
/// ```
/// use harness_error::{HarnessError, ErrorCode};
///
/// let err = HarnessError::new(ErrorCode::Timeout, "step exceeded wall_clock_timeout")
///     .with_context("step_id", "normalize")
///     .with_context("timeout_ms", 30_000);
/// ```
pub struct HarnessError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl HarnessError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("HarnessError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for HarnessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support — the `error` field embedded in a Receipt.
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`HarnessError`] (without the opaque source),
/// embedded verbatim as a receipt's `error` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct HarnessErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context (e.g. `reason: "blocked_missing_input"`).
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&HarnessError> for HarnessErrorDto {
    fn from(err: &HarnessError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<HarnessErrorDto> for HarnessError {
    fn from(dto: HarnessErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::ConfigError,
        ErrorCode::PathViolation,
        ErrorCode::CapacityExceeded,
        ErrorCode::BudgetInfeasible,
        ErrorCode::TransportError,
        ErrorCode::StructuredOutputError,
        ErrorCode::HandoffOverflow,
        ErrorCode::Timeout,
        ErrorCode::ArtifactMissing,
        ErrorCode::GovernanceFailure,
        ErrorCode::Internal,
    ];

    #[test]
    fn basic_construction() {
        let err = HarnessError::new(ErrorCode::Internal, "boom");
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = HarnessError::new(ErrorCode::ArtifactMissing, "problem_statement.md absent");
        assert_eq!(
            err.to_string(),
            "[ARTIFACT_MISSING] problem_statement.md absent"
        );
    }

    #[test]
    fn display_with_context() {
        let err = HarnessError::new(ErrorCode::Timeout, "timed out")
            .with_context("timeout_ms", 30_000);
        let s = err.to_string();
        assert!(s.starts_with("[TIMEOUT] timed out"));
        assert!(s.contains("timeout_ms"));
    }

    #[test]
    fn builder_chaining_all() {
        let src = io::Error::other("underlying");
        let err = HarnessError::new(ErrorCode::ConfigError, "bad config")
            .with_context("file", "flows.toml")
            .with_source(src);
        assert_eq!(err.code, ErrorCode::ConfigError);
        assert_eq!(err.context["file"], serde_json::json!("flows.toml"));
        assert!(err.source.is_some());
    }

    #[test]
    fn category_mapping_matches_spec_taxonomy() {
        assert_eq!(ErrorCode::ConfigError.category(), ErrorCategory::Config);
        assert_eq!(ErrorCode::PathViolation.category(), ErrorCategory::Store);
        assert_eq!(
            ErrorCode::CapacityExceeded.category(),
            ErrorCategory::Store
        );
        assert_eq!(
            ErrorCode::BudgetInfeasible.category(),
            ErrorCategory::Budget
        );
        assert_eq!(
            ErrorCode::TransportError.category(),
            ErrorCategory::Transport
        );
        assert_eq!(
            ErrorCode::StructuredOutputError.category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            ErrorCode::HandoffOverflow.category(),
            ErrorCategory::Handoff
        );
        assert_eq!(ErrorCode::Timeout.category(), ErrorCategory::Timeout);
        assert_eq!(
            ErrorCode::ArtifactMissing.category(),
            ErrorCategory::Artifact
        );
        assert_eq!(
            ErrorCode::GovernanceFailure.category(),
            ErrorCategory::Governance
        );
        assert_eq!(ErrorCode::Internal.category(), ErrorCategory::Internal);
    }

    #[test]
    fn all_codes_have_unique_as_str() {
        let mut seen = HashSet::new();
        for code in ALL_CODES {
            assert!(seen.insert(code.as_str()), "duplicate as_str: {code:?}");
        }
        assert_eq!(seen.len(), ALL_CODES.len());
    }

    #[test]
    fn error_code_count_matches_spec_taxonomy() {
        // §7 lists 9 kinds; we add CAPACITY_EXCEEDED (part of §4.1's
        // PathViolation/CapacityExceeded pair) and INTERNAL as a catch-all.
        assert_eq!(ALL_CODES.len(), 11);
    }

    #[test]
    fn all_codes_serialize_to_as_str() {
        for code in ALL_CODES {
            let json = serde_json::to_string(code).unwrap();
            assert_eq!(json, format!(r#""{}""#, code.as_str()));
        }
    }

    #[test]
    fn dto_roundtrip_without_source() {
        let err = HarnessError::new(ErrorCode::HandoffOverflow, "too big")
            .with_context("tier", "standard");
        let dto: HarnessErrorDto = (&err).into();
        let json = serde_json::to_string(&dto).unwrap();
        let back: HarnessErrorDto = serde_json::from_str(&json).unwrap();
        assert_eq!(dto, back);
        assert!(back.source_message.is_none());
    }

    #[test]
    fn std_error_source_chain() {
        let inner = io::Error::new(io::ErrorKind::NotFound, "not found");
        let err = HarnessError::new(ErrorCode::PathViolation, "outside root").with_source(inner);
        let src = std::error::Error::source(&err).unwrap();
        assert_eq!(src.to_string(), "not found");
    }
}
