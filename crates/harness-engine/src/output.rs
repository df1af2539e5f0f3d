//! Parsing a step's declared structured output (§4.4 step 5): the handoff
//! envelope plus an optional routing signal, extracted from the
//! transport's terminal `result` event.

use harness_core::{Evidence, HandoffEnvelope, HandoffTier, RoutingDecision};
use harness_error::{ErrorCode, HarnessError};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// The structured payload a step's transport must ultimately produce.
#[derive(Debug, Clone, Deserialize)]
pub struct StepOutputPayload {
    /// Evidence pointer for the receipt.
    pub evidence: Evidence,
    /// Pointers to on-disk artifacts for the handoff envelope.
    #[serde(default)]
    pub pointers: Vec<String>,
    /// Structured fields for the handoff envelope.
    #[serde(default)]
    pub structured_fields: BTreeMap<String, Value>,
    /// Short rationale for the handoff envelope (not a substitute for pointers).
    #[serde(default)]
    pub notes: String,
    /// Routing signal observed by a critic step, if any. Absent means
    /// implicit `CONTINUE` (§4.6).
    #[serde(default)]
    pub routing_signal: Option<RoutingDecision>,
    /// Forensic tag for detour-catalog matching, if any.
    #[serde(default)]
    pub forensic_summary: Option<String>,
}

impl StepOutputPayload {
    /// Parse from a transport's raw JSON output (the `None`/`BestEffort`
    /// strategies both end up calling this once they have a `Value`).
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] with `ErrorCode::StructuredOutputError` if
    /// `value` does not match the expected shape.
    pub fn from_value(value: &Value) -> Result<Self, HarnessError> {
        serde_json::from_value(value.clone()).map_err(|e| {
            HarnessError::new(ErrorCode::StructuredOutputError, "failed to parse step output payload")
                .with_source(e)
        })
    }

    /// Parse from raw text using the `BestEffort` fenced-block strategy.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] if no fenced block is present or its
    /// contents do not parse as a [`StepOutputPayload`].
    pub fn from_best_effort_text(text: &str) -> Result<Self, HarnessError> {
        let block = harness_transport::structured_output::extract_fenced_block(text).ok_or_else(|| {
            HarnessError::new(
                ErrorCode::StructuredOutputError,
                "no fenced JSON block found in transport output",
            )
        })?;
        let value: Value = serde_json::from_str(block).map_err(|e| {
            HarnessError::new(ErrorCode::StructuredOutputError, "fenced block is not valid JSON").with_source(e)
        })?;
        Self::from_value(&value)
    }

    /// Build the [`HandoffEnvelope`] this step passes to `to_step`.
    #[must_use]
    pub fn into_handoff(self, from_step: impl Into<String>, to_step: impl Into<String>, tier: HandoffTier) -> HandoffEnvelope {
        HandoffEnvelope {
            tier,
            from_step: from_step.into(),
            to_step: to_step.into(),
            pointers: self.pointers,
            structured_fields: self.structured_fields,
            notes: self.notes,
        }
    }
}
