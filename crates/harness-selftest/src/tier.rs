//! Blocking tier and severity classification for selftest steps (§4.7).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which run modes a step's failure blocks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    /// Blocks every mode, including `degraded`.
    Kernel,
    /// Blocks `strict` only; in `degraded` mode, logs to the degradation log.
    Governance,
    /// Never blocks; always logs to the degradation log on failure.
    Optional,
}

impl Tier {
    /// Lowercase tag used in [`crate::report::SelfTestMetadata`] and the
    /// degradation log's `tier` field.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kernel => "kernel",
            Self::Governance => "governance",
            Self::Optional => "optional",
        }
    }
}

/// Human severity classification, independent of blocking tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational only.
    Info,
    /// Worth a human's attention but not urgent.
    Warning,
    /// Demands attention regardless of blocking tier.
    Critical,
}

impl Severity {
    /// Lowercase tag used in report summaries.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}
