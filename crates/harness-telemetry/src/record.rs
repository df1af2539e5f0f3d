//! The JSONL log spine record (§4.8): one line per event, written as a
//! distinct on-disk artifact rather than routed through `tracing` (§10.1).

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Log level, in increasing severity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Developer-only detail.
    Debug,
    /// Normal operational event.
    Info,
    /// Recoverable problem worth attention.
    Warn,
    /// A step or flow failed.
    Error,
}

/// One JSONL line in a log spine. Never carries secrets, file contents,
/// PII, or raw LLM responses — those belong in `llm/*.jsonl` transcripts.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LogRecord {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Severity.
    pub level: LogLevel,
    /// The run this event belongs to.
    pub run_id: String,
    /// The flow this event belongs to.
    pub flow_key: String,
    /// The step this event belongs to, if any (run-level events have none).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// The agent this event belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_key: Option<String>,
    /// Human-readable message.
    pub message: String,
}

impl LogRecord {
    /// Build a record stamped with the current time.
    #[must_use]
    pub fn new(
        level: LogLevel,
        run_id: impl Into<String>,
        flow_key: impl Into<String>,
        step_id: Option<String>,
        agent_key: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            level,
            run_id: run_id.into(),
            flow_key: flow_key.into(),
            step_id,
            agent_key,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&LogLevel::Warn).unwrap(), "\"WARN\"");
    }

    #[test]
    fn record_omits_absent_step_and_agent() {
        let record = LogRecord::new(LogLevel::Info, "run-1", "plan", None, None, "started");
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("step_id"));
        assert!(!json.contains("agent_key"));
    }

    #[test]
    fn record_round_trips() {
        let record = LogRecord::new(
            LogLevel::Error,
            "run-1",
            "build",
            Some("author".to_string()),
            Some("implementer".to_string()),
            "transport failed",
        );
        let json = serde_json::to_string(&record).unwrap();
        let back: LogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message, "transport failed");
        assert_eq!(back.step_id.as_deref(), Some("author"));
    }
}
