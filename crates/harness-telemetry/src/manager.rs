//! Backend manager (§4.8): fans one [`LogRecord`] out to every registered
//! sink. A broken sink never aborts a step unless strict mode is set, in
//! which case the failure surfaces as a `TRANSPORT_ERROR` the caller can
//! fold into the step's receipt without aborting the flow.

use harness_error::{ErrorCode, HarnessError};
use tracing::warn;

use crate::record::LogRecord;
use crate::sink::LogSink;

/// Fans a [`LogRecord`] out to zero or more [`LogSink`]s.
pub struct BackendManager {
    sinks: Vec<Box<dyn LogSink>>,
    strict: bool,
}

impl Default for BackendManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendManager {
    /// An empty manager (no sinks, isolated-failure mode).
    #[must_use]
    pub fn new() -> Self {
        Self { sinks: Vec::new(), strict: false }
    }

    /// Register a sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Set strict mode: any sink failure becomes a `TRANSPORT_ERROR` instead
    /// of a logged-and-swallowed warning.
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Deliver `record` to every sink, isolating failures unless strict.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] with [`ErrorCode::TransportError`] only in
    /// strict mode, and only if at least one sink failed.
    pub fn emit(&self, record: &LogRecord) -> Result<(), HarnessError> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.emit(record) {
                failures.push(format!("{}: {e}", sink.name()));
            }
        }
        if failures.is_empty() {
            return Ok(());
        }
        if self.strict {
            return Err(HarnessError::new(ErrorCode::TransportError, "one or more telemetry sinks failed in strict mode")
                .with_context("failures", failures.join("; ")));
        }
        warn!(failures = %failures.join("; "), "telemetry sink failure isolated (non-strict mode)");
        Ok(())
    }

    /// Number of registered sinks.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogLevel;
    use crate::sink::HttpPushSink;

    fn sample() -> LogRecord {
        LogRecord::new(LogLevel::Info, "run-1", "plan", None, None, "hello")
    }

    #[test]
    fn non_strict_isolates_a_failing_sink() {
        let manager = BackendManager::new()
            .with_sink(Box::new(HttpPushSink::new("flaky", "https://x", |_, _| Err("down".to_string()))));
        assert!(manager.emit(&sample()).is_ok());
    }

    #[test]
    fn strict_surfaces_a_failing_sink() {
        let manager = BackendManager::new()
            .with_sink(Box::new(HttpPushSink::new("flaky", "https://x", |_, _| Err("down".to_string()))))
            .strict(true);
        let err = manager.emit(&sample()).unwrap_err();
        assert_eq!(err.code, ErrorCode::TransportError);
    }

    #[test]
    fn all_sinks_succeeding_is_ok_in_either_mode() {
        let manager = BackendManager::new()
            .with_sink(Box::new(HttpPushSink::new("ok", "https://x", |_, _| Ok(()))))
            .strict(true);
        assert!(manager.emit(&sample()).is_ok());
    }
}
