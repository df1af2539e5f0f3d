//! Writes the JSONL log spine as a distinct on-disk artifact via
//! [`RunStore::append_jsonl`] (§10.1: not routed through `tracing`), with an
//! optional [`BackendManager`] fanout to external sinks.

use harness_error::HarnessError;
use harness_store::RunStore;

use crate::manager::BackendManager;
use crate::record::{LogLevel, LogRecord};

/// A log spine writer scoped to one run and flow.
pub struct LogAppender<'a> {
    store: &'a RunStore,
    run_id: String,
    flow_key: String,
    backends: Option<BackendManager>,
}

impl<'a> LogAppender<'a> {
    /// Scope an appender to `run_id`/`flow_key`; `store` must already be
    /// rooted at that run.
    #[must_use]
    pub fn new(store: &'a RunStore, run_id: impl Into<String>, flow_key: impl Into<String>) -> Self {
        Self { store, run_id: run_id.into(), flow_key: flow_key.into(), backends: None }
    }

    /// Attach a backend manager; every record written to disk is also
    /// fanned out to its sinks.
    #[must_use]
    pub fn with_backends(mut self, backends: BackendManager) -> Self {
        self.backends = Some(backends);
        self
    }

    /// Append one record, scoped to a step/agent if given, or to the
    /// run-level log if `step_id` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] if the disk write fails, or — in strict
    /// backend mode only — if a sink failed.
    pub fn log(
        &self,
        level: LogLevel,
        step_id: Option<&str>,
        agent_key: Option<&str>,
        message: impl Into<String>,
    ) -> Result<(), HarnessError> {
        let record = LogRecord::new(
            level,
            self.run_id.clone(),
            self.flow_key.clone(),
            step_id.map(str::to_string),
            agent_key.map(str::to_string),
            message,
        );
        let path = match step_id {
            Some(id) => self.store.log_path(&self.flow_key, id),
            None => self.store.run_log_path(),
        };
        self.store.append_jsonl(&path, &record)?;
        if let Some(backends) = &self.backends {
            backends.emit(&record)?;
        }
        Ok(())
    }

    /// Convenience for [`LogLevel::Debug`].
    pub fn debug(&self, step_id: Option<&str>, agent_key: Option<&str>, message: impl Into<String>) -> Result<(), HarnessError> {
        self.log(LogLevel::Debug, step_id, agent_key, message)
    }

    /// Convenience for [`LogLevel::Info`].
    pub fn info(&self, step_id: Option<&str>, agent_key: Option<&str>, message: impl Into<String>) -> Result<(), HarnessError> {
        self.log(LogLevel::Info, step_id, agent_key, message)
    }

    /// Convenience for [`LogLevel::Warn`].
    pub fn warn(&self, step_id: Option<&str>, agent_key: Option<&str>, message: impl Into<String>) -> Result<(), HarnessError> {
        self.log(LogLevel::Warn, step_id, agent_key, message)
    }

    /// Convenience for [`LogLevel::Error`].
    pub fn error(&self, step_id: Option<&str>, agent_key: Option<&str>, message: impl Into<String>) -> Result<(), HarnessError> {
        self.log(LogLevel::Error, step_id, agent_key, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_level_log_lands_in_run_log_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path(), "run-1").unwrap();
        let appender = LogAppender::new(&store, "run-1", "plan");
        appender.info(None, None, "flow started").unwrap();
        let bytes = store.read(&store.run_log_path()).unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains("flow started"));
    }

    #[test]
    fn step_level_log_lands_in_the_flow_log_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path(), "run-1").unwrap();
        let appender = LogAppender::new(&store, "run-1", "build");
        appender.error(Some("author"), Some("implementer"), "transport failed").unwrap();
        let bytes = store.read(&store.log_path("build", "author")).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("transport failed"));
        assert!(text.contains("\"ERROR\""));
    }

    #[test]
    fn multiple_logs_append_rather_than_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path(), "run-1").unwrap();
        let appender = LogAppender::new(&store, "run-1", "plan");
        appender.info(Some("author"), None, "first").unwrap();
        appender.info(Some("author"), None, "second").unwrap();
        let bytes = store.read(&store.log_path("plan", "author")).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap().lines().count(), 2);
    }
}
