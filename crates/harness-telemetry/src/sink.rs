//! Pluggable log sinks for the [`crate::manager::BackendManager`] fanout
//! (§4.8): stdout plus push-style backends (Datadog, CloudWatch). Prometheus
//! is pull-based and has no sink here — its scrape surface is exposed by
//! the HTTP layer, not pushed from this crate.

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::record::LogRecord;

/// A destination a [`LogRecord`] can be fanned out to.
pub trait LogSink: Send + Sync {
    /// Sink name, used in error messages and the strict-mode receipt field.
    fn name(&self) -> &str;

    /// Deliver one record. Sinks that can fail (network backends) should
    /// return `Err` rather than panic; the manager isolates the failure.
    fn emit(&self, record: &LogRecord) -> Result<(), String>;
}

/// Writes one JSON line per record to any `Write`r (stdout in production,
/// an in-memory buffer in tests).
pub struct StdoutSink<W: Write + Send> {
    name: &'static str,
    out: Mutex<W>,
}

impl<W: Write + Send> StdoutSink<W> {
    /// Wrap `out` as a sink.
    pub fn new(out: W) -> Self {
        Self { name: "stdout", out: Mutex::new(out) }
    }
}

impl StdoutSink<std::io::Stdout> {
    /// The production sink, writing to the process's stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> LogSink for StdoutSink<W> {
    fn name(&self) -> &str {
        self.name
    }

    fn emit(&self, record: &LogRecord) -> Result<(), String> {
        let line = serde_json::to_string(record).map_err(|e| e.to_string())?;
        let mut out = self.out.lock().map_err(|_| "stdout sink lock poisoned".to_string())?;
        writeln!(out, "{line}").map_err(|e| e.to_string())
    }
}

/// A push-style HTTP backend (Datadog, CloudWatch, or any webhook-shaped
/// ingestion endpoint). The actual transport is injected as a closure so
/// this crate does not need to own an HTTP client stack just to fan out a
/// JSON line — tests supply a recording closure, production supplies
/// whatever client the deployment already uses.
pub struct HttpPushSink {
    name: String,
    endpoint: String,
    poster: Arc<dyn Fn(&str, &[u8]) -> Result<(), String> + Send + Sync>,
}

impl HttpPushSink {
    /// Build a sink that posts each record's JSON body to `endpoint` via
    /// `poster(endpoint, body)`.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        poster: impl Fn(&str, &[u8]) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Self { name: name.into(), endpoint: endpoint.into(), poster: Arc::new(poster) }
    }
}

impl LogSink for HttpPushSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn emit(&self, record: &LogRecord) -> Result<(), String> {
        let body = serde_json::to_vec(record).map_err(|e| e.to_string())?;
        (self.poster)(&self.endpoint, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogLevel;

    fn sample() -> LogRecord {
        LogRecord::new(LogLevel::Info, "run-1", "plan", None, None, "hello")
    }

    #[test]
    fn stdout_sink_writes_one_json_line() {
        let buf: Vec<u8> = Vec::new();
        let sink = StdoutSink::new(buf);
        sink.emit(&sample()).unwrap();
        let out = sink.out.lock().unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"message\":\"hello\""));
    }

    #[test]
    fn http_push_sink_calls_injected_poster_with_endpoint() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink = HttpPushSink::new("datadog", "https://intake.example/v1/logs", move |endpoint, body| {
            seen_clone.lock().unwrap().push((endpoint.to_string(), body.to_vec()));
            Ok(())
        });
        sink.emit(&sample()).unwrap();
        let calls = seen.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://intake.example/v1/logs");
    }

    #[test]
    fn http_push_sink_surfaces_poster_failure() {
        let sink = HttpPushSink::new("cloudwatch", "https://logs.example", |_, _| Err("connection refused".to_string()));
        assert!(sink.emit(&sample()).is_err());
    }
}
