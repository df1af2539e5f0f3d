//! Step-level metrics collection and aggregation, adapted directly from a
//! production backend-run metrics collector to this harness's step/flow
//! grain (engine id in place of backend name, microloop retries in place
//! of emulation-layer counts).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metrics captured for one completed step attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct StepMetrics {
    /// Flow the step belongs to.
    pub flow_key: String,
    /// Step id.
    pub step_id: String,
    /// Transport engine id that executed the step.
    pub engine: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Inbound (prompt) token count.
    pub tokens_in: u64,
    /// Outbound (completion) token count.
    pub tokens_out: u64,
    /// Microloop re-ask attempts consumed.
    pub microloop_retries: u64,
    /// Errors encountered during the step.
    pub errors_count: u64,
}

/// Aggregated statistics across multiple step metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct MetricsSummary {
    /// Number of step attempts recorded.
    pub count: usize,
    /// Mean duration in milliseconds.
    pub mean_duration_ms: f64,
    /// Median (p50) duration in milliseconds.
    pub p50_duration_ms: f64,
    /// 99th-percentile duration in milliseconds.
    pub p99_duration_ms: f64,
    /// Total inbound tokens across all recorded attempts.
    pub total_tokens_in: u64,
    /// Total outbound tokens across all recorded attempts.
    pub total_tokens_out: u64,
    /// Error rate (errors / attempts).
    pub error_rate: f64,
    /// Per-engine attempt counts (deterministic ordering).
    pub engine_counts: BTreeMap<String, usize>,
}

impl Default for MetricsSummary {
    fn default() -> Self {
        Self {
            count: 0,
            mean_duration_ms: 0.0,
            p50_duration_ms: 0.0,
            p99_duration_ms: 0.0,
            total_tokens_in: 0,
            total_tokens_out: 0,
            error_rate: 0.0,
            engine_counts: BTreeMap::new(),
        }
    }
}

/// Compute a percentile value from a **sorted** slice.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

/// Thread-safe collector for step metrics. Wrap in an `Arc` to share
/// across threads (the inner storage is already behind a `Mutex`).
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<Vec<StepMetrics>>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a new, empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Record one step attempt's metrics.
    pub fn record(&self, metrics: StepMetrics) {
        let mut data = self.inner.lock().expect("metrics lock poisoned");
        data.push(metrics);
    }

    /// All recorded step metrics, in recording order.
    #[must_use]
    pub fn entries(&self) -> Vec<StepMetrics> {
        let data = self.inner.lock().expect("metrics lock poisoned");
        data.clone()
    }

    /// Number of attempts recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("metrics lock poisoned").len()
    }

    /// Whether the collector has no recorded attempts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compute an aggregated summary of all recorded attempts.
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        let data = self.inner.lock().expect("metrics lock poisoned");
        if data.is_empty() {
            return MetricsSummary::default();
        }

        let count = data.len();
        let mut durations: Vec<u64> = data.iter().map(|r| r.duration_ms).collect();
        durations.sort_unstable();

        let total_duration: u64 = durations.iter().sum();
        let mean_duration_ms = total_duration as f64 / count as f64;
        let p50_duration_ms = percentile(&durations, 50.0);
        let p99_duration_ms = percentile(&durations, 99.0);

        let total_tokens_in: u64 = data.iter().map(|r| r.tokens_in).sum();
        let total_tokens_out: u64 = data.iter().map(|r| r.tokens_out).sum();

        let errors: u64 = data.iter().map(|r| r.errors_count).sum();
        let error_rate = errors as f64 / count as f64;

        let mut engine_counts: BTreeMap<String, usize> = BTreeMap::new();
        for r in data.iter() {
            *engine_counts.entry(r.engine.clone()).or_insert(0) += 1;
        }

        MetricsSummary {
            count,
            mean_duration_ms,
            p50_duration_ms,
            p99_duration_ms,
            total_tokens_in,
            total_tokens_out,
            error_rate,
            engine_counts,
        }
    }

    /// Clear all recorded metrics.
    pub fn clear(&self) {
        self.inner.lock().expect("metrics lock poisoned").clear();
    }
}
