// SPDX-License-Identifier: MIT OR Apache-2.0
//! Observability Emitter (§4.8): the JSONL log spine written alongside a
//! run's other artifacts, a pluggable backend fanout for external sinks
//! with isolated-failure-unless-strict semantics, and step metrics
//! collection/aggregation for the HTTP timing endpoints.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod appender;
pub mod manager;
pub mod metrics;
pub mod record;
pub mod sink;

pub use appender::LogAppender;
pub use manager::BackendManager;
pub use metrics::{MetricsCollector, MetricsSummary, StepMetrics};
pub use record::{LogLevel, LogRecord};
pub use sink::{HttpPushSink, LogSink, StdoutSink};
