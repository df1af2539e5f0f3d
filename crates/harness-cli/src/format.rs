//! Human-readable and JSON rendering of flow/selftest outcomes.

use harness_core::StepStatus;
use harness_orchestrator::{FlowOutcome, FlowOutcomeStatus};
use harness_selftest::{SelfTestOutcome, SelftestRunOutcome};
use serde::Serialize;

/// JSON-serializable summary of a flow run, independent of the crate's
/// internal [`FlowOutcome`] shape.
#[derive(Debug, Serialize)]
pub struct FlowOutcomeSummary {
    /// The flow that ran.
    pub flow_key: String,
    /// How the run ended.
    pub status: &'static str,
    /// One entry per step run, in execution order.
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Serialize)]
pub struct StepSummary {
    /// Step id.
    pub step_id: String,
    /// Agent that produced the receipt.
    pub agent_key: String,
    /// Terminal status.
    pub status: StepStatus,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl From<&FlowOutcome> for FlowOutcomeSummary {
    fn from(outcome: &FlowOutcome) -> Self {
        Self {
            flow_key: outcome.flow_key.clone(),
            status: match outcome.status {
                FlowOutcomeStatus::Completed => "completed",
                FlowOutcomeStatus::Terminated => "terminated",
            },
            steps: outcome
                .steps
                .iter()
                .map(|s| StepSummary {
                    step_id: s.step_id.clone(),
                    agent_key: s.agent_key.clone(),
                    status: s.result.status,
                    duration_ms: s.result.duration_ms,
                })
                .collect(),
        }
    }
}

/// Whether any step in this outcome reached a blocking (non-PASS,
/// non-SKIP) terminal status.
#[must_use]
pub fn flow_has_blocking_failure(outcome: &FlowOutcome) -> bool {
    outcome.steps.iter().any(|s| matches!(s.result.status, StepStatus::Fail | StepStatus::Timeout))
}

/// Print a flow outcome to stdout in the plain human-readable format.
pub fn print_flow_outcome_plain(outcome: &FlowOutcome) {
    println!("flow: {}", outcome.flow_key);
    println!("status: {}", match outcome.status {
        FlowOutcomeStatus::Completed => "completed",
        FlowOutcomeStatus::Terminated => "terminated",
    });
    println!("---");
    for step in &outcome.steps {
        println!(
            "{:<20} {:<20} {:<8} {}ms",
            step.step_id,
            step.agent_key,
            format!("{:?}", step.result.status).to_uppercase(),
            step.result.duration_ms
        );
    }
}

/// Print a selftest run's results to stdout in the plain human-readable format.
pub fn print_selftest_outcome_plain(outcome: &SelftestRunOutcome) {
    println!("selftest report v{}", outcome.report.version);
    println!("---");
    for result in &outcome.report.results {
        println!(
            "{:<28} {:<8} {:<10} {}ms  {}",
            result.step_id,
            result.tier.as_str(),
            outcome_tag(result.status),
            result.duration_ms,
            result.message,
        );
    }
    println!("---");
    println!(
        "passed={} failed={} skipped={} total={}",
        outcome.report.summary.passed,
        outcome.report.summary.failed,
        outcome.report.summary.skipped,
        outcome.report.summary.total,
    );
    println!("exit_code={}", outcome.exit_code);
}

fn outcome_tag(status: SelfTestOutcome) -> &'static str {
    match status {
        SelfTestOutcome::Pass => "PASS",
        SelfTestOutcome::Fail => "FAIL",
        SelfTestOutcome::Skip => "SKIP",
        SelfTestOutcome::Timeout => "TIMEOUT",
    }
}
