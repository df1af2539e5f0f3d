//! Doctor classification (§4.7): read-only diagnosis of why a step failed.
//! Never modifies state — it only looks at an already-produced
//! [`SelftestReport`].

use crate::report::{SelfTestOutcome, SelfTestStepResult, SelftestReport};

/// Rolled-up diagnosis for a failing step or an entire report. Ordered so
/// the worse classification wins when rolling many results into one,
/// mirroring a health monitor's worst-status rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DoctorClass {
    /// No blocking-relevant failures observed.
    Healthy,
    /// A step command itself failed; the environment is sound.
    ServiceIssue,
    /// The environment or configuration this step depends on is broken.
    HarnessIssue,
}

/// Categories treated as environment/configuration concerns: a failure
/// here means the harness itself is broken, not the thing it's checking.
const HARNESS_CATEGORIES: &[&str] = &["environment", "config"];

/// Classify one step result.
#[must_use]
pub fn classify(result: &SelfTestStepResult) -> DoctorClass {
    match result.status {
        SelfTestOutcome::Pass | SelfTestOutcome::Skip => DoctorClass::Healthy,
        SelfTestOutcome::Fail | SelfTestOutcome::Timeout => {
            if HARNESS_CATEGORIES.contains(&result.category.as_str()) {
                DoctorClass::HarnessIssue
            } else {
                DoctorClass::ServiceIssue
            }
        }
    }
}

/// Classify an entire report by its worst single-step classification.
#[must_use]
pub fn classify_report(report: &SelftestReport) -> DoctorClass {
    report.results.iter().map(classify).max().unwrap_or(DoctorClass::Healthy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{SelfTestMetadata, SelfTestSummary};
    use crate::tier::{Severity, Tier};

    fn step(category: &str, status: SelfTestOutcome) -> SelfTestStepResult {
        SelfTestStepResult {
            step_id: "x".to_string(),
            name: "x".to_string(),
            tier: Tier::Optional,
            severity: Severity::Info,
            category: category.to_string(),
            status,
            duration_ms: 1,
            message: String::new(),
            skip_reason: None,
        }
    }

    #[test]
    fn passing_step_is_healthy() {
        assert_eq!(classify(&step("environment", SelfTestOutcome::Pass)), DoctorClass::Healthy);
    }

    #[test]
    fn failing_environment_step_is_harness_issue() {
        assert_eq!(classify(&step("environment", SelfTestOutcome::Fail)), DoctorClass::HarnessIssue);
    }

    #[test]
    fn failing_other_category_is_service_issue() {
        assert_eq!(classify(&step("transport", SelfTestOutcome::Fail)), DoctorClass::ServiceIssue);
    }

    #[test]
    fn report_rollup_picks_worst_classification() {
        let results = vec![step("transport", SelfTestOutcome::Fail), step("environment", SelfTestOutcome::Fail)];
        let report =
            SelftestReport { version: 2, metadata: SelfTestMetadata::collect(None, "strict"), summary: SelfTestSummary::from_results(&results), results };
        assert_eq!(classify_report(&report), DoctorClass::HarnessIssue);
    }
}
