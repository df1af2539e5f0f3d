//! Selftest report v2 schema (§4.7) and the per-process metadata it embeds.

use std::collections::BTreeMap;
use std::process::Command;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::overrides::SelftestOverride;
use crate::tier::{Severity, Tier};

/// Schema version stamped on every [`SelftestReport`].
pub const SELFTEST_REPORT_VERSION: u32 = 2;

/// Terminal outcome of one selftest step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum SelfTestOutcome {
    /// The step ran and its check passed.
    Pass,
    /// The step ran and its check failed.
    Fail,
    /// The step did not run (failed dependency, an active override, or the
    /// current mode excludes its tier).
    Skip,
    /// The step's check ran but did not return in time (shell commands
    /// only; internal checks are synchronous and cannot time out here).
    Timeout,
}

/// Why a step was skipped, distinguishing the three ways that can happen.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// A declared dependency failed or was itself skipped.
    FailedDependency {
        /// The dependency that did not pass.
        step_id: String,
    },
    /// An active override suppressed this step.
    Overridden {
        /// The override record that applied.
        #[serde(flatten)]
        over: SelftestOverride,
    },
    /// The current mode does not run this step's tier (`kernel-only`).
    TierExcluded,
    /// Explicitly named in `SELFTEST_SKIP_STEPS`.
    ExplicitlySkipped,
    /// An internal check had nothing to verify in this context (e.g. no
    /// run id, no registry snapshot supplied).
    Inapplicable {
        /// Why the check could not run.
        detail: String,
    },
}

/// One step's outcome in a [`SelftestReport`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SelfTestStepResult {
    /// Step id.
    pub step_id: String,
    /// Step name.
    pub name: String,
    /// Blocking tier.
    pub tier: Tier,
    /// Severity classification.
    pub severity: Severity,
    /// Report category grouping.
    pub category: String,
    /// Terminal outcome.
    pub status: SelfTestOutcome,
    /// Wall-clock duration of the check itself, in milliseconds.
    pub duration_ms: u64,
    /// Human-readable detail: a failure reason, or empty on pass.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Present only when `status == Skip` and a reason was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

/// Run/environment metadata embedded in a [`SelftestReport`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SelfTestMetadata {
    /// The run under test, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Mode the selftest ran under (`strict`, `degraded`, `kernel-only`).
    pub mode: String,
    /// Hostname the selftest ran on.
    pub host: String,
    /// Current git branch, if determinable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    /// Current git commit sha, if determinable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    /// OS user running the selftest.
    pub user: String,
}

impl SelfTestMetadata {
    /// Collect metadata from the current process environment.
    #[must_use]
    pub fn collect(run_id: Option<String>, mode: &str) -> Self {
        Self {
            run_id,
            mode: mode.to_string(),
            host: current_host(),
            git_branch: git_rev_parse(&["--abbrev-ref", "HEAD"]),
            git_commit: git_rev_parse(&["HEAD"]),
            user: current_user(),
        }
    }
}

fn current_host() -> String {
    Command::new("hostname")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn current_user() -> String {
    std::env::var("USER").or_else(|_| std::env::var("USERNAME")).unwrap_or_else(|_| "unknown".to_string())
}

fn git_rev_parse(args: &[&str]) -> Option<String> {
    let out = Command::new("git").arg("rev-parse").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
    (!s.is_empty()).then_some(s)
}

/// Rolled-up counts over a [`SelftestReport`]'s results.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SelfTestSummary {
    /// Count of PASS results.
    pub passed: usize,
    /// Count of FAIL results.
    pub failed: usize,
    /// Count of SKIP results.
    pub skipped: usize,
    /// Total steps considered (pass + fail + skip, timeouts counted as fail).
    pub total: usize,
    /// Failure/skip counts keyed by severity tag.
    pub by_severity: BTreeMap<String, usize>,
    /// Failure/skip counts keyed by category.
    pub by_category: BTreeMap<String, usize>,
    /// Sum of every step's `duration_ms`.
    pub total_duration_ms: u64,
}

impl SelfTestSummary {
    /// Compute a summary over `results`.
    #[must_use]
    pub fn from_results(results: &[SelfTestStepResult]) -> Self {
        let mut summary = Self {
            passed: 0,
            failed: 0,
            skipped: 0,
            total: results.len(),
            by_severity: BTreeMap::new(),
            by_category: BTreeMap::new(),
            total_duration_ms: 0,
        };
        for r in results {
            summary.total_duration_ms += r.duration_ms;
            match r.status {
                SelfTestOutcome::Pass => summary.passed += 1,
                SelfTestOutcome::Skip => summary.skipped += 1,
                SelfTestOutcome::Fail | SelfTestOutcome::Timeout => {
                    summary.failed += 1;
                    *summary.by_severity.entry(r.severity.as_str().to_string()).or_insert(0) += 1;
                    *summary.by_category.entry(r.category.clone()).or_insert(0) += 1;
                }
            }
        }
        summary
    }
}

/// The full selftest report (schema v2, §4.7), written to
/// `<run>/build/selftest_report.json`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SelftestReport {
    /// Always [`SELFTEST_REPORT_VERSION`].
    pub version: u32,
    /// Run/environment metadata.
    pub metadata: SelfTestMetadata,
    /// Rolled-up counts.
    pub summary: SelfTestSummary,
    /// Per-step results, in execution order.
    pub results: Vec<SelfTestStepResult>,
}

impl SelftestReport {
    /// Build a report from `results`, stamping the current timestamp into
    /// nothing (the report itself is timestamp-free; timing lives per-step)
    /// and computing the summary.
    #[must_use]
    pub fn new(metadata: SelfTestMetadata, results: Vec<SelfTestStepResult>) -> Self {
        let summary = SelfTestSummary::from_results(&results);
        Self { version: SELFTEST_REPORT_VERSION, metadata, summary, results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: SelfTestOutcome, severity: Severity, category: &str) -> SelfTestStepResult {
        SelfTestStepResult {
            step_id: "x".to_string(),
            name: "x".to_string(),
            tier: Tier::Optional,
            severity,
            category: category.to_string(),
            status,
            duration_ms: 5,
            message: String::new(),
            skip_reason: None,
        }
    }

    #[test]
    fn summary_counts_by_outcome() {
        let results = vec![
            result(SelfTestOutcome::Pass, Severity::Info, "a"),
            result(SelfTestOutcome::Fail, Severity::Critical, "a"),
            result(SelfTestOutcome::Skip, Severity::Warning, "b"),
        ];
        let summary = SelfTestSummary::from_results(&results);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_category.get("a"), Some(&1));
    }

    #[test]
    fn timeout_counts_as_failed() {
        let results = vec![result(SelfTestOutcome::Timeout, Severity::Critical, "env")];
        let summary = SelfTestSummary::from_results(&results);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn report_stamps_fixed_version() {
        let metadata = SelfTestMetadata::collect(None, "strict");
        let report = SelftestReport::new(metadata, vec![]);
        assert_eq!(report.version, SELFTEST_REPORT_VERSION);
    }
}
