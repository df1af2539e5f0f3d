//! Selftest runner (§4.7): drives the static step plan through topological
//! order, resolves overrides and mode filtering, and assembles a report.
//! Mirrors the dependency-aware execution loop the orchestrator uses for
//! flow steps, but for selftest's own fixed, self-contained plan.

use std::collections::HashMap;
use std::process::Command;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use harness_error::{ErrorCode, HarnessError};
use harness_store::RunStore;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::overrides::SelftestOverride;
use crate::report::{SelfTestMetadata, SelfTestOutcome, SelfTestStepResult, SelftestReport, SkipReason};
use crate::step::{CheckOutcome, SelfTestCommand, SelfTestStep, SelftestContext, topological_order, STEPS};
use crate::tier::Tier;

/// Wall-clock budget for a single step's check before it's marked [`SelfTestOutcome::Timeout`].
pub const STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Which steps a run executes and what a failure in each tier means for
/// the exit code (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelftestMode {
    /// Kernel and governance failures both block.
    Strict,
    /// Only kernel failures block; governance/optional failures degrade.
    Degraded,
    /// Run kernel-tier steps only; everything else is skipped as tier-excluded.
    KernelOnly,
}

impl SelftestMode {
    /// Lowercase tag stamped into [`SelfTestMetadata::mode`].
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Degraded => "degraded",
            Self::KernelOnly => "kernel-only",
        }
    }

    fn runs_tier(&self, tier: Tier) -> bool {
        match self {
            Self::Strict | Self::Degraded => true,
            Self::KernelOnly => tier == Tier::Kernel,
        }
    }

    fn blocks_on(&self, tier: Tier) -> bool {
        match self {
            Self::Strict => matches!(tier, Tier::Kernel | Tier::Governance),
            Self::Degraded | Self::KernelOnly => tier == Tier::Kernel,
        }
    }
}

/// One audit-trail line recorded every time an override fires. A routing
/// decision record has no SKIP variant (§9 open question on selftest
/// overrides), so this gets its own JSONL file rather than riding on a
/// flow's routing log.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OverrideAuditRecord {
    /// When the override fired.
    pub timestamp: String,
    /// The step it suppressed.
    pub step_id: String,
    /// Always `"SKIP"`: overrides change what the runner does, never what
    /// it reports (§9).
    pub decision: String,
    /// Why the override was granted.
    pub reason: String,
    /// Who approved it.
    pub approver: String,
    /// When the override itself expires.
    pub expires_at: String,
}

/// Everything [`SelftestRunner::run`] produced: the report plus the
/// side-channel records a caller needs to persist.
#[derive(Debug, Clone)]
pub struct SelftestRunOutcome {
    /// The assembled report.
    pub report: SelftestReport,
    /// Process exit code per the 0/1/2 rule (§4.7).
    pub exit_code: i32,
    /// Degradation-log entries produced by non-kernel failures, in order.
    pub degradations: Vec<harness_core::DegradationEntry>,
    /// Override audit records, in the order overrides fired.
    pub override_audit: Vec<OverrideAuditRecord>,
}

/// Drives one selftest execution.
pub struct SelftestRunner {
    ctx: SelftestContext,
    steps: &'static [SelfTestStep],
    overrides: Vec<SelftestOverride>,
    explicit_skips: Vec<String>,
}

impl SelftestRunner {
    /// Build a runner over the fixed 16-step plan.
    #[must_use]
    pub fn new(ctx: SelftestContext) -> Self {
        Self { ctx, steps: STEPS, overrides: Vec::new(), explicit_skips: Vec::new() }
    }

    /// Attach parsed override records (see [`crate::overrides::parse_overrides`]).
    #[must_use]
    pub fn with_overrides(mut self, overrides: Vec<SelftestOverride>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Attach step ids to skip unconditionally, e.g. from `SELFTEST_SKIP_STEPS`.
    #[must_use]
    pub fn with_explicit_skips(mut self, step_ids: Vec<String>) -> Self {
        self.explicit_skips = step_ids;
        self
    }

    /// Execute the plan under `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] with [`ErrorCode::ConfigError`] (exit code 2)
    /// if the step plan itself has a dependency cycle — a configuration
    /// error caught before any step runs.
    pub fn run(&self, mode: SelftestMode) -> Result<SelftestRunOutcome, HarnessError> {
        let order = topological_order(self.steps).map_err(|cycle| {
            HarnessError::new(ErrorCode::ConfigError, "selftest plan has a dependency cycle")
                .with_context("unresolved_steps", format!("{cycle:?}"))
        })?;

        let now = Utc::now();
        let mut status_by_id: HashMap<&'static str, SelfTestOutcome> = HashMap::new();
        let mut results = Vec::with_capacity(order.len());
        let mut degradations = Vec::new();
        let mut override_audit = Vec::new();

        for step in order {
            if !mode.runs_tier(step.tier) {
                status_by_id.insert(step.step_id, SelfTestOutcome::Skip);
                results.push(skip_result(step, SkipReason::TierExcluded));
                continue;
            }

            if self.explicit_skips.iter().any(|id| id == step.step_id) {
                status_by_id.insert(step.step_id, SelfTestOutcome::Skip);
                results.push(skip_result(step, SkipReason::ExplicitlySkipped));
                continue;
            }

            if let Some(failed_dep) = step.dependencies.iter().find(|dep| status_by_id.get(*dep) != Some(&SelfTestOutcome::Pass)) {
                status_by_id.insert(step.step_id, SelfTestOutcome::Skip);
                results.push(skip_result(step, SkipReason::FailedDependency { step_id: (*failed_dep).to_string() }));
                continue;
            }

            if let Some(active) = self.overrides.iter().find(|o| o.step_id == step.step_id && o.is_active(now)) {
                status_by_id.insert(step.step_id, SelfTestOutcome::Skip);
                override_audit.push(OverrideAuditRecord {
                    timestamp: now.to_rfc3339(),
                    step_id: step.step_id.to_string(),
                    decision: "SKIP".to_string(),
                    reason: active.reason.clone(),
                    approver: active.approver.clone(),
                    expires_at: active.expires_at.clone(),
                });
                info!(step_id = step.step_id, approver = %active.approver, "selftest step overridden");
                results.push(skip_result(step, SkipReason::Overridden { over: active.clone() }));
                continue;
            }

            let (status, message, duration_ms) = run_check(step, &self.ctx);
            status_by_id.insert(step.step_id, status);

            if matches!(status, SelfTestOutcome::Fail | SelfTestOutcome::Timeout) && step.tier != Tier::Kernel {
                warn!(step_id = step.step_id, tier = step.tier.as_str(), "selftest step degraded");
                degradations.push(harness_core::DegradationEntry {
                    timestamp: Utc::now().to_rfc3339(),
                    step_id: step.step_id.to_string(),
                    step_name: step.name.to_string(),
                    tier: step.tier.as_str().to_string(),
                    status: if status == SelfTestOutcome::Timeout {
                        harness_core::DegradationStatus::Timeout
                    } else {
                        harness_core::DegradationStatus::Fail
                    },
                    reason: step.category.to_string(),
                    message: message.clone(),
                    severity: match step.severity {
                        crate::tier::Severity::Critical => harness_core::DegradationSeverity::Critical,
                        crate::tier::Severity::Warning => harness_core::DegradationSeverity::Warning,
                        crate::tier::Severity::Info => harness_core::DegradationSeverity::Info,
                    },
                    remediation: None,
                });
            }

            results.push(SelfTestStepResult {
                step_id: step.step_id.to_string(),
                name: step.name.to_string(),
                tier: step.tier,
                severity: step.severity,
                category: step.category.to_string(),
                status,
                duration_ms,
                message,
                skip_reason: None,
            });
        }

        let metadata = SelfTestMetadata::collect(self.ctx.run_id.clone(), mode.as_str());
        let report = SelftestReport::new(metadata, results);
        let blocking_failed = report
            .results
            .iter()
            .any(|r| matches!(r.status, SelfTestOutcome::Fail | SelfTestOutcome::Timeout) && mode.blocks_on(r.tier));
        let exit_code = i32::from(blocking_failed);

        Ok(SelftestRunOutcome { report, exit_code, degradations, override_audit })
    }
}

/// Persist a run's outcome: the report under `build/selftest_report.json`,
/// degradation entries appended to `selftest_degradations.log`, and
/// override audit records appended to `selftest/overrides.jsonl` — all
/// relative to the run root `store` is scoped to.
///
/// # Errors
///
/// Returns [`HarnessError`] if any write fails.
pub fn persist(store: &RunStore, outcome: &SelftestRunOutcome) -> Result<(), HarnessError> {
    let report_path = std::path::Path::new("build").join("selftest_report.json");
    let bytes = serde_json::to_vec_pretty(&outcome.report)
        .map_err(|e| HarnessError::new(ErrorCode::Internal, "failed to serialize selftest report").with_source(e))?;
    store.write(&report_path, &bytes)?;

    let degradations_path = std::path::Path::new("selftest_degradations.log");
    for entry in &outcome.degradations {
        store.append_jsonl(degradations_path, entry)?;
    }

    let audit_path = std::path::Path::new("selftest").join("overrides.jsonl");
    for record in &outcome.override_audit {
        store.append_jsonl(&audit_path, record)?;
    }

    Ok(())
}

fn skip_result(step: &SelfTestStep, reason: SkipReason) -> SelfTestStepResult {
    SelfTestStepResult {
        step_id: step.step_id.to_string(),
        name: step.name.to_string(),
        tier: step.tier,
        severity: step.severity,
        category: step.category.to_string(),
        status: SelfTestOutcome::Skip,
        duration_ms: 0,
        message: String::new(),
        skip_reason: Some(reason),
    }
}

fn run_check(step: &SelfTestStep, ctx: &SelftestContext) -> (SelfTestOutcome, String, u64) {
    let start = Instant::now();
    let (status, message) = match step.command {
        SelfTestCommand::Shell(argv) => run_shell(argv),
        SelfTestCommand::Internal(check) => match check(ctx) {
            CheckOutcome::Pass => (SelfTestOutcome::Pass, String::new()),
            CheckOutcome::Fail(msg) => (SelfTestOutcome::Fail, msg),
            CheckOutcome::Inapplicable(msg) => (SelfTestOutcome::Skip, msg),
        },
    };
    (status, message, u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX))
}

/// Run a shell check on a watcher thread so a hung child can be timed out
/// without blocking the caller; the child is left to the OS if it does.
fn run_shell(argv: &'static [&'static str]) -> (SelfTestOutcome, String) {
    let Some((program, args)) = argv.split_first() else {
        return (SelfTestOutcome::Fail, "empty shell command".to_string());
    };
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = Command::new(program).args(args).output();
        let _ = tx.send(result);
    });
    match rx.recv_timeout(STEP_TIMEOUT) {
        Ok(Ok(output)) if output.status.success() => (SelfTestOutcome::Pass, String::new()),
        Ok(Ok(output)) => (SelfTestOutcome::Fail, String::from_utf8_lossy(&output.stderr).trim().to_string()),
        Ok(Err(e)) => (SelfTestOutcome::Fail, format!("failed to spawn '{program}': {e}")),
        Err(_) => (SelfTestOutcome::Timeout, format!("'{program}' exceeded {}s", STEP_TIMEOUT.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_blocks_on_governance_failure() {
        assert!(SelftestMode::Strict.blocks_on(Tier::Governance));
    }

    #[test]
    fn degraded_does_not_block_on_governance_failure() {
        assert!(!SelftestMode::Degraded.blocks_on(Tier::Governance));
    }

    #[test]
    fn every_mode_blocks_on_kernel_failure() {
        for mode in [SelftestMode::Strict, SelftestMode::Degraded, SelftestMode::KernelOnly] {
            assert!(mode.blocks_on(Tier::Kernel));
        }
    }

    #[test]
    fn kernel_only_skips_non_kernel_tiers() {
        assert!(!SelftestMode::KernelOnly.runs_tier(Tier::Governance));
        assert!(!SelftestMode::KernelOnly.runs_tier(Tier::Optional));
        assert!(SelftestMode::KernelOnly.runs_tier(Tier::Kernel));
    }

    #[test]
    fn repository_only_run_produces_a_report_and_audit_trail() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SelftestContext::repository_only(dir.path());
        let outcome = SelftestRunner::new(ctx).run(SelftestMode::Degraded).unwrap();
        assert_eq!(outcome.report.summary.total, STEPS.len());
        // flow-registry-loads and agents-governance are SKIP (no registry
        // snapshot supplied), which is a Skip, not a Fail, so nothing here
        // should appear in the degradation log.
        assert!(outcome.degradations.is_empty());
    }

    #[test]
    fn explicit_skip_produces_explicitly_skipped_reason() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SelftestContext::repository_only(dir.path());
        let outcome = SelftestRunner::new(ctx)
            .with_explicit_skips(vec!["toolchain-available".to_string()])
            .run(SelftestMode::Degraded)
            .unwrap();
        let result = outcome.report.results.iter().find(|r| r.step_id == "toolchain-available").unwrap();
        assert!(matches!(result.skip_reason, Some(SkipReason::ExplicitlySkipped)));
    }

    #[test]
    fn failed_dependency_skips_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SelftestContext::repository_only(dir.path());
        let outcome = SelftestRunner::new(ctx)
            .with_explicit_skips(vec!["run-base-writable".to_string()])
            .run(SelftestMode::Degraded)
            .unwrap();
        let dependent = outcome.report.results.iter().find(|r| r.step_id == "degradation-log-invariants").unwrap();
        assert!(matches!(dependent.skip_reason, Some(SkipReason::FailedDependency { .. })));
    }

    #[test]
    fn active_override_skips_and_records_audit_entry() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SelftestContext::repository_only(dir.path());
        let over = SelftestOverride {
            step_id: "receipt-schema-versioned".to_string(),
            reason: "known gap".to_string(),
            approver: "release-manager".to_string(),
            expires_at: (Utc::now() + chrono::Duration::days(1)).to_rfc3339(),
        };
        let outcome = SelftestRunner::new(ctx).with_overrides(vec![over]).run(SelftestMode::Strict).unwrap();
        let result = outcome.report.results.iter().find(|r| r.step_id == "receipt-schema-versioned").unwrap();
        assert!(matches!(result.skip_reason, Some(SkipReason::Overridden { .. })));
        assert_eq!(outcome.override_audit.len(), 1);
        assert_eq!(outcome.override_audit[0].decision, "SKIP");
    }

    #[test]
    fn kernel_only_mode_tier_excludes_everything_else() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SelftestContext::repository_only(dir.path());
        let outcome = SelftestRunner::new(ctx).run(SelftestMode::KernelOnly).unwrap();
        let non_kernel = outcome.report.results.iter().find(|r| r.step_id == "budget-defaults-sane").unwrap();
        assert!(matches!(non_kernel.skip_reason, Some(SkipReason::TierExcluded)));
    }

    #[test]
    fn persist_writes_report_degradations_and_audit_trail() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path(), "run-1").unwrap();
        let ctx = SelftestContext { run_base: dir.path().to_path_buf(), run_id: Some("run-1".to_string()), registries: None };
        let over = SelftestOverride {
            step_id: "receipt-schema-versioned".to_string(),
            reason: "known gap".to_string(),
            approver: "release-manager".to_string(),
            expires_at: (Utc::now() + chrono::Duration::days(1)).to_rfc3339(),
        };
        let outcome = SelftestRunner::new(ctx).with_overrides(vec![over]).run(SelftestMode::Degraded).unwrap();
        persist(&store, &outcome).unwrap();
        assert!(store.run_root().join("build").join("selftest_report.json").exists());
        assert!(store.run_root().join("selftest").join("overrides.jsonl").exists());
    }
}
