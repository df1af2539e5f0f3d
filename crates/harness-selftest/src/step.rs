//! Static selftest step registry and execution context (§4.7, DESIGN NOTES
//! §9 "global selftest registry" — replaced here with a configuration
//! object passed explicitly into [`crate::runner::SelftestRunner`] rather
//! than process-wide mutable state).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use crate::tier::{Severity, Tier};

/// How one [`SelfTestStep`] is actually run. Mirrors the function-pointer
/// dispatch table the Transport Port uses for its own backends (§9):
/// environment probes shell out, everything that needs to inspect this
/// repository's own types runs in-process.
#[derive(Clone, Copy)]
pub enum SelfTestCommand {
    /// Run an external command; the first element is the program, the rest
    /// are its arguments. A non-zero exit status is a failure.
    Shell(&'static [&'static str]),
    /// Run an in-process check against the current [`SelftestContext`].
    Internal(fn(&SelftestContext) -> CheckOutcome),
}

/// What an [`SelfTestCommand::Internal`] check decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The check ran and passed.
    Pass,
    /// The check ran and failed, with a human-readable reason.
    Fail(String),
    /// The check needs context data the caller did not supply (e.g. no
    /// run id, no registry snapshot) and has nothing to verify.
    Inapplicable(String),
}

/// One statically declared selftest step.
#[derive(Clone, Copy)]
pub struct SelfTestStep {
    /// Stable identifier, referenced by dependencies, overrides, and the
    /// degradation log.
    pub step_id: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    /// Blocking tier.
    pub tier: Tier,
    /// Severity classification.
    pub severity: Severity,
    /// Grouping used in the report's `by_category` summary.
    pub category: &'static str,
    /// How to run this step.
    pub command: SelfTestCommand,
    /// Step ids that must pass before this one runs. A failed dependency
    /// makes this step SKIP rather than run.
    pub dependencies: &'static [&'static str],
    /// Acceptance-criteria ids this step is evidence for.
    pub ac_ids: &'static [&'static str],
}

/// Registry snapshot handed to internal checks that reason about the
/// agent/flow configuration. Computed once by whoever loads the
/// configuration (the CLI entry point) and passed in, never loaded by a
/// selftest step itself — loading is `harness-config`'s job.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    /// Agent keys declared in the agent registry.
    pub agent_keys: BTreeSet<String>,
    /// Agent keys actually referenced by at least one flow step.
    pub referenced_agent_keys: BTreeSet<String>,
    /// Number of flows the registry loaded successfully.
    pub flow_count: usize,
}

/// Everything an [`SelfTestCommand::Internal`] check may need to read.
/// Never mutated by a check — selftest only observes (§4.7 "Doctor: ...
/// never modifies state").
#[derive(Debug, Clone, Default)]
pub struct SelftestContext {
    /// `RUN_BASE`.
    pub run_base: PathBuf,
    /// The run under test, if any. Repository-level checks (toolchain,
    /// registry shape) run with this absent.
    pub run_id: Option<String>,
    /// Agent/flow registry snapshot, if the caller loaded one.
    pub registries: Option<RegistrySnapshot>,
}

impl SelftestContext {
    /// A context scoped to repository-level checks only (no run, no
    /// registry snapshot).
    #[must_use]
    pub fn repository_only(run_base: impl Into<PathBuf>) -> Self {
        Self { run_base: run_base.into(), run_id: None, registries: None }
    }

    /// The run root this context is scoped to, if `run_id` is set.
    #[must_use]
    pub fn run_root(&self) -> Option<PathBuf> {
        self.run_id.as_ref().map(|id| self.run_base.join(id))
    }
}

fn run_base_writable(ctx: &SelftestContext) -> CheckOutcome {
    match std::fs::create_dir_all(&ctx.run_base) {
        Ok(()) => {
            let probe = ctx.run_base.join(".selftest-write-probe");
            match std::fs::write(&probe, b"ok") {
                Ok(()) => {
                    let _ = std::fs::remove_file(&probe);
                    CheckOutcome::Pass
                }
                Err(e) => CheckOutcome::Fail(format!("RUN_BASE not writable: {e}")),
            }
        }
        Err(e) => CheckOutcome::Fail(format!("RUN_BASE not creatable: {e}")),
    }
}

fn flow_registry_loads(ctx: &SelftestContext) -> CheckOutcome {
    match &ctx.registries {
        Some(snap) if snap.flow_count == harness_core::FLOW_KEYS.len() => CheckOutcome::Pass,
        Some(snap) => CheckOutcome::Fail(format!(
            "flow registry loaded {} of {} pipeline flows",
            snap.flow_count,
            harness_core::FLOW_KEYS.len()
        )),
        None => CheckOutcome::Inapplicable("no registry snapshot supplied to this context".to_string()),
    }
}

fn agents_governance(ctx: &SelftestContext) -> CheckOutcome {
    match &ctx.registries {
        Some(snap) => {
            let orphaned: Vec<&String> = snap.referenced_agent_keys.difference(&snap.agent_keys).collect();
            if orphaned.is_empty() {
                CheckOutcome::Pass
            } else {
                CheckOutcome::Fail(format!("flows reference undeclared agent keys: {orphaned:?}"))
            }
        }
        None => CheckOutcome::Inapplicable("no registry snapshot supplied to this context".to_string()),
    }
}

fn receipt_schema_versioned(_ctx: &SelftestContext) -> CheckOutcome {
    if harness_core::CONTRACT_VERSION.split('.').count() == 3 {
        CheckOutcome::Pass
    } else {
        CheckOutcome::Fail(format!("CONTRACT_VERSION '{}' is not semver", harness_core::CONTRACT_VERSION))
    }
}

fn handoff_tier_caps_consistent(_ctx: &SelftestContext) -> CheckOutcome {
    use harness_core::HandoffTier;
    let minimal = HandoffTier::Minimal.byte_cap();
    let standard = HandoffTier::Standard.byte_cap();
    let extended = HandoffTier::Extended.byte_cap();
    if minimal < standard && standard < extended {
        CheckOutcome::Pass
    } else {
        CheckOutcome::Fail(format!("handoff tier caps are not strictly increasing: {minimal} / {standard} / {extended}"))
    }
}

fn degradation_log_invariants(ctx: &SelftestContext) -> CheckOutcome {
    let Some(run_root) = ctx.run_root() else {
        return CheckOutcome::Inapplicable("no run id supplied to this context".to_string());
    };
    let path = run_root.join("selftest_degradations.log");
    if !path.exists() {
        return CheckOutcome::Pass;
    }
    let Ok(content) = std::fs::read_to_string(&path) else {
        return CheckOutcome::Fail(format!("could not read {}", path.display()));
    };
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<harness_core::DegradationEntry>(line) {
            Ok(entry) if !entry.satisfies_invariants() => {
                return CheckOutcome::Fail(format!("line {}: kernel-tier entry in degradation log", n + 1));
            }
            Ok(_) => {}
            Err(e) => return CheckOutcome::Fail(format!("line {}: invalid degradation entry: {e}", n + 1)),
        }
    }
    CheckOutcome::Pass
}

fn budget_defaults_sane(_ctx: &SelftestContext) -> CheckOutcome {
    use harness_budget::{DEFAULT_CONTEXT_TOTAL, DEFAULT_HISTORY_OLDER_MAX, DEFAULT_HISTORY_RECENT_MAX};
    if DEFAULT_CONTEXT_TOTAL >= DEFAULT_HISTORY_RECENT_MAX + DEFAULT_HISTORY_OLDER_MAX {
        CheckOutcome::Pass
    } else {
        CheckOutcome::Fail("DEFAULT_CONTEXT_TOTAL cannot fit the recent+older history budgets".to_string())
    }
}

fn selftest_plan_acyclic(_ctx: &SelftestContext) -> CheckOutcome {
    match topological_order(STEPS) {
        Ok(_) => CheckOutcome::Pass,
        Err(cycle) => CheckOutcome::Fail(format!("selftest plan has a dependency cycle: {cycle:?}")),
    }
}

fn routing_log_append_only(ctx: &SelftestContext) -> CheckOutcome {
    let Some(run_root) = ctx.run_root() else {
        return CheckOutcome::Inapplicable("no run id supplied to this context".to_string());
    };
    if !run_root.exists() {
        return CheckOutcome::Pass;
    }
    let mut found_any = false;
    for flow_key in harness_core::FLOW_KEYS {
        let path = run_root.join(flow_key).join("routing").join("decisions.jsonl");
        if !path.exists() {
            continue;
        }
        found_any = true;
        let Ok(content) = std::fs::read_to_string(&path) else {
            return CheckOutcome::Fail(format!("could not read {}", path.display()));
        };
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if serde_json::from_str::<harness_core::RoutingDecisionRecord>(line).is_err() {
                return CheckOutcome::Fail(format!("{}: line {} is not a valid routing decision record", flow_key, n + 1));
            }
        }
    }
    if found_any {
        CheckOutcome::Pass
    } else {
        CheckOutcome::Inapplicable("no routing decision logs exist yet for this run".to_string())
    }
}

fn transport_capabilities_declared(_ctx: &SelftestContext) -> CheckOutcome {
    use harness_transport::{stub::StubTransport, Transport};
    let stub = StubTransport::new();
    if stub.engine_id().is_empty() {
        CheckOutcome::Fail("stub transport has an empty engine_id".to_string())
    } else {
        CheckOutcome::Pass
    }
}

fn context_budget_headroom(_ctx: &SelftestContext) -> CheckOutcome {
    use harness_budget::{DEFAULT_CONTEXT_TOTAL, DEFAULT_HISTORY_OLDER_MAX, DEFAULT_HISTORY_RECENT_MAX};
    let used = DEFAULT_HISTORY_RECENT_MAX + DEFAULT_HISTORY_OLDER_MAX;
    let headroom = DEFAULT_CONTEXT_TOTAL.saturating_sub(used);
    if headroom >= DEFAULT_CONTEXT_TOTAL / 10 {
        CheckOutcome::Pass
    } else {
        CheckOutcome::Fail(format!("context budget headroom is only {headroom} chars"))
    }
}

fn artifact_cap_headroom(_ctx: &SelftestContext) -> CheckOutcome {
    if harness_store::MAX_JSONL_LINE_BYTES < harness_store::DEFAULT_ARTIFACT_CAP_BYTES as usize {
        CheckOutcome::Pass
    } else {
        CheckOutcome::Fail("a single JSONL line could exceed the per-artifact capacity cap".to_string())
    }
}

fn scent_trail_serializable(_ctx: &SelftestContext) -> CheckOutcome {
    let trail = harness_core::ScentTrail::default();
    match serde_json::to_vec(&trail) {
        Ok(_) => CheckOutcome::Pass,
        Err(e) => CheckOutcome::Fail(format!("ScentTrail does not serialize: {e}")),
    }
}

fn observability_endpoints_well_formed(_ctx: &SelftestContext) -> CheckOutcome {
    for (name, value) in [
        ("METRICS_ENDPOINT", std::env::var("METRICS_ENDPOINT").ok()),
        ("LOGS_ENDPOINT", std::env::var("LOGS_ENDPOINT").ok()),
        ("TRACE_ENDPOINT", std::env::var("TRACE_ENDPOINT").ok()),
    ] {
        if let Some(v) = value {
            if !v.is_empty() && !(v.starts_with("http://") || v.starts_with("https://")) {
                return CheckOutcome::Fail(format!("{name} is set but not a well-formed URL: '{v}'"));
            }
        }
    }
    CheckOutcome::Pass
}

/// The fixed set of 16 selftest steps (§4.7).
pub static STEPS: &[SelfTestStep] = &[
    SelfTestStep {
        step_id: "toolchain-available",
        name: "Rust toolchain available",
        tier: Tier::Kernel,
        severity: Severity::Critical,
        category: "environment",
        command: SelfTestCommand::Shell(&["cargo", "--version"]),
        dependencies: &[],
        ac_ids: &["AC-ENV-1"],
    },
    SelfTestStep {
        step_id: "git-repository-present",
        name: "Git repository present",
        tier: Tier::Kernel,
        severity: Severity::Critical,
        category: "environment",
        command: SelfTestCommand::Shell(&["git", "rev-parse", "--is-inside-work-tree"]),
        dependencies: &[],
        ac_ids: &["AC-ENV-2"],
    },
    SelfTestStep {
        step_id: "run-base-writable",
        name: "RUN_BASE is writable",
        tier: Tier::Kernel,
        severity: Severity::Critical,
        category: "environment",
        command: SelfTestCommand::Internal(run_base_writable),
        dependencies: &[],
        ac_ids: &["AC-ENV-3"],
    },
    SelfTestStep {
        step_id: "flow-registry-loads",
        name: "Flow registry loads all six pipeline flows",
        tier: Tier::Kernel,
        severity: Severity::Critical,
        category: "config",
        command: SelfTestCommand::Internal(flow_registry_loads),
        dependencies: &[],
        ac_ids: &["AC-CFG-1"],
    },
    SelfTestStep {
        step_id: "agents-governance",
        name: "Every referenced agent key is declared",
        tier: Tier::Governance,
        severity: Severity::Critical,
        category: "governance",
        command: SelfTestCommand::Internal(agents_governance),
        dependencies: &["flow-registry-loads"],
        ac_ids: &["AC-GOV-1"],
    },
    SelfTestStep {
        step_id: "receipt-schema-versioned",
        name: "Receipt schema carries a contract version",
        tier: Tier::Governance,
        severity: Severity::Warning,
        category: "contracts",
        command: SelfTestCommand::Internal(receipt_schema_versioned),
        dependencies: &[],
        ac_ids: &["AC-CON-1"],
    },
    SelfTestStep {
        step_id: "handoff-tier-caps-consistent",
        name: "Handoff tier byte caps are strictly increasing",
        tier: Tier::Governance,
        severity: Severity::Warning,
        category: "contracts",
        command: SelfTestCommand::Internal(handoff_tier_caps_consistent),
        dependencies: &[],
        ac_ids: &["AC-CON-2"],
    },
    SelfTestStep {
        step_id: "degradation-log-invariants",
        name: "Degradation log carries no kernel-tier entries",
        tier: Tier::Governance,
        severity: Severity::Critical,
        category: "contracts",
        command: SelfTestCommand::Internal(degradation_log_invariants),
        dependencies: &["run-base-writable"],
        ac_ids: &["AC-CON-3"],
    },
    SelfTestStep {
        step_id: "budget-defaults-sane",
        name: "Default context budget fits recent+older history",
        tier: Tier::Governance,
        severity: Severity::Warning,
        category: "config",
        command: SelfTestCommand::Internal(budget_defaults_sane),
        dependencies: &[],
        ac_ids: &["AC-CFG-2"],
    },
    SelfTestStep {
        step_id: "selftest-plan-acyclic",
        name: "Selftest plan's own dependency graph is acyclic",
        tier: Tier::Governance,
        severity: Severity::Critical,
        category: "config",
        command: SelfTestCommand::Internal(selftest_plan_acyclic),
        dependencies: &[],
        ac_ids: &["AC-CFG-3"],
    },
    SelfTestStep {
        step_id: "routing-log-append-only",
        name: "Existing routing decision logs parse line-by-line",
        tier: Tier::Governance,
        severity: Severity::Warning,
        category: "contracts",
        command: SelfTestCommand::Internal(routing_log_append_only),
        dependencies: &["run-base-writable"],
        ac_ids: &["AC-CON-4"],
    },
    SelfTestStep {
        step_id: "transport-capabilities-declared",
        name: "Built-in transport declares a non-empty engine id",
        tier: Tier::Governance,
        severity: Severity::Warning,
        category: "transport",
        command: SelfTestCommand::Internal(transport_capabilities_declared),
        dependencies: &[],
        ac_ids: &["AC-TRN-1"],
    },
    SelfTestStep {
        step_id: "context-budget-headroom",
        name: "Context budget leaves at least 10% headroom",
        tier: Tier::Optional,
        severity: Severity::Info,
        category: "config",
        command: SelfTestCommand::Internal(context_budget_headroom),
        dependencies: &["budget-defaults-sane"],
        ac_ids: &["AC-CFG-4"],
    },
    SelfTestStep {
        step_id: "artifact-cap-headroom",
        name: "Artifact capacity cap exceeds the JSONL line-atomicity limit",
        tier: Tier::Optional,
        severity: Severity::Info,
        category: "config",
        command: SelfTestCommand::Internal(artifact_cap_headroom),
        dependencies: &[],
        ac_ids: &["AC-CFG-5"],
    },
    SelfTestStep {
        step_id: "scent-trail-serializable",
        name: "Scent trail round-trips through JSON",
        tier: Tier::Optional,
        severity: Severity::Info,
        category: "contracts",
        command: SelfTestCommand::Internal(scent_trail_serializable),
        dependencies: &[],
        ac_ids: &["AC-CON-5"],
    },
    SelfTestStep {
        step_id: "observability-endpoints-well-formed",
        name: "Observability sink endpoints are well-formed URLs",
        tier: Tier::Optional,
        severity: Severity::Info,
        category: "observability",
        command: SelfTestCommand::Internal(observability_endpoints_well_formed),
        dependencies: &[],
        ac_ids: &["AC-OBS-1"],
    },
];

/// Kahn's-algorithm topological order over `steps`' declared dependencies.
///
/// # Errors
///
/// Returns the set of step ids still unresolved if a cycle exists.
pub fn topological_order(steps: &'static [SelfTestStep]) -> Result<Vec<&'static SelfTestStep>, HashSet<&'static str>> {
    let by_id: HashMap<&'static str, &'static SelfTestStep> = steps.iter().map(|s| (s.step_id, s)).collect();
    let mut in_degree: HashMap<&'static str, usize> = steps.iter().map(|s| (s.step_id, 0)).collect();
    for step in steps {
        for dep in step.dependencies {
            if by_id.contains_key(dep) {
                *in_degree.get_mut(step.step_id).unwrap() += 1;
            }
        }
    }

    let mut queue: Vec<&'static str> = in_degree.iter().filter(|(_, &d)| d == 0).map(|(id, _)| *id).collect();
    queue.sort_unstable();
    let mut order = Vec::with_capacity(steps.len());
    let mut remaining = in_degree.clone();

    let mut cursor = 0;
    while cursor < queue.len() {
        let id = queue[cursor];
        cursor += 1;
        order.push(by_id[id]);
        let mut unlocked: Vec<&'static str> = Vec::new();
        for step in steps {
            if step.dependencies.contains(&id) {
                if let Some(d) = remaining.get_mut(step.step_id) {
                    *d -= 1;
                    if *d == 0 {
                        unlocked.push(step.step_id);
                    }
                }
            }
        }
        unlocked.sort_unstable();
        queue.extend(unlocked);
    }

    if order.len() == steps.len() {
        Ok(order)
    } else {
        let resolved: HashSet<&'static str> = order.iter().map(|s| s.step_id).collect();
        Err(steps.iter().map(|s| s.step_id).filter(|id| !resolved.contains(id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_plan_has_sixteen_steps() {
        assert_eq!(STEPS.len(), 16);
    }

    #[test]
    fn fixed_plan_is_acyclic() {
        let order = topological_order(STEPS).expect("no cycle");
        assert_eq!(order.len(), STEPS.len());
    }

    #[test]
    fn dependency_runs_before_dependent() {
        let order = topological_order(STEPS).unwrap();
        let pos = |id: &str| order.iter().position(|s| s.step_id == id).unwrap();
        assert!(pos("flow-registry-loads") < pos("agents-governance"));
        assert!(pos("budget-defaults-sane") < pos("context-budget-headroom"));
    }

    #[test]
    fn cycle_is_detected() {
        static CYCLE: &[SelfTestStep] = &[
            SelfTestStep {
                step_id: "a",
                name: "a",
                tier: Tier::Optional,
                severity: Severity::Info,
                category: "test",
                command: SelfTestCommand::Internal(|_| CheckOutcome::Pass),
                dependencies: &["b"],
                ac_ids: &[],
            },
            SelfTestStep {
                step_id: "b",
                name: "b",
                tier: Tier::Optional,
                severity: Severity::Info,
                category: "test",
                command: SelfTestCommand::Internal(|_| CheckOutcome::Pass),
                dependencies: &["a"],
                ac_ids: &[],
            },
        ];
        let err = topological_order(CYCLE).unwrap_err();
        assert_eq!(err, HashSet::from(["a", "b"]));
    }

    #[test]
    fn run_base_writable_creates_and_cleans_up_probe() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SelftestContext::repository_only(dir.path());
        assert_eq!(run_base_writable(&ctx), CheckOutcome::Pass);
        assert!(!dir.path().join(".selftest-write-probe").exists());
    }

    #[test]
    fn flow_registry_loads_is_inapplicable_without_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SelftestContext::repository_only(dir.path());
        assert!(matches!(flow_registry_loads(&ctx), CheckOutcome::Inapplicable(_)));
    }

    #[test]
    fn agents_governance_flags_orphaned_agent_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = SelftestContext::repository_only(dir.path());
        ctx.registries = Some(RegistrySnapshot {
            agent_keys: BTreeSet::from(["planner".to_string()]),
            referenced_agent_keys: BTreeSet::from(["planner".to_string(), "ghost".to_string()]),
            flow_count: 6,
        });
        assert!(matches!(agents_governance(&ctx), CheckOutcome::Fail(_)));
    }
}
