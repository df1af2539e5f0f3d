//! Static flow/step/agent configuration.
//!
//! Flows are loaded once at startup (see `harness-config`) and never
//! mutated during execution; steps reference agents and loop partners by
//! index, never by pointer, so the graph stays a plain DAG plus an
//! orthogonal loop-partner function (DESIGN NOTES, "cyclic references").

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The role an agent plays when invoked for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Produces an artifact.
    Author,
    /// Reviews an author's artifact; drives microloop routing signals.
    Critic,
    /// Executes an implementation step (e.g. writing code).
    Implementer,
    /// Reviews implemented work.
    Reviewer,
    /// Produces a summary/report artifact.
    Reporter,
    /// Any role not covered above.
    Other,
}

/// A named agent definition. Agents are invoked; they own no state across
/// steps — all state lives in receipts and handoffs on disk.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Agent {
    /// Unique key, referenced by [`Step::agent_key`]. When loaded from a
    /// `[agents.<key>]` TOML table, callers backfill this from the table
    /// key if left empty.
    #[serde(default)]
    pub agent_key: String,
    /// Human-readable description.
    pub description: String,
    /// Role family, used for author/critic self-review checks.
    pub role: AgentRole,
    /// Color tag for the role family (UI hint only).
    #[serde(default)]
    pub color_tag: Option<String>,
    /// Declared skill references (opaque identifiers; the harness core
    /// does not interpret them).
    #[serde(default)]
    pub skills: Vec<String>,
    /// Model-size hint (opaque identifier, e.g. `"large"`/`"small"`).
    #[serde(default)]
    pub model_size_hint: Option<String>,
}

/// Per-step context-budget overrides. Any field left `None` falls through
/// to the flow-level override, then the profile default, then the
/// built-in default (see `harness-budget::ContextBudgeter`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct BudgetOverride {
    /// Total character budget for the assembled prompt.
    #[serde(default)]
    pub context_total: Option<usize>,
    /// Character budget for full-text recent history.
    #[serde(default)]
    pub history_recent_max: Option<usize>,
    /// Character budget for summarized older history.
    #[serde(default)]
    pub history_older_max: Option<usize>,
}

/// Immutable definition of one unit of work in a flow.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    /// Unique identifier within the flow.
    pub step_id: String,
    /// Key of the [`Agent`] invoked for this step.
    pub agent_key: String,
    /// Role the agent plays for this specific step.
    pub role: AgentRole,
    /// Paths (relative to the flow directory) that must already exist.
    #[serde(default)]
    pub required_inputs: Vec<String>,
    /// Paths this step must produce on a PASS outcome.
    #[serde(default)]
    pub required_outputs: Vec<String>,
    /// Paths this step may produce but need not.
    #[serde(default)]
    pub optional_outputs: Vec<String>,
    /// Index (within the same flow's `steps`) of this step's microloop
    /// partner, if any. A loop partner is an index, never a pointer.
    #[serde(default)]
    pub loop_partner: Option<usize>,
    /// Context-budget overrides for this step.
    #[serde(default)]
    pub budget_override: BudgetOverride,
    /// Hard wall-clock timeout for one attempt.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Soft token budget for one attempt; a `token_warning` event fires at
    /// 90% of this value.
    #[serde(default)]
    pub token_budget: Option<u64>,
}

impl Step {
    /// Whether this step declares a microloop partner.
    #[must_use]
    pub fn has_loop_partner(&self) -> bool {
        self.loop_partner.is_some()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Named, versioned configuration: an ordered list of [`Step`]s plus the
/// set of artifacts whose presence constitutes the flow's "decision
/// artifact".
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Flow {
    /// One of [`crate::FLOW_KEYS`].
    pub flow_key: String,
    /// Schema version of this flow definition.
    pub version: String,
    /// Human-readable title.
    pub title: String,
    /// Ordered step definitions. Steps advance in this order unless a
    /// routing decision modifies the route.
    pub steps: Vec<Step>,
    /// Paths (relative to the flow directory) whose presence is required
    /// for the flow to be considered to have produced its decision
    /// artifact.
    #[serde(default)]
    pub decision_artifacts: Vec<String>,
}

impl Flow {
    /// Find a step by id.
    #[must_use]
    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Index of a step by id.
    #[must_use]
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.step_id == step_id)
    }

    /// The loop partner step of `step_id`, if declared.
    #[must_use]
    pub fn loop_partner_of(&self, step_id: &str) -> Option<&Step> {
        let idx = self.step_index(step_id)?;
        let partner_idx = self.steps[idx].loop_partner?;
        self.steps.get(partner_idx)
    }

    /// Validate structural invariants: unique step ids, in-range loop
    /// partner indices, and that a loop partner relationship is symmetric.
    ///
    /// Runs once at startup (DESIGN NOTES: validation never runs during
    /// step execution).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            if !seen.insert(step.step_id.as_str()) {
                problems.push(format!("duplicate step_id '{}'", step.step_id));
            }
            if let Some(partner) = step.loop_partner {
                if partner >= self.steps.len() {
                    problems.push(format!(
                        "step '{}' declares out-of-range loop_partner index {partner}",
                        step.step_id
                    ));
                } else if self.steps[partner].loop_partner != Some(i) {
                    problems.push(format!(
                        "step '{}' loop_partner {partner} is not symmetric",
                        step.step_id
                    ));
                }
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}
