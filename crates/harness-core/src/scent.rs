//! Scent trail: cross-flow rationale carried within a run (§3, §5).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One prior flow-level decision with its rationale, consulted when
/// spawning subsequent flows. Flows never share memory directly — only
/// the scent trail and the shared run-base directory tree cross the
/// flow boundary.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScentEntry {
    /// Flow that produced this entry.
    pub flow_key: String,
    /// Short rationale for a decision made during that flow.
    pub rationale: String,
    /// Documented assumption currently in force (fix-forward: ambiguity
    /// becomes an assumption, never a blocker).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assumption: Option<String>,
}

/// Ordered list of [`ScentEntry`] records for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ScentTrail {
    /// Entries in the order they were recorded.
    pub entries: Vec<ScentEntry>,
}

impl ScentTrail {
    /// Append a new entry.
    pub fn push(&mut self, entry: ScentEntry) {
        self.entries.push(entry);
    }

    /// All entries recorded by a given flow.
    #[must_use]
    pub fn entries_for(&self, flow_key: &str) -> Vec<&ScentEntry> {
        self.entries.iter().filter(|e| e.flow_key == flow_key).collect()
    }
}
