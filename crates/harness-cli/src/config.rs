//! Config-directory conventions: where the agent/flow registries live on
//! disk relative to the process's current directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use harness_config::{AgentRegistry, FlowRegistry};
use harness_core::Flow;

/// Default location of the agent registry, relative to the current directory.
pub const DEFAULT_AGENTS_PATH: &str = "config/agents.toml";
/// Default location of the per-flow TOML files, relative to the current directory.
pub const DEFAULT_FLOWS_DIR: &str = "config/flows";

/// Load the agent and flow registries from the default config layout.
pub fn load_registries() -> Result<(AgentRegistry, FlowRegistry)> {
    let agents = AgentRegistry::load(Path::new(DEFAULT_AGENTS_PATH))
        .with_context(|| format!("load agent registry from '{DEFAULT_AGENTS_PATH}'"))?;
    let flows = FlowRegistry::load_dir(Path::new(DEFAULT_FLOWS_DIR), &agents)
        .with_context(|| format!("load flow registry from '{DEFAULT_FLOWS_DIR}'"))?;
    Ok((agents, flows))
}

/// Restrict `flow` to the steps needed to satisfy `--step`/`--until`,
/// widening the cut so a microloop pair is never split across the
/// boundary.
pub fn restrict_flow(flow: &Flow, step: Option<&str>, until: Option<&str>) -> Result<Flow> {
    let mut restricted = flow.clone();

    if let Some(step_id) = step {
        let idx = find_step_index(flow, step_id)?;
        let (lo, hi) = match flow.steps[idx].loop_partner {
            Some(partner) => (idx.min(partner), idx.max(partner)),
            None => (idx, idx),
        };
        restricted.steps = flow.steps[lo..=hi].to_vec();
        return Ok(restricted);
    }

    if let Some(until_id) = until {
        let mut idx = find_step_index(flow, until_id)?;
        if let Some(partner) = flow.steps[idx].loop_partner {
            idx = idx.max(partner);
        }
        restricted.steps = flow.steps[..=idx].to_vec();
        return Ok(restricted);
    }

    Ok(restricted)
}

fn find_step_index(flow: &Flow, step_id: &str) -> Result<usize> {
    flow.steps
        .iter()
        .position(|s| s.step_id == step_id)
        .with_context(|| format!("flow '{}' has no step '{step_id}'", flow.flow_key))
}

/// Path the orchestrator persists a run's scent trail under, relative to
/// the run root.
#[must_use]
pub fn scent_trail_path() -> PathBuf {
    PathBuf::from("scent.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::flow::{AgentRole, Step};
    use std::time::Duration;

    fn step(id: &str, partner: Option<usize>) -> Step {
        Step {
            step_id: id.to_string(),
            agent_key: "a".to_string(),
            role: AgentRole::Author,
            required_inputs: vec![],
            required_outputs: vec![],
            optional_outputs: vec![],
            loop_partner: partner,
            budget_override: Default::default(),
            timeout: Duration::from_secs(60),
            token_budget: None,
        }
    }

    fn sample_flow() -> Flow {
        Flow {
            flow_key: "plan".to_string(),
            version: "1".to_string(),
            title: "Plan".to_string(),
            steps: vec![
                step("author", Some(1)),
                step("critic", Some(0)),
                step("finalize", None),
            ],
            decision_artifacts: vec![],
        }
    }

    #[test]
    fn until_widens_to_include_the_loop_partner() {
        let flow = sample_flow();
        let restricted = restrict_flow(&flow, None, Some("author")).unwrap();
        assert_eq!(restricted.steps.len(), 2);
        assert_eq!(restricted.steps[1].step_id, "critic");
    }

    #[test]
    fn step_selects_the_full_loop_pair() {
        let flow = sample_flow();
        let restricted = restrict_flow(&flow, Some("critic"), None).unwrap();
        assert_eq!(restricted.steps.len(), 2);
        assert_eq!(restricted.steps[0].step_id, "author");
    }

    #[test]
    fn unknown_step_is_an_error() {
        let flow = sample_flow();
        assert!(restrict_flow(&flow, Some("no-such-step"), None).is_err());
    }

    #[test]
    fn no_restriction_keeps_every_step() {
        let flow = sample_flow();
        let restricted = restrict_flow(&flow, None, None).unwrap();
        assert_eq!(restricted.steps.len(), 3);
    }
}
