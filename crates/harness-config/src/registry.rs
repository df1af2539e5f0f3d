//! Loading and cross-validating the flow/agent registries.

use std::collections::BTreeMap;
use std::path::Path;

use harness_core::{Agent, Flow, FLOW_KEYS};

/// Errors from loading or validating the flow/agent registries.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A registry file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },
    /// A registry file could not be parsed as TOML.
    #[error("failed to parse {path}: {reason}")]
    ParseError {
        /// Path that failed to parse.
        path: String,
        /// Underlying TOML error message.
        reason: String,
    },
    /// One or more semantic validation checks failed.
    #[error("registry validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// All agent definitions, keyed by `agent_key`.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, Agent>,
}

impl AgentRegistry {
    /// Parse an agent registry from a TOML string of the form
    /// `[agents.<agent_key>]` tables.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ParseError`] if the TOML is malformed.
    pub fn from_toml_str(content: &str) -> Result<Self, RegistryError> {
        #[derive(serde::Deserialize)]
        struct Raw {
            #[serde(default)]
            agents: BTreeMap<String, Agent>,
        }
        let raw: Raw = toml::from_str(content).map_err(|e| RegistryError::ParseError {
            path: "<agents>".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { agents: raw.agents })
    }

    /// Load an agent registry from a TOML file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::FileNotFound`] or [`RegistryError::ParseError`].
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path).map_err(|_| RegistryError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let mut registry = Self::from_toml_str(&content)?;
        for (key, agent) in &mut registry.agents {
            if agent.agent_key.is_empty() {
                agent.agent_key = key.clone();
            }
        }
        Ok(registry)
    }

    /// Look up an agent by key.
    #[must_use]
    pub fn get(&self, agent_key: &str) -> Option<&Agent> {
        self.agents.get(agent_key)
    }

    /// All agent keys in this registry.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.agents.keys()
    }
}

/// All six flow definitions, keyed by `flow_key`.
#[derive(Debug, Clone, Default)]
pub struct FlowRegistry {
    flows: BTreeMap<String, Flow>,
}

impl FlowRegistry {
    /// Build a registry from already-constructed flows, validating each
    /// flow individually and the registry as a whole.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ValidationError`] if any flow fails its own
    /// `Flow::validate`, if the flow-key set does not match the fixed
    /// six-flow pipeline, or if a step references an unknown agent key.
    pub fn new(flows: Vec<Flow>, agents: &AgentRegistry) -> Result<Self, RegistryError> {
        let mut reasons = Vec::new();
        let mut map = BTreeMap::new();

        for flow in flows {
            if let Err(flow_errors) = flow.validate() {
                reasons.extend(
                    flow_errors
                        .into_iter()
                        .map(|e| format!("flow '{}': {e}", flow.flow_key)),
                );
            }
            for step in &flow.steps {
                if agents.get(&step.agent_key).is_none() {
                    reasons.push(format!(
                        "flow '{}' step '{}': unknown agent_key '{}'",
                        flow.flow_key, step.step_id, step.agent_key
                    ));
                }
            }
            map.insert(flow.flow_key.clone(), flow);
        }

        let have: std::collections::BTreeSet<&str> = map.keys().map(String::as_str).collect();
        let want: std::collections::BTreeSet<&str> = FLOW_KEYS.iter().copied().collect();
        if have != want {
            reasons.push(format!(
                "flow registry must contain exactly the six pipeline flows {FLOW_KEYS:?}, got {have:?}"
            ));
        }

        if reasons.is_empty() {
            Ok(Self { flows: map })
        } else {
            Err(RegistryError::ValidationError { reasons })
        }
    }

    /// Look up a flow by key.
    #[must_use]
    pub fn get(&self, flow_key: &str) -> Option<&Flow> {
        self.flows.get(flow_key)
    }

    /// Flow keys in fixed pipeline order, filtered to those present in the registry.
    pub fn ordered_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        FLOW_KEYS.iter().copied().filter(|k| self.flows.contains_key(*k))
    }

    /// Load all six flows from `<dir>/<flow_key>.toml` and validate the
    /// resulting registry against `agents`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::FileNotFound`] if a flow file is missing,
    /// [`RegistryError::ParseError`] if one fails to parse, or
    /// [`RegistryError::ValidationError`] from [`FlowRegistry::new`].
    pub fn load_dir(dir: &Path, agents: &AgentRegistry) -> Result<Self, RegistryError> {
        let mut flows = Vec::with_capacity(FLOW_KEYS.len());
        for flow_key in FLOW_KEYS {
            let path = dir.join(format!("{flow_key}.toml"));
            let content = std::fs::read_to_string(&path).map_err(|_| RegistryError::FileNotFound {
                path: path.display().to_string(),
            })?;
            let flow: Flow = toml::from_str(&content).map_err(|e| RegistryError::ParseError {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            flows.push(flow);
        }
        Self::new(flows, agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::flow::{AgentRole, Step};
    use std::time::Duration;

    fn agent(key: &str) -> Agent {
        Agent {
            agent_key: key.to_string(),
            description: "test agent".to_string(),
            role: AgentRole::Author,
            color_tag: Some("blue".to_string()),
            skills: vec![],
            model_size_hint: None,
        }
    }

    fn flow(flow_key: &str, agent_key: &str) -> Flow {
        Flow {
            flow_key: flow_key.to_string(),
            version: "1".to_string(),
            title: "Test flow".to_string(),
            steps: vec![Step {
                step_id: "only".to_string(),
                agent_key: agent_key.to_string(),
                role: AgentRole::Author,
                required_inputs: vec![],
                required_outputs: vec![],
                optional_outputs: vec![],
                loop_partner: None,
                budget_override: Default::default(),
                timeout: Duration::from_secs(60),
                token_budget: None,
            }],
            decision_artifacts: vec![],
        }
    }

    fn all_six_flows() -> Vec<Flow> {
        harness_core::FLOW_KEYS.iter().map(|k| flow(k, "agent-a")).collect()
    }

    #[test]
    fn valid_registry_builds() {
        let agents = AgentRegistry {
            agents: BTreeMap::from([("agent-a".to_string(), agent("agent-a"))]),
        };
        let registry = FlowRegistry::new(all_six_flows(), &agents).unwrap();
        assert_eq!(registry.ordered_keys().count(), 6);
    }

    #[test]
    fn missing_flow_is_rejected() {
        let agents = AgentRegistry {
            agents: BTreeMap::from([("agent-a".to_string(), agent("agent-a"))]),
        };
        let mut flows = all_six_flows();
        flows.pop();
        let err = FlowRegistry::new(flows, &agents).unwrap_err();
        assert!(matches!(err, RegistryError::ValidationError { .. }));
    }

    #[test]
    fn unknown_agent_key_is_rejected() {
        let agents = AgentRegistry::default();
        let err = FlowRegistry::new(all_six_flows(), &agents).unwrap_err();
        match err {
            RegistryError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("unknown agent_key")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn agent_registry_parses_toml() {
        let toml = r#"
            [agents.planner]
            description = "Plans the work"
            role = "author"
            color_tag = "blue"
            skills = ["planning"]
        "#;
        let registry = AgentRegistry::from_toml_str(toml).unwrap();
        assert!(registry.get("planner").is_some());
    }
}
