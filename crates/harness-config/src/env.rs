//! Environment-variable overlay (§6). The harness reads these at process
//! startup; nothing below this module touches the environment again.

use std::path::PathBuf;

/// Step-engine execution mode for the Claude transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaudeStepEngineMode {
    /// Deterministic in-process stub (default).
    #[default]
    Stub,
    /// Real SDK-backed execution.
    Sdk,
}

/// Resolved environment overlay for one process invocation.
#[derive(Debug, Clone)]
pub struct HarnessEnv {
    /// `RUN_BASE`: run root directory. Defaults to `./runs`.
    pub run_base: PathBuf,
    /// `SWARM_CLAUDE_STEP_ENGINE_MODE`.
    pub claude_step_engine_mode: ClaudeStepEngineMode,
    /// `SWARM_GEMINI_STUB`: non-empty means stub the Gemini transport.
    pub gemini_stub: bool,
    /// `SELFTEST_SKIP_STEPS`: step ids to skip, parsed from a comma list.
    pub selftest_skip_steps: Vec<String>,
    /// `SELFTEST_FORCE_DEGRADED`: non-empty forces degraded mode.
    pub selftest_force_degraded: bool,
    /// `SWARM_STRICT_SDK_CHECK`: require a real SDK transport (CI mode).
    pub strict_sdk_check: bool,
    /// `METRICS_ENDPOINT`, if set.
    pub metrics_endpoint: Option<String>,
    /// `LOGS_ENDPOINT`, if set.
    pub logs_endpoint: Option<String>,
    /// `TRACE_ENDPOINT`, if set.
    pub trace_endpoint: Option<String>,
}

impl Default for HarnessEnv {
    fn default() -> Self {
        Self {
            run_base: PathBuf::from("./runs"),
            claude_step_engine_mode: ClaudeStepEngineMode::default(),
            gemini_stub: false,
            selftest_skip_steps: Vec::new(),
            selftest_force_degraded: false,
            strict_sdk_check: false,
            metrics_endpoint: None,
            logs_endpoint: None,
            trace_endpoint: None,
        }
    }
}

impl HarnessEnv {
    /// Resolve the overlay from `std::env::var`, falling back to defaults
    /// for anything unset.
    #[must_use]
    pub fn from_process_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the overlay from an arbitrary lookup function. Used in tests
    /// to avoid mutating real process environment variables.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut env = Self::default();

        if let Some(v) = lookup("RUN_BASE") {
            env.run_base = PathBuf::from(v);
        }
        if let Some(v) = lookup("SWARM_CLAUDE_STEP_ENGINE_MODE") {
            env.claude_step_engine_mode = match v.as_str() {
                "sdk" => ClaudeStepEngineMode::Sdk,
                _ => ClaudeStepEngineMode::Stub,
            };
        }
        env.gemini_stub = lookup("SWARM_GEMINI_STUB").is_some_and(|v| !v.is_empty());
        if let Some(v) = lookup("SELFTEST_SKIP_STEPS") {
            env.selftest_skip_steps = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        env.selftest_force_degraded =
            lookup("SELFTEST_FORCE_DEGRADED").is_some_and(|v| !v.is_empty());
        env.strict_sdk_check = lookup("SWARM_STRICT_SDK_CHECK").is_some_and(|v| !v.is_empty());
        env.metrics_endpoint = lookup("METRICS_ENDPOINT");
        env.logs_endpoint = lookup("LOGS_ENDPOINT");
        env.trace_endpoint = lookup("TRACE_ENDPOINT");

        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: HashMap<&str, &str>) -> impl Fn(&str) -> Option<String> {
        move |key| vars.get(key).map(|v| v.to_string())
    }

    #[test]
    fn defaults_when_nothing_set() {
        let env = HarnessEnv::from_lookup(lookup(HashMap::new()));
        assert_eq!(env.run_base, PathBuf::from("./runs"));
        assert_eq!(env.claude_step_engine_mode, ClaudeStepEngineMode::Stub);
        assert!(!env.gemini_stub);
        assert!(env.selftest_skip_steps.is_empty());
    }

    #[test]
    fn parses_skip_steps_list() {
        let vars = HashMap::from([("SELFTEST_SKIP_STEPS", "a, b ,c")]);
        let env = HarnessEnv::from_lookup(lookup(vars));
        assert_eq!(env.selftest_skip_steps, vec!["a", "b", "c"]);
    }

    #[test]
    fn sdk_mode_requires_exact_match() {
        let vars = HashMap::from([("SWARM_CLAUDE_STEP_ENGINE_MODE", "sdk")]);
        let env = HarnessEnv::from_lookup(lookup(vars));
        assert_eq!(env.claude_step_engine_mode, ClaudeStepEngineMode::Sdk);

        let vars = HashMap::from([("SWARM_CLAUDE_STEP_ENGINE_MODE", "anything-else")]);
        let env = HarnessEnv::from_lookup(lookup(vars));
        assert_eq!(env.claude_step_engine_mode, ClaudeStepEngineMode::Stub);
    }

    #[test]
    fn boolean_flags_are_presence_based() {
        let vars = HashMap::from([("SELFTEST_FORCE_DEGRADED", "1")]);
        let env = HarnessEnv::from_lookup(lookup(vars));
        assert!(env.selftest_force_degraded);
    }

    #[test]
    fn observability_endpoints_pass_through() {
        let vars = HashMap::from([("METRICS_ENDPOINT", "http://localhost:9090")]);
        let env = HarnessEnv::from_lookup(lookup(vars));
        assert_eq!(env.metrics_endpoint.as_deref(), Some("http://localhost:9090"));
        assert_eq!(env.logs_endpoint, None);
    }
}
