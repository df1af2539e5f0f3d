//! The [`FlowOrchestrator`]: sequences a flow's steps, drives microloops,
//! and interprets routing decisions (§4.5, §4.6).

use chrono::Utc;
use harness_core::flow::{Flow, Step};
use harness_core::step::{EffectiveBudget, PriorStepDescriptor, StepContext};
use harness_core::{
    Evidence, HandoffEnvelope, HandoffTier, Receipt, ReceiptBuilder, RoutingDecision, RoutingDecisionRecord, ScentEntry, ScentTrail,
    StepResult, StepStatus,
};
use harness_budget::StepBudget;
use harness_engine::{AttemptOptions, StepEngine};
use harness_error::{ErrorCode, HarnessError, HarnessErrorDto};
use harness_store::RunStore;
use harness_transport::Transport;
use serde::Serialize;

use crate::detour::DetourCatalog;
use crate::signature::progress_signature;

/// Default microloop iteration cap (§4.5): three author/critic round trips
/// before a loop is forced to a terminal UNVERIFIED outcome.
pub const DEFAULT_ITERATION_CAP: u32 = 3;

/// How a flow run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcomeStatus {
    /// Every declared step (or its routed replacement) reached a terminal
    /// status and the flow ran off the end of its step list.
    Completed,
    /// A step or microloop signaled TERMINATE; later steps were skipped.
    Terminated,
}

/// One step actually executed while driving a flow. Distinct from a
/// declared [`Step`] in that a sidequest's id is not necessarily one of
/// the flow's normally-sequenced steps.
#[derive(Debug, Clone)]
pub struct StepRun {
    /// Id of the step (or sidequest) that ran.
    pub step_id: String,
    /// Agent key that produced this run's receipt.
    pub agent_key: String,
    /// The step's outcome.
    pub result: StepResult,
}

/// Outcome of driving one flow to completion or termination.
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    /// The flow that ran.
    pub flow_key: String,
    /// How the run ended.
    pub status: FlowOutcomeStatus,
    /// Every step run, in execution order.
    pub steps: Vec<StepRun>,
}

/// Drives one flow's steps against a [`StepEngine`], interpreting routing
/// decisions. Flows advance in declared order unless a routing decision
/// modifies the route (§4.5 invariant).
pub struct FlowOrchestrator<'s> {
    store: &'s RunStore,
    engine: StepEngine<'s>,
    detours: &'s DetourCatalog,
}

impl<'s> FlowOrchestrator<'s> {
    /// Build an orchestrator writing artifacts through `store` and
    /// resolving DETOUR signals against `detours`.
    #[must_use]
    pub fn new(store: &'s RunStore, detours: &'s DetourCatalog) -> Self {
        Self { store, engine: StepEngine::new(store), detours }
    }

    /// Run `flow` to completion or termination, appending scent entries
    /// for documented assumptions and routing-driven escalations.
    pub async fn run_flow(&self, flow: &Flow, run_id: &str, scent: &mut ScentTrail, transport: &dyn Transport) -> FlowOutcome {
        let mut steps_out: Vec<StepRun> = Vec::new();
        let mut prior: Vec<PriorStepDescriptor> = Vec::new();
        let mut idx = 0usize;

        while idx < flow.steps.len() {
            let step = &flow.steps[idx];

            if self.missing_inputs(flow, step) {
                let (result, receipt) = self.skip_blocked(run_id, flow, step);
                scent.push(ScentEntry {
                    flow_key: flow.flow_key.clone(),
                    rationale: format!("step '{}' skipped: a required input artifact is missing", step.step_id),
                    assumption: Some("the missing artifact will be supplied by a later run or an upstream detour".to_string()),
                });
                prior.push(self.descriptor(step, &receipt));
                steps_out.push(StepRun { step_id: step.step_id.clone(), agent_key: step.agent_key.clone(), result });
                idx += 1;
                continue;
            }

            if let Some(partner_idx) = step.loop_partner {
                if idx < partner_idx {
                    let (outcome, pair_steps) = self.run_microloop(run_id, flow, idx, partner_idx, &mut prior, scent, transport).await;
                    steps_out.extend(pair_steps);
                    if outcome == RoutingDecision::Terminate {
                        return FlowOutcome { flow_key: flow.flow_key.clone(), status: FlowOutcomeStatus::Terminated, steps: steps_out };
                    }
                    idx = partner_idx + 1;
                    continue;
                }
                // The partner with the lower index already drove this pair.
                idx += 1;
                continue;
            }

            let ctx = self.build_context(run_id, flow, step, &prior);
            let opts = self.attempt_options(flow, step, self.next_step_id(flow, idx));
            let (result, receipt) = self.engine.execute(&ctx, 1, opts, self.step_budget(step), transport).await;
            prior.push(self.descriptor(step, &receipt));
            steps_out.push(StepRun { step_id: step.step_id.clone(), agent_key: step.agent_key.clone(), result });

            let decision = self
                .handle_decision(run_id, flow, step, false, &receipt, &mut prior, &mut steps_out, scent, transport)
                .await;
            if decision == RoutingDecision::Terminate {
                return FlowOutcome { flow_key: flow.flow_key.clone(), status: FlowOutcomeStatus::Terminated, steps: steps_out };
            }
            idx += 1;
        }

        FlowOutcome { flow_key: flow.flow_key.clone(), status: FlowOutcomeStatus::Completed, steps: steps_out }
    }

    /// Drive one author/critic microloop pair to its terminal decision
    /// (§4.5). Returns the decision that ends the loop and every step run
    /// along the way (including any detour sidequests).
    async fn run_microloop(
        &self,
        run_id: &str,
        flow: &Flow,
        author_idx: usize,
        critic_idx: usize,
        prior: &mut Vec<PriorStepDescriptor>,
        scent: &mut ScentTrail,
        transport: &dyn Transport,
    ) -> (RoutingDecision, Vec<StepRun>) {
        let author_step = &flow.steps[author_idx];
        let critic_step = &flow.steps[critic_idx];
        let mut steps_out = Vec::new();
        let mut last_signature: Option<String> = None;

        for iteration in 1..=DEFAULT_ITERATION_CAP {
            let author_ctx = self.build_context(run_id, flow, author_step, prior);
            let author_opts = self.attempt_options(flow, author_step, Some(critic_step.step_id.as_str()));
            let (author_result, author_receipt) =
                self.engine.execute(&author_ctx, iteration, author_opts, self.step_budget(author_step), transport).await;
            prior.push(self.descriptor(author_step, &author_receipt));
            steps_out.push(StepRun { step_id: author_step.step_id.clone(), agent_key: author_step.agent_key.clone(), result: author_result });

            let critic_ctx = self.build_context(run_id, flow, critic_step, prior);
            let critic_opts = self.attempt_options(flow, critic_step, Some(author_step.step_id.as_str()));
            let (critic_result, critic_receipt) =
                self.engine.execute(&critic_ctx, iteration, critic_opts, self.step_budget(critic_step), transport).await;
            prior.push(self.descriptor(critic_step, &critic_receipt));
            steps_out.push(StepRun { step_id: critic_step.step_id.clone(), agent_key: critic_step.agent_key.clone(), result: critic_result });

            let handoff = self.read_handoff(flow, critic_step);
            let signature = progress_signature(&critic_receipt, &handoff);
            if last_signature.as_deref() == Some(signature.as_str()) {
                self.log_decision(
                    run_id,
                    flow,
                    &critic_step.step_id,
                    RoutingDecision::Escalate,
                    "stall_identical_signature",
                    critic_receipt.forensic_summary.as_deref(),
                    None,
                );
                scent.push(ScentEntry {
                    flow_key: flow.flow_key.clone(),
                    rationale: format!("microloop '{}'/'{}' stalled: identical progress signature twice in a row", author_step.step_id, critic_step.step_id),
                    assumption: None,
                });
                return (RoutingDecision::Escalate, steps_out);
            }
            last_signature = Some(signature);

            let decision = self
                .handle_decision(run_id, flow, critic_step, true, &critic_receipt, prior, &mut steps_out, scent, transport)
                .await;

            match decision {
                RoutingDecision::Continue | RoutingDecision::InjectFlow => return (RoutingDecision::Continue, steps_out),
                RoutingDecision::Loop => {
                    if iteration == DEFAULT_ITERATION_CAP {
                        self.log_decision(
                            run_id,
                            flow,
                            &critic_step.step_id,
                            RoutingDecision::Escalate,
                            "max_iterations",
                            critic_receipt.forensic_summary.as_deref(),
                            None,
                        );
                        return (RoutingDecision::Escalate, steps_out);
                    }
                }
                RoutingDecision::Escalate => return (RoutingDecision::Escalate, steps_out),
                RoutingDecision::Terminate => return (RoutingDecision::Terminate, steps_out),
                RoutingDecision::Detour => unreachable!("handle_decision resolves DETOUR before returning"),
            }
        }

        (RoutingDecision::Escalate, steps_out)
    }

    /// Interpret one receipt's routing signal to its fully-resolved effect,
    /// running a DETOUR sidequest inline (capped at one recursion) and
    /// logging every non-CONTINUE decision. Returns the decision the
    /// caller should act on: CONTINUE (advance), LOOP (only valid when
    /// `has_partner`), ESCALATE, or TERMINATE.
    #[allow(clippy::too_many_arguments)]
    async fn handle_decision(
        &self,
        run_id: &str,
        flow: &Flow,
        step: &Step,
        has_partner: bool,
        receipt: &Receipt,
        prior: &mut Vec<PriorStepDescriptor>,
        steps_out: &mut Vec<StepRun>,
        scent: &mut ScentTrail,
        transport: &dyn Transport,
    ) -> RoutingDecision {
        let mut decision = receipt.routing_signal.unwrap_or(RoutingDecision::Continue);
        let mut forensic = receipt.forensic_summary.clone();
        let mut acting_step_id = step.step_id.clone();
        let mut acting_has_partner = has_partner;

        let mut detours_taken = 0u32;
        while decision == RoutingDecision::Detour {
            if detours_taken >= 1 {
                self.log_decision(run_id, flow, &acting_step_id, RoutingDecision::Escalate, "detour_recursion_capped", forensic.as_deref(), None);
                return RoutingDecision::Escalate;
            }
            let Some(tag) = forensic.clone() else {
                self.log_decision(run_id, flow, &acting_step_id, RoutingDecision::Escalate, "detour_tag_missing", None, None);
                return RoutingDecision::Escalate;
            };
            let Some(sidequest_id) = self.detours.lookup(&tag).map(str::to_string) else {
                self.log_decision(run_id, flow, &acting_step_id, RoutingDecision::Escalate, "detour_unmatched_tag", Some(&tag), None);
                return RoutingDecision::Escalate;
            };
            let Some(sidequest_step) = flow.step(&sidequest_id) else {
                self.log_decision(run_id, flow, &acting_step_id, RoutingDecision::Escalate, "detour_target_missing", Some(&tag), Some(&sidequest_id));
                return RoutingDecision::Escalate;
            };
            self.log_decision(run_id, flow, &acting_step_id, RoutingDecision::Detour, "detour_dispatched", Some(&tag), Some(&sidequest_id));

            let ctx = self.build_context(run_id, flow, sidequest_step, prior);
            let opts = self.attempt_options(flow, sidequest_step, None);
            let (result, side_receipt) = self.engine.execute(&ctx, 1, opts, self.step_budget(sidequest_step), transport).await;
            prior.push(self.descriptor(sidequest_step, &side_receipt));
            steps_out.push(StepRun { step_id: sidequest_step.step_id.clone(), agent_key: sidequest_step.agent_key.clone(), result });

            decision = side_receipt.routing_signal.unwrap_or(RoutingDecision::Continue);
            forensic = side_receipt.forensic_summary.clone();
            acting_step_id = sidequest_step.step_id.clone();
            acting_has_partner = sidequest_step.loop_partner.is_some();
            detours_taken += 1;
        }

        match decision {
            RoutingDecision::Continue => {}
            RoutingDecision::Loop => {
                if !acting_has_partner {
                    self.log_decision(run_id, flow, &acting_step_id, RoutingDecision::Escalate, "loop_without_partner", forensic.as_deref(), None);
                    return RoutingDecision::Escalate;
                }
                self.log_decision(run_id, flow, &acting_step_id, RoutingDecision::Loop, "microloop_continue", forensic.as_deref(), None);
            }
            RoutingDecision::Escalate => {
                self.log_decision(run_id, flow, &acting_step_id, RoutingDecision::Escalate, "critic_escalated", forensic.as_deref(), None);
                scent.push(ScentEntry {
                    flow_key: flow.flow_key.clone(),
                    rationale: format!("step '{acting_step_id}' escalated"),
                    assumption: forensic.clone(),
                });
            }
            RoutingDecision::InjectFlow => {
                self.write_injection(flow, &acting_step_id, step.agent_key.as_str());
                self.log_decision(run_id, flow, &acting_step_id, RoutingDecision::InjectFlow, "sub_flow_injected", forensic.as_deref(), None);
            }
            RoutingDecision::Terminate => {
                self.log_decision(run_id, flow, &acting_step_id, RoutingDecision::Terminate, "flow_terminated", forensic.as_deref(), None);
            }
            RoutingDecision::Detour => unreachable!("resolved by the loop above"),
        }

        decision
    }

    fn missing_inputs(&self, flow: &Flow, step: &Step) -> bool {
        let flow_dir = self.store.run_root().join(&flow.flow_key);
        step.required_inputs.iter().any(|rel| !flow_dir.join(rel).exists())
    }

    fn skip_blocked(&self, run_id: &str, flow: &Flow, step: &Step) -> (StepResult, Receipt) {
        let now = Utc::now().to_rfc3339();
        let flow_dir = self.store.run_root().join(&flow.flow_key);
        let missing: Vec<&str> = step.required_inputs.iter().map(String::as_str).filter(|rel| !flow_dir.join(rel).exists()).collect();

        let err = HarnessError::new(ErrorCode::ArtifactMissing, "required input missing; routed fix-forward to SKIP")
            .with_context("missing_inputs", missing.join(","));
        let dto = HarnessErrorDto::from(&err);

        let receipt = ReceiptBuilder::new(run_id, flow.flow_key.clone(), step.step_id.clone(), step.agent_key.clone(), "orchestrator")
            .timing(now.clone(), now.clone(), 0)
            .status(StepStatus::Skip)
            .evidence(Evidence::Unmeasured { measured: false, reason: "step skipped: required input missing".to_string() })
            .error(dto.clone())
            .build();

        let receipt_path = self.store.receipt_path(&flow.flow_key, &step.step_id, &step.agent_key);
        let _ = write_json(self.store, &receipt_path, &receipt);

        let result = StepResult {
            status: StepStatus::Skip,
            started_at: now.clone(),
            ended_at: now,
            duration_ms: 0,
            token_usage: None,
            transcript_path: String::new(),
            receipt_path: receipt_path.display().to_string(),
            handoff_path: None,
            context_truncation: None,
            error: Some(dto),
        };
        (result, receipt)
    }

    fn build_context(&self, run_id: &str, flow: &Flow, step: &Step, prior: &[PriorStepDescriptor]) -> StepContext {
        let resolved = harness_budget::ContextBudget::resolve(Some(&step.budget_override), None, None);
        StepContext {
            run_id: run_id.to_string(),
            flow_key: flow.flow_key.clone(),
            step_id: step.step_id.clone(),
            agent_key: step.agent_key.clone(),
            role: step.role,
            budget: EffectiveBudget {
                context_total: resolved.context_total,
                history_recent_max: resolved.history_recent_max,
                history_older_max: resolved.history_older_max,
            },
            prior_steps: prior.to_vec(),
            injected_inputs: std::collections::BTreeMap::new(),
        }
    }

    fn attempt_options<'a>(&self, flow: &'a Flow, step: &'a Step, to_step: Option<&'a str>) -> AttemptOptions<'a> {
        let to_step = to_step.or_else(|| self.next_step_id(flow, flow.step_index(&step.step_id).unwrap_or(usize::MAX)));
        AttemptOptions { step_budget_override: Some(&step.budget_override), flow_budget_override: None, to_step, tier: None }
    }

    fn next_step_id<'a>(&self, flow: &'a Flow, idx: usize) -> Option<&'a str> {
        flow.steps.get(idx + 1).map(|s| s.step_id.as_str())
    }

    fn step_budget(&self, step: &Step) -> StepBudget {
        StepBudget { token_budget: step.token_budget, wall_clock_timeout: Some(step.timeout) }
    }

    fn descriptor(&self, step: &Step, receipt: &Receipt) -> PriorStepDescriptor {
        let receipt_json = serde_json::to_string(receipt).unwrap_or_default();
        let handoff_json = self
            .store
            .read(&self.store.handoff_path(&receipt.flow_key, &step.step_id, &step.agent_key))
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default();
        PriorStepDescriptor { step_id: step.step_id.clone(), agent_key: step.agent_key.clone(), receipt_json, handoff_json }
    }

    fn read_handoff(&self, flow: &Flow, step: &Step) -> HandoffEnvelope {
        let path = self.store.handoff_path(&flow.flow_key, &step.step_id, &step.agent_key);
        self.store.read(&path).ok().and_then(|bytes| serde_json::from_slice(&bytes).ok()).unwrap_or_else(|| HandoffEnvelope {
            tier: HandoffTier::Standard,
            from_step: step.step_id.clone(),
            to_step: String::new(),
            pointers: Vec::new(),
            structured_fields: Default::default(),
            notes: String::new(),
        })
    }

    fn write_injection(&self, flow: &Flow, step_id: &str, agent_key: &str) {
        let handoff_path = self.store.handoff_path(&flow.flow_key, step_id, agent_key);
        if let Ok(bytes) = self.store.read(&handoff_path) {
            let injection_path = self.store.routing_injection_path(&flow.flow_key, step_id);
            let _ = self.store.write(&injection_path, &bytes);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn log_decision(
        &self,
        run_id: &str,
        flow: &Flow,
        step_id: &str,
        decision: RoutingDecision,
        reason: &str,
        forensic_summary: Option<&str>,
        next_step_id: Option<&str>,
    ) {
        if !decision.is_logged() {
            return;
        }
        let record = RoutingDecisionRecord {
            ts: Utc::now().to_rfc3339(),
            run_id: run_id.to_string(),
            flow_key: flow.flow_key.clone(),
            step_id: step_id.to_string(),
            decision,
            reason: reason.to_string(),
            forensic_summary: forensic_summary.map(String::from),
            next_step_id: next_step_id.map(String::from),
        };
        let path = self.store.routing_decisions_path(&flow.flow_key);
        let _ = self.store.append_jsonl(&path, &record);
        tracing::info!(run_id, flow_key = %flow.flow_key, step_id, ?decision, reason, "routing decision recorded");
    }
}

fn write_json<T: Serialize>(store: &RunStore, path: &std::path::Path, value: &T) -> Result<(), HarnessError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| HarnessError::new(ErrorCode::Internal, "failed to serialize artifact").with_source(e))?;
    store.write(path, &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::flow::AgentRole;
    use harness_transport::stub::StubTransport;
    use std::time::Duration;

    fn step(id: &str, role: AgentRole, loop_partner: Option<usize>) -> Step {
        Step {
            step_id: id.to_string(),
            agent_key: format!("{id}-agent"),
            role,
            required_inputs: vec![],
            required_outputs: vec![],
            optional_outputs: vec![],
            loop_partner,
            budget_override: Default::default(),
            timeout: Duration::from_secs(30),
            token_budget: None,
        }
    }

    fn flow_with(steps: Vec<Step>) -> Flow {
        Flow { flow_key: "plan".to_string(), version: "1".to_string(), title: "Plan".to_string(), steps, decision_artifacts: vec![] }
    }

    #[tokio::test]
    async fn sequential_flow_runs_every_step_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path(), "run-1").unwrap();
        let catalog = DetourCatalog::new();
        let orchestrator = FlowOrchestrator::new(&store, &catalog);
        let transport = StubTransport::new();
        let mut scent = ScentTrail::default();

        let flow = flow_with(vec![step("one", AgentRole::Author, None), step("two", AgentRole::Reporter, None)]);
        let outcome = orchestrator.run_flow(&flow, "run-1", &mut scent, &transport).await;

        assert_eq!(outcome.status, FlowOutcomeStatus::Completed);
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(outcome.steps[0].step_id, "one");
        assert_eq!(outcome.steps[1].step_id, "two");
    }

    #[tokio::test]
    async fn missing_required_input_is_skipped_not_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path(), "run-1").unwrap();
        let catalog = DetourCatalog::new();
        let orchestrator = FlowOrchestrator::new(&store, &catalog);
        let transport = StubTransport::new();
        let mut scent = ScentTrail::default();

        let mut blocked = step("needs-input", AgentRole::Author, None);
        blocked.required_inputs = vec!["does-not-exist.md".to_string()];
        let flow = flow_with(vec![blocked, step("after", AgentRole::Reporter, None)]);

        let outcome = orchestrator.run_flow(&flow, "run-1", &mut scent, &transport).await;
        assert_eq!(outcome.status, FlowOutcomeStatus::Completed);
        assert_eq!(outcome.steps[0].result.status, StepStatus::Skip);
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(scent.entries.len(), 1);
    }

    #[tokio::test]
    async fn microloop_pair_without_routing_signal_continues_after_one_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path(), "run-1").unwrap();
        let catalog = DetourCatalog::new();
        let orchestrator = FlowOrchestrator::new(&store, &catalog);
        let transport = StubTransport::new();
        let mut scent = ScentTrail::default();

        let flow = flow_with(vec![step("author", AgentRole::Author, Some(1)), step("critic", AgentRole::Critic, Some(0))]);
        let outcome = orchestrator.run_flow(&flow, "run-1", &mut scent, &transport).await;

        assert_eq!(outcome.status, FlowOutcomeStatus::Completed);
        assert_eq!(outcome.steps.len(), 2);
    }
}
