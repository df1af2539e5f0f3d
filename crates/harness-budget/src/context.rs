//! Context Budgeter (§4.2): assembles a step's prompt from its base
//! instructions and prior-step history, truncating by character budget.

use harness_core::flow::BudgetOverride;
use harness_core::receipt::ContextTruncation;

/// Built-in defaults used when no override applies at any precedence level.
pub const DEFAULT_CONTEXT_TOTAL: usize = 24_000;
/// Built-in default character budget for full-text recent history.
pub const DEFAULT_HISTORY_RECENT_MAX: usize = 12_000;
/// Built-in default character budget for summarized older history.
pub const DEFAULT_HISTORY_OLDER_MAX: usize = 6_000;

/// Resolved, concrete budget for assembling one step's prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    /// Total character budget for the assembled prompt.
    pub context_total: usize,
    /// Character budget for full-text recent-step history.
    pub history_recent_max: usize,
    /// Character budget for summarized older-step history.
    pub history_older_max: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            context_total: DEFAULT_CONTEXT_TOTAL,
            history_recent_max: DEFAULT_HISTORY_RECENT_MAX,
            history_older_max: DEFAULT_HISTORY_OLDER_MAX,
        }
    }
}

impl ContextBudget {
    /// Resolve the effective budget from the first override that sets each
    /// field, in precedence order: step-override, then flow-override, then
    /// profile default, then [`ContextBudget::default`].
    #[must_use]
    pub fn resolve(
        step_override: Option<&BudgetOverride>,
        flow_override: Option<&BudgetOverride>,
        profile_default: Option<ContextBudget>,
    ) -> Self {
        let base = profile_default.unwrap_or_default();
        let mut resolved = base;
        for over in [flow_override, step_override].into_iter().flatten() {
            if let Some(v) = over.context_total {
                resolved.context_total = v;
            }
            if let Some(v) = over.history_recent_max {
                resolved.history_recent_max = v;
            }
            if let Some(v) = over.history_older_max {
                resolved.history_older_max = v;
            }
        }
        resolved
    }
}

/// One prior step's history, pre-rendered to text at two levels of detail.
#[derive(Debug, Clone)]
pub struct PriorStep {
    /// Identifier of the step this history came from.
    pub step_id: String,
    /// Full transcript/receipt text, used while inside `history_recent_max`.
    pub full_text: String,
    /// Handoff-envelope-only summary, used once `history_recent_max` is
    /// exhausted but `history_older_max` still has room.
    pub handoff_summary: String,
}

/// Assemble a step's prompt from `base_prompt` and prior step history,
/// applying the inclusion policy: most-recent-first full text until
/// `history_recent_max` is exhausted, then summarized history until
/// `history_older_max` is exhausted, dropping the oldest steps first on
/// overflow.
///
/// Returns the assembled prompt and a [`ContextTruncation`] record. The
/// invariant `chars_used <= budget_chars` always holds for the returned
/// record when `truncated` is `true`.
#[must_use]
pub fn assemble_prompt(
    base_prompt: &str,
    prior: &[PriorStep],
    budget: &ContextBudget,
) -> (String, ContextTruncation) {
    let mut sections: Vec<String> = Vec::new();
    let mut recent_remaining = budget.history_recent_max;
    let mut older_remaining = budget.history_older_max;
    let mut steps_included = 0usize;

    // Most recent first.
    for step in prior.iter().rev() {
        if recent_remaining >= step.full_text.len() {
            sections.push(step.full_text.clone());
            recent_remaining -= step.full_text.len();
            steps_included += 1;
        } else if older_remaining >= step.handoff_summary.len() {
            sections.push(step.handoff_summary.clone());
            older_remaining -= step.handoff_summary.len();
            steps_included += 1;
        } else {
            // Overflow: oldest steps drop first, and since we walk from the
            // most recent backwards, the remaining (older) steps are all
            // dropped once we hit the first one that doesn't fit.
            break;
        }
    }
    // Restore chronological order for the prompt body.
    sections.reverse();

    let history_block = sections.join("\n---\n");
    let mut prompt: String = String::with_capacity(base_prompt.len() + history_block.len() + 1);
    prompt.push_str(base_prompt);
    if !history_block.is_empty() {
        prompt.push('\n');
        prompt.push_str(&history_block);
    }

    let steps_total = prior.len();
    let mut truncated = steps_included < steps_total;
    let assembled_len = prompt.len();
    if assembled_len > budget.context_total {
        prompt = prompt.chars().take(budget.context_total).collect();
        truncated = true;
    }
    let chars_used = prompt.len();

    (
        prompt,
        ContextTruncation {
            steps_included,
            steps_total,
            chars_used,
            budget_chars: budget.context_total,
            truncated,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, full_len: usize, summary_len: usize) -> PriorStep {
        PriorStep {
            step_id: id.to_string(),
            full_text: "x".repeat(full_len),
            handoff_summary: "y".repeat(summary_len),
        }
    }

    #[test]
    fn includes_all_steps_when_budget_is_generous() {
        let budget = ContextBudget { context_total: 10_000, history_recent_max: 1000, history_older_max: 1000 };
        let prior = vec![step("a", 10, 5), step("b", 10, 5)];
        let (prompt, info) = assemble_prompt("base", &prior, &budget);
        assert_eq!(info.steps_included, 2);
        assert!(!info.truncated);
        assert!(prompt.contains("base"));
    }

    #[test]
    fn drops_oldest_first_on_overflow() {
        let budget = ContextBudget { context_total: 10_000, history_recent_max: 15, history_older_max: 0 };
        let prior = vec![step("a", 10, 5), step("b", 10, 5)];
        let (_, info) = assemble_prompt("base", &prior, &budget);
        // Only the most recent step (b) fits in history_recent_max=15.
        assert_eq!(info.steps_included, 1);
        assert!(info.truncated);
    }

    #[test]
    fn falls_back_to_summary_once_recent_budget_exhausted() {
        let budget = ContextBudget { context_total: 10_000, history_recent_max: 10, history_older_max: 5 };
        let prior = vec![step("a", 10, 5), step("b", 10, 5)];
        let (_, info) = assemble_prompt("base", &prior, &budget);
        assert_eq!(info.steps_included, 2);
    }

    #[test]
    fn chars_used_never_exceeds_budget_chars() {
        let budget = ContextBudget { context_total: 20, history_recent_max: 1000, history_older_max: 1000 };
        let prior = vec![step("a", 100, 50)];
        let (prompt, info) = assemble_prompt("base prompt text", &prior, &budget);
        assert!(info.chars_used <= info.budget_chars);
        assert!(prompt.len() <= budget.context_total);
    }

    #[test]
    fn resolve_honors_precedence_order() {
        let step_override = BudgetOverride { context_total: Some(100), history_recent_max: None, history_older_max: None };
        let flow_override = BudgetOverride { context_total: Some(200), history_recent_max: Some(50), history_older_max: None };
        let resolved = ContextBudget::resolve(Some(&step_override), Some(&flow_override), None);
        // step-override wins for context_total, flow-override fills history_recent_max,
        // built-in default fills history_older_max.
        assert_eq!(resolved.context_total, 100);
        assert_eq!(resolved.history_recent_max, 50);
        assert_eq!(resolved.history_older_max, DEFAULT_HISTORY_OLDER_MAX);
    }
}
