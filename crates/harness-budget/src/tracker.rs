//! Resource budget tracking (§5): each step has a soft `token_budget` and a
//! hard `wall_clock_timeout`. Crossing 90% of the token budget should make
//! the engine emit a `token_warning` event.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::{Duration, Instant};

/// Fraction of the token budget at which a warning fires.
pub const TOKEN_WARNING_THRESHOLD: f64 = 0.9;

/// Per-step resource caps. `None` means unlimited for that dimension.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepBudget {
    /// Soft token cap; crossing it emits a warning but does not fail the step.
    pub token_budget: Option<u64>,
    /// Hard wall-clock cap; crossing it is a TIMEOUT.
    pub wall_clock_timeout: Option<Duration>,
}

/// Thread-safe tracker for one step's resource usage.
pub struct BudgetTracker {
    budget: StepBudget,
    tokens_used: AtomicU64,
    start: std::sync::Mutex<Option<Instant>>,
}

impl fmt::Debug for BudgetTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetTracker")
            .field("budget", &self.budget)
            .field("tokens_used", &self.tokens_used.load(Relaxed))
            .finish()
    }
}

impl BudgetTracker {
    /// Create a tracker for the given per-step budget. Counters start at zero.
    #[must_use]
    pub fn new(budget: StepBudget) -> Self {
        Self {
            budget,
            tokens_used: AtomicU64::new(0),
            start: std::sync::Mutex::new(None),
        }
    }

    /// Mark the beginning of step execution.
    pub fn start_timer(&self) {
        *self.start.lock().expect("start mutex poisoned") = Some(Instant::now());
    }

    /// Record `count` tokens consumed (prompt + completion combined).
    pub fn record_tokens(&self, count: u64) {
        self.tokens_used.fetch_add(count, Relaxed);
    }

    /// Check current usage against the step's budget.
    #[must_use]
    pub fn check(&self) -> BudgetStatus {
        let tokens = self.tokens_used.load(Relaxed);
        let elapsed = self.elapsed();

        if let Some(limit) = self.budget.wall_clock_timeout
            && let Some(el) = elapsed
            && el > limit
        {
            return BudgetStatus::Exceeded(BudgetViolation::TimeoutExceeded {
                elapsed: el,
                limit,
            });
        }

        if let Some(limit) = self.budget.token_budget {
            let pct = tokens as f64 / limit as f64;
            if pct >= TOKEN_WARNING_THRESHOLD {
                return BudgetStatus::Warning { usage_pct: pct * 100.0 };
            }
        }

        BudgetStatus::WithinLimits
    }

    /// Remaining budget in each dimension.
    #[must_use]
    pub fn remaining(&self) -> BudgetRemaining {
        let tokens = self.tokens_used.load(Relaxed);
        let elapsed = self.elapsed();
        BudgetRemaining {
            tokens: self.budget.token_budget.map(|m| m.saturating_sub(tokens)),
            duration: self
                .budget
                .wall_clock_timeout
                .map(|m| elapsed.map_or(m, |el| m.saturating_sub(el))),
        }
    }

    fn elapsed(&self) -> Option<Duration> {
        self.start.lock().expect("start mutex poisoned").map(|s| s.elapsed())
    }
}

/// Result of a budget check.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetStatus {
    /// Usage is below the warning threshold.
    WithinLimits,
    /// Token usage is at or above 90% of `token_budget` (soft — a
    /// `token_warning` event, not a failure).
    Warning {
        /// Token usage as a percentage of the budget.
        usage_pct: f64,
    },
    /// A hard limit (wall-clock timeout) was exceeded.
    Exceeded(BudgetViolation),
}

/// Details about which hard limit was exceeded.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetViolation {
    /// The step's wall-clock timeout was exceeded.
    TimeoutExceeded {
        /// Time elapsed since `start_timer` was called.
        elapsed: Duration,
        /// Configured timeout.
        limit: Duration,
    },
}

impl fmt::Display for BudgetViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeoutExceeded { elapsed, limit } => write!(
                f,
                "step timed out: elapsed {:.1}s, limit {:.1}s",
                elapsed.as_secs_f64(),
                limit.as_secs_f64()
            ),
        }
    }
}

/// Remaining budget in each dimension. `None` means that dimension has no cap.
#[derive(Debug, Clone)]
pub struct BudgetRemaining {
    /// Remaining tokens, if `token_budget` was set.
    pub tokens: Option<u64>,
    /// Remaining wall-clock duration, if `wall_clock_timeout` was set.
    pub duration: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_limits_with_no_caps() {
        let t = BudgetTracker::new(StepBudget::default());
        t.record_tokens(1_000_000);
        assert_eq!(t.check(), BudgetStatus::WithinLimits);
    }

    #[test]
    fn token_warning_fires_at_ninety_percent() {
        let t = BudgetTracker::new(StepBudget { token_budget: Some(100), wall_clock_timeout: None });
        t.record_tokens(90);
        assert!(matches!(t.check(), BudgetStatus::Warning { .. }));
    }

    #[test]
    fn token_warning_does_not_fire_below_threshold() {
        let t = BudgetTracker::new(StepBudget { token_budget: Some(100), wall_clock_timeout: None });
        t.record_tokens(50);
        assert_eq!(t.check(), BudgetStatus::WithinLimits);
    }

    #[test]
    fn timeout_is_a_hard_exceed() {
        let t = BudgetTracker::new(StepBudget {
            token_budget: None,
            wall_clock_timeout: Some(Duration::from_millis(1)),
        });
        t.start_timer();
        std::thread::sleep(Duration::from_millis(10));
        assert!(matches!(
            t.check(),
            BudgetStatus::Exceeded(BudgetViolation::TimeoutExceeded { .. })
        ));
    }

    #[test]
    fn remaining_tokens_saturate_at_zero() {
        let t = BudgetTracker::new(StepBudget { token_budget: Some(10), wall_clock_timeout: None });
        t.record_tokens(50);
        assert_eq!(t.remaining().tokens, Some(0));
    }
}
