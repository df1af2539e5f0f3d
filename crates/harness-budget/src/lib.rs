// SPDX-License-Identifier: MIT OR Apache-2.0
//! Context assembly/truncation (§4.2) and resource budget tracking (§5)
//! for the SDLC harness.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod tracker;

pub use context::{assemble_prompt, ContextBudget, PriorStep};
pub use tracker::{BudgetRemaining, BudgetStatus, BudgetTracker, BudgetViolation, StepBudget};
