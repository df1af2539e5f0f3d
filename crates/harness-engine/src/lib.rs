// SPDX-License-Identifier: MIT OR Apache-2.0
//! Step Engine (§4.4): executes one step end-to-end — budgets its prompt,
//! invokes a transport, parses the declared structured output, and writes
//! the receipt and handoff envelope.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod output;

pub use engine::{AttemptOptions, StepEngine, StepLogEntry};
pub use output::StepOutputPayload;
