// SPDX-License-Identifier: MIT OR Apache-2.0
//! Flow Orchestrator and Routing Protocol (§4.5, §4.6): sequences a flow's
//! steps, drives author/critic microloops, and interprets routing
//! decisions rendered on step receipts.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod detour;
pub mod orchestrator;
pub mod signature;

pub use detour::{DetourCatalog, DetourEntry};
pub use orchestrator::{FlowOrchestrator, FlowOutcome, FlowOutcomeStatus, StepRun, DEFAULT_ITERATION_CAP};
pub use signature::progress_signature;
