// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stable contract types for the SDLC harness.
//!
//! This crate defines the data model shared by every other harness crate:
//! [`Flow`]/[`Step`]/[`Agent`] configuration, [`StepContext`]/[`StepResult`]
//! invocation types, the [`Receipt`]/[`HandoffEnvelope`]/[`DegradationEntry`]
//! artifact schemas, the [`RoutingDecision`] enum, and canonical-JSON
//! hashing used for receipt integrity.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod flow;
pub mod hashing;
pub mod receipt;
pub mod routing;
pub mod scent;
pub mod step;

pub use flow::{Agent, AgentRole, Flow, Step};
pub use hashing::{canonical_json, receipt_hash, sha256_hex};
pub use receipt::{
    ContextTruncation, DegradationEntry, DegradationSeverity, DegradationStatus, Evidence,
    HandoffEnvelope, HandoffTier, Receipt, ReceiptBuilder, TokenUsage,
};
pub use routing::{RoutingDecision, RoutingDecisionRecord};
pub use scent::{ScentEntry, ScentTrail};
pub use step::{StepContext, StepResult, StepStatus};

/// Schema/contract version stamped on every receipt and selftest report.
pub const CONTRACT_VERSION: &str = "1.0.0";

/// Flow keys, in pipeline order. Fixed at six stages — the pipeline is not
/// user-extensible.
pub const FLOW_KEYS: [&str; 6] = ["signal", "plan", "build", "gate", "deploy", "wisdom"];
