// SPDX-License-Identifier: MIT OR Apache-2.0
//! Selftest Runner (§4.7): repository and run integrity checks across a
//! fixed 16-step plan, with strict/degraded/kernel-only execution modes,
//! step overrides with a mandatory audit trail, and doctor classification
//! of failures into harness-issue vs service-issue.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod doctor;
pub mod overrides;
pub mod report;
pub mod runner;
pub mod step;
pub mod tier;

pub use doctor::{classify, classify_report, DoctorClass};
pub use overrides::{parse_overrides, SelftestOverride};
pub use report::{
    SelfTestMetadata, SelfTestOutcome, SelfTestStepResult, SelfTestSummary, SelftestReport, SkipReason,
    SELFTEST_REPORT_VERSION,
};
pub use runner::{persist, OverrideAuditRecord, SelftestMode, SelftestRunOutcome, SelftestRunner, STEP_TIMEOUT};
pub use step::{topological_order, CheckOutcome, RegistrySnapshot, SelfTestCommand, SelfTestStep, SelftestContext, STEPS};
pub use tier::{Severity, Tier};
