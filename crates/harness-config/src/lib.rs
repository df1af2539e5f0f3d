// SPDX-License-Identifier: MIT OR Apache-2.0
//! Flow/agent registry loading and environment overlay for the SDLC harness.
//!
//! The six flows (signal, plan, build, gate, deploy, wisdom) and the agents
//! they reference are static TOML configuration. This crate loads them,
//! validates cross-flow references `Flow::validate` alone cannot see (agent
//! keys resolving, flow-key set matching the fixed pipeline), and applies
//! the environment-variable overlay described in §6.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod registry;

pub use env::HarnessEnv;
pub use registry::{AgentRegistry, FlowRegistry, RegistryError};
