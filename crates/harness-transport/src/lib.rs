// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transport Port (§4.3): the capability-typed interface the Step Engine
//! depends on. Concrete network-backed transports (an SDK, a CLI
//! subprocess) live outside this crate and outside this repository; only
//! the built-in [`stub::StubTransport`] is implemented end-to-end here.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod stub;
pub mod structured_output;

use async_trait::async_trait;
use harness_error::HarnessError;
use harness_protocol::Event;
use tokio::sync::mpsc;

/// Capabilities a transport may declare. The Step Engine reads these to
/// decide structured-output fallback strategy and whether to offer
/// interrupt/hot-context/rewind affordances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportCapabilities {
    /// Transport can return structured output matching a JSON Schema natively.
    pub supports_output_format: bool,
    /// Transport supports pre/post tool-use governance hooks.
    pub supports_hooks: bool,
    /// Transport supports best-effort cancellation via `interrupt()`.
    pub supports_interrupts: bool,
    /// Transport can resume with warm context rather than a cold prompt.
    pub supports_hot_context: bool,
    /// Transport streams events incrementally rather than all-at-once.
    pub supports_streaming: bool,
    /// Transport exposes native tool-calling (vs. text-embedded tool syntax).
    pub supports_native_tools: bool,
    /// Transport emits `tool_call`/`tool_result` events observable by the engine.
    pub supports_tool_observation: bool,
    /// Transport supports rewinding to a prior checkpoint within a session.
    pub supports_rewind: bool,
    /// Transport executes within an isolated sandbox.
    pub supports_sandbox: bool,
}

/// Options passed to [`Transport::execute`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// JSON Schema the caller wants the final output to conform to, if any.
    pub output_schema: Option<serde_json::Value>,
    /// Soft token budget; transports that support it should stop near it.
    pub token_budget: Option<u64>,
}

/// The capability-typed execution interface the core depends on.
///
/// Implementations stream [`Event`]s over the returned channel and resolve
/// once the stream has terminated (a `result` event was sent, or the
/// transport failed before producing one).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable identifier for this transport (embedded in receipts
    /// as `engine_id`).
    fn engine_id(&self) -> &str;

    /// Capabilities this transport advertises.
    fn capabilities(&self) -> TransportCapabilities;

    /// Execute `prompt`, streaming [`Event`]s into `events_tx` until a
    /// terminal `result` event is sent.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] with `ErrorCode::TransportError` if the
    /// transport fails before producing a terminal event.
    async fn execute(
        &self,
        prompt: &str,
        options: &ExecuteOptions,
        events_tx: mpsc::Sender<Event>,
    ) -> Result<(), HarnessError>;

    /// Best-effort cancellation of an in-flight `execute` call.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] if the transport does not support
    /// interruption (`capabilities().supports_interrupts == false`) or the
    /// cancellation attempt itself fails.
    async fn interrupt(&self) -> Result<(), HarnessError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capabilities_are_all_false() {
        let caps = TransportCapabilities::default();
        assert!(!caps.supports_streaming);
        assert!(!caps.supports_sandbox);
    }
}
