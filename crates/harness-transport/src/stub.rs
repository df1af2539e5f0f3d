//! Deterministic, in-process, no-network stub transport. This is the
//! default transport and the only one this repository carries an
//! implementation for end-to-end; it exists so the Step Engine, Flow
//! Orchestrator, and Selftest Runner are fully testable without a real
//! LLM backend.

use async_trait::async_trait;
use harness_error::{ErrorCode, HarnessError};
use harness_protocol::Event;
use tokio::sync::mpsc;

use crate::{ExecuteOptions, Transport, TransportCapabilities};

/// A transport that deterministically echoes its input back as a
/// completed, successful execution. Never makes a network call.
#[derive(Debug, Clone, Default)]
pub struct StubTransport;

impl StubTransport {
    /// Create a new stub transport.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for StubTransport {
    fn engine_id(&self) -> &str {
        "stub"
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            supports_output_format: true,
            supports_streaming: true,
            ..TransportCapabilities::default()
        }
    }

    async fn execute(
        &self,
        prompt: &str,
        options: &ExecuteOptions,
        events_tx: mpsc::Sender<Event>,
    ) -> Result<(), HarnessError> {
        let send = |event: Event| {
            let tx = events_tx.clone();
            async move {
                tx.send(event).await.map_err(|_| {
                    HarnessError::new(ErrorCode::TransportError, "event receiver dropped")
                })
            }
        };

        send(Event::Message {
            text: format!("stub: processed {} prompt bytes", prompt.len()),
        })
        .await?;

        let input_tokens = (prompt.len() / 4) as u64;
        send(Event::Usage { input_tokens, output_tokens: 8 }).await?;

        let output = match &options.output_schema {
            Some(_schema) => Some(serde_json::json!({ "stub_echo": prompt })),
            None => None,
        };
        send(Event::Result { success: true, output }).await?;
        Ok(())
    }

    async fn interrupt(&self) -> Result<(), HarnessError> {
        Err(HarnessError::new(
            ErrorCode::TransportError,
            "stub transport does not support interruption",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_emits_terminal_result() {
        let transport = StubTransport::new();
        let (tx, mut rx) = mpsc::channel(16);
        transport.execute("hello world", &ExecuteOptions::default(), tx).await.unwrap();

        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn output_present_only_when_schema_requested() {
        let transport = StubTransport::new();
        let (tx, mut rx) = mpsc::channel(16);
        let options = ExecuteOptions {
            output_schema: Some(serde_json::json!({"type": "object"})),
            token_budget: None,
        };
        transport.execute("prompt", &options, tx).await.unwrap();

        let mut last = None;
        while let Some(ev) = rx.recv().await {
            last = Some(ev);
        }
        match last.unwrap() {
            Event::Result { output, .. } => assert!(output.is_some()),
            other => panic!("expected Result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn interrupt_is_unsupported() {
        let transport = StubTransport::new();
        assert!(transport.interrupt().await.is_err());
        assert!(!transport.capabilities().supports_interrupts);
    }
}
