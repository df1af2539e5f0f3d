// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire protocol for the Transport Port's event stream (§4.3).
//!
//! `execute(prompt, options)` returns a stream of [`Event`]s terminated by
//! either a `result` or a fatal error. The stub transport and any future
//! transport implementation both speak this vocabulary; [`JsonlCodec`]
//! gives the engine a stable on-disk representation for `llm/*.jsonl`.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod version;

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Current protocol version string, e.g. `"harness/v1.0"`.
pub const PROTOCOL_VERSION: &str = "harness/v1.0";

/// One event in a transport's execution stream.
///
/// Tagged on `"kind"` rather than `"t"`: the harness protocol is a log
/// format read back by the HTTP surface and selftest runner, not a
/// bidirectional handshake, so there is no `hello`/`run` pair to
/// disambiguate from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// A chunk of assistant-visible text.
    Message {
        /// Text content of this message chunk.
        text: String,
    },
    /// A tool invocation requested by the agent.
    ToolCall {
        /// Name of the tool being invoked.
        tool: String,
        /// Arguments passed to the tool, as raw JSON.
        args: Value,
    },
    /// The result of a previously emitted tool call.
    ToolResult {
        /// Name of the tool that produced this result.
        tool: String,
        /// Result payload, as raw JSON.
        result: Value,
        /// Whether the tool call failed.
        #[serde(default)]
        is_error: bool,
    },
    /// Token accounting for the step so far.
    Usage {
        /// Input tokens consumed.
        input_tokens: u64,
        /// Output tokens produced.
        output_tokens: u64,
    },
    /// Terminal event: the transport has nothing further to stream.
    Result {
        /// Whether the underlying agent considers this execution successful.
        success: bool,
        /// Final structured or free-text output, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
}

impl Event {
    /// Whether this event ends the stream (§4.3: a `result` event is terminal).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Result { .. })
    }
}

/// Errors from JSONL encoding/decoding of [`Event`] streams.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON serialization or deserialization failure.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A protocol-level invariant was violated.
    #[error("protocol violation: {0}")]
    Violation(String),
}

/// Stateless codec for encoding/decoding [`Event`]s as newline-delimited JSON.
#[derive(Debug, Clone, Copy)]
pub struct JsonlCodec;

impl JsonlCodec {
    /// Serialize an [`Event`] to a newline-terminated JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if the event cannot be serialized.
    pub fn encode(event: &Event) -> Result<String, ProtocolError> {
        let mut s = serde_json::to_string(event)?;
        s.push('\n');
        Ok(s)
    }

    /// Deserialize a single JSON line into an [`Event`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if the line is not valid JSON or does
    /// not match any [`Event`] variant.
    pub fn decode(line: &str) -> Result<Event, ProtocolError> {
        Ok(serde_json::from_str::<Event>(line)?)
    }

    /// Return a lazy iterator that reads JSONL lines from `reader`, skipping
    /// blank lines, and deserializing each into an [`Event`].
    pub fn decode_stream(reader: impl BufRead) -> impl Iterator<Item = Result<Event, ProtocolError>> {
        reader.lines().filter_map(|line_result| match line_result {
            Err(e) => Some(Err(ProtocolError::Io(e))),
            Ok(line) => {
                if line.trim().is_empty() {
                    None
                } else {
                    Some(Self::decode(line.trim()))
                }
            }
        })
    }

    /// Write a single [`Event`] as a newline-terminated JSON line.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on serialization or I/O failure.
    pub fn encode_to_writer(writer: &mut impl Write, event: &Event) -> Result<(), ProtocolError> {
        let line = Self::encode(event)?;
        writer.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Write multiple [`Event`]s as consecutive JSONL lines.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on serialization or I/O failure.
    pub fn encode_many_to_writer(
        writer: &mut impl Write,
        events: &[Event],
    ) -> Result<(), ProtocolError> {
        for event in events {
            Self::encode_to_writer(writer, event)?;
        }
        Ok(())
    }

    /// Validate that a decoded stream ends in exactly one terminal event
    /// with nothing after it. Used by the selftest runner's transport
    /// self-check (§4.7).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Violation`] if the stream is empty, ends
    /// on a non-terminal event, or contains a terminal event followed by
    /// more events.
    pub fn validate_stream(events: &[Event]) -> Result<(), ProtocolError> {
        match events.iter().position(Event::is_terminal) {
            None => Err(ProtocolError::Violation(
                "event stream has no terminal result event".to_string(),
            )),
            Some(idx) if idx != events.len() - 1 => Err(ProtocolError::Violation(format!(
                "terminal event at index {idx} is followed by {} more events",
                events.len() - idx - 1
            ))),
            Some(_) => Ok(()),
        }
    }
}

pub use version::{is_compatible_version, parse_version};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_roundtrips() {
        let event = Event::Message { text: "hello".into() };
        let line = JsonlCodec::encode(&event).unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains("\"kind\":\"message\""));
        let decoded = JsonlCodec::decode(line.trim()).unwrap();
        assert!(matches!(decoded, Event::Message { text } if text == "hello"));
    }

    #[test]
    fn tool_call_roundtrips() {
        let event = Event::ToolCall {
            tool: "grep".into(),
            args: serde_json::json!({"pattern": "foo"}),
        };
        let line = JsonlCodec::encode(&event).unwrap();
        let decoded = JsonlCodec::decode(line.trim()).unwrap();
        assert!(matches!(decoded, Event::ToolCall { tool, .. } if tool == "grep"));
    }

    #[test]
    fn result_event_is_terminal() {
        let event = Event::Result { success: true, output: None };
        assert!(event.is_terminal());
        assert!(!Event::Message { text: "x".into() }.is_terminal());
    }

    #[test]
    fn decode_stream_skips_blank_lines() {
        let input = "{\"kind\":\"message\",\"text\":\"a\"}\n\n{\"kind\":\"message\",\"text\":\"b\"}\n";
        let reader = std::io::BufReader::new(input.as_bytes());
        let events: Vec<_> = JsonlCodec::decode_stream(reader)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn validate_stream_requires_terminal_last() {
        let events = vec![
            Event::Message { text: "a".into() },
            Event::Result { success: true, output: None },
        ];
        assert!(JsonlCodec::validate_stream(&events).is_ok());

        let no_terminal = vec![Event::Message { text: "a".into() }];
        assert!(JsonlCodec::validate_stream(&no_terminal).is_err());

        let trailing = vec![
            Event::Result { success: true, output: None },
            Event::Message { text: "late".into() },
        ];
        assert!(JsonlCodec::validate_stream(&trailing).is_err());
    }

    #[test]
    fn usage_roundtrips() {
        let event = Event::Usage { input_tokens: 100, output_tokens: 42 };
        let line = JsonlCodec::encode(&event).unwrap();
        let decoded = JsonlCodec::decode(line.trim()).unwrap();
        match decoded {
            Event::Usage { input_tokens, output_tokens } => {
                assert_eq!(input_tokens, 100);
                assert_eq!(output_tokens, 42);
            }
            _ => panic!("wrong variant"),
        }
    }
}
