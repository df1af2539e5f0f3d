//! Structured-output fallback strategy (§4.3), selected by the Step Engine
//! from transport capability.

use crate::TransportCapabilities;

/// Maximum number of re-ask attempts under the `Microloop` strategy.
pub const MAX_MICROLOOP_RETRIES: u32 = 3;

/// How the Step Engine should obtain structured output from a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuredOutputStrategy {
    /// Transport supports structured output natively; no fallback needed.
    None,
    /// Parse fenced code blocks out of free-form text.
    BestEffort,
    /// Re-ask until parseable, capped at [`MAX_MICROLOOP_RETRIES`] retries.
    Microloop,
}

/// Select the fallback strategy for a transport's advertised capabilities.
#[must_use]
pub fn select_strategy(capabilities: TransportCapabilities) -> StructuredOutputStrategy {
    if capabilities.supports_output_format {
        StructuredOutputStrategy::None
    } else if capabilities.supports_native_tools {
        StructuredOutputStrategy::BestEffort
    } else {
        StructuredOutputStrategy::Microloop
    }
}

/// Extract the content of the first fenced code block (```` ```...``` ````)
/// in `text`, used by the `BestEffort` strategy.
#[must_use]
pub fn extract_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_open = &text[start + 3..];
    // Skip an optional language tag up to the first newline.
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_output_format_needs_no_fallback() {
        let caps = TransportCapabilities { supports_output_format: true, ..TransportCapabilities::default() };
        assert_eq!(select_strategy(caps), StructuredOutputStrategy::None);
    }

    #[test]
    fn native_tools_without_output_format_use_best_effort() {
        let caps = TransportCapabilities {
            supports_output_format: false,
            supports_native_tools: true,
            ..TransportCapabilities::default()
        };
        assert_eq!(select_strategy(caps), StructuredOutputStrategy::BestEffort);
    }

    #[test]
    fn no_capability_falls_back_to_microloop() {
        let caps = TransportCapabilities::default();
        assert_eq!(select_strategy(caps), StructuredOutputStrategy::Microloop);
    }

    #[test]
    fn extracts_fenced_block_with_language_tag() {
        let text = "here is json:\n```json\n{\"a\":1}\n```\ntrailing";
        assert_eq!(extract_fenced_block(text), Some("{\"a\":1}"));
    }

    #[test]
    fn returns_none_when_no_fence_present() {
        assert_eq!(extract_fenced_block("no fences here"), None);
    }
}
