//! Streaming event contract.
//!
//! A streaming invocation yields an ordered sequence of [`StreamEvent`]s.
//! Middlewares may observe or inject events but never reorder the
//! provider-emitted sequence, and every gracefully completed stream carries
//! exactly one terminal event (`Complete` or `Error`).

use crate::error::ErrorKind;
use crate::types::{FinishReason, ToolCall, Usage};
use serde::Serialize;
use std::pin::Pin;

/// A boxed async stream, used for streamed LLM responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures::Stream<Item = T> + Send + 'a>>;

/// The event sequence a streaming invocation produces.
pub type EventStream = BoxStream<'static, crate::error::Result<StreamEvent>>;

/// Events emitted during a streaming invocation (provider-agnostic).
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of generated text.
    Delta {
        /// The text fragment, in provider order.
        text: String,
    },

    /// A tool invocation requested by the model. Fragments arriving from
    /// the wire are assembled by the adapter and surfaced as complete
    /// calls, in provider order, ahead of the terminal event.
    ToolCall { call: ToolCall },

    /// A fragment of model reasoning, for providers that emit it.
    Reasoning { text: String },

    /// Terminal event of a graceful stream.
    Complete {
        /// Final token usage, when the provider reported it.
        usage: Option<Usage>,
        /// Why generation stopped, when the provider reported it.
        finish_reason: Option<FinishReason>,
        /// Concatenation of all reasoning fragments, when any were emitted.
        reasoning: Option<String>,
    },

    /// Terminal event of a failed stream whose tail could still be parsed.
    Error {
        /// Classification of the failure.
        kind: ErrorKind,
        /// Human-readable description.
        message: String,
    },
}

impl StreamEvent {
    /// Whether this event terminates the stream. Exactly one terminal event
    /// is present on graceful completion.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Complete { .. } | StreamEvent::Error { .. }
        )
    }

    /// Convenience constructor for a completion without metadata.
    pub fn complete() -> Self {
        StreamEvent::Complete {
            usage: None,
            finish_reason: None,
            reasoning: None,
        }
    }

    /// Convenience constructor for a text fragment.
    pub fn delta(text: impl Into<String>) -> Self {
        StreamEvent::Delta { text: text.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_flags() {
        assert!(!StreamEvent::delta("hi").is_terminal());
        assert!(!StreamEvent::Reasoning {
            text: "hmm".into()
        }
        .is_terminal());
        assert!(!StreamEvent::ToolCall {
            call: ToolCall::new("weather", "{}")
        }
        .is_terminal());
        assert!(StreamEvent::complete().is_terminal());
        assert!(StreamEvent::Error {
            kind: ErrorKind::ProviderUnavailable,
            message: "gone".into()
        }
        .is_terminal());
    }

    #[test]
    fn test_events_serialize_tagged() {
        let json = serde_json::to_value(StreamEvent::delta("Hello")).unwrap();
        assert_eq!(json["type"], "delta");
        assert_eq!(json["text"], "Hello");

        let json = serde_json::to_value(StreamEvent::Complete {
            usage: Some(Usage::new(5, 3, None)),
            finish_reason: Some(FinishReason::Stop),
            reasoning: None,
        })
        .unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["usage"]["total_tokens"], 8);
    }
}
