//! Provider adapter framework.
//!
//! An adapter translates the abstract [`ChatRequest`]/[`ChatResponse`] and
//! [`StreamEvent`] contracts to and from one vendor's wire format. Every
//! adapter speaks through the [`Transport`] port (never through an HTTP
//! client of its own) and obeys the shared shaping/mapping rules collected
//! in this module:
//!
//! - roles map via the canonical table (`system`/`user`/`assistant`/`tool`);
//! - optional sampling fields are only present on the wire when present on
//!   the request;
//! - tools serialize as `{type: "function", function: {...}}` entries;
//! - assistant content is accepted both as a string and as an
//!   array-of-parts;
//! - tool-call entries without a name are dropped;
//! - usage totals are computed as `prompt + completion` when the vendor
//!   omits them;
//! - vendor id / model / created timestamp / system fingerprint pass
//!   through in `raw`;
//! - a streaming adapter emits exactly one terminal event, synthesizing a
//!   `complete` when the vendor never sent one.
//!
//! [`Transport`]: crate::transport::Transport

mod ollama;
mod openai;
pub(crate) mod sse;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use crate::context::CallContext;
use crate::error::Result;
use crate::stream::EventStream;
use crate::types::{
    ChatRequest, ChatResponse, FinishReason, Message, ModelOptions, ProviderCapabilities,
    ProviderModel, ToolCall, Usage,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Trait every provider adapter must implement.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Short, lowercase, stable adapter name (`"openai"`, `"ollama"`, ...).
    fn name(&self) -> &str;

    /// The capabilities this adapter advertises.
    fn capabilities(&self) -> &ProviderCapabilities;

    /// Produce an opaque model handle for the given id.
    fn create_model(&self, id: &str, options: ModelOptions) -> ProviderModel {
        ProviderModel::new(id, options)
    }

    /// Send a request and wait for the normalized response.
    async fn send(
        &self,
        model: &ProviderModel,
        request: &ChatRequest,
        call: &CallContext,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse>;

    /// Send a request and yield ordered stream events.
    ///
    /// Adapters whose capabilities report `supports_streaming == false`
    /// must fail with a `not_supported` error without contacting the
    /// transport.
    async fn stream(
        &self,
        model: &ProviderModel,
        request: &ChatRequest,
        call: &CallContext,
        cancel: &CancellationToken,
    ) -> Result<EventStream>;
}

// ============================================================================
// Shared response-mapping helpers
// ============================================================================

/// Extract assistant text from a vendor content field, accepting both the
/// plain-string and the array-of-parts representations.
pub(crate) fn content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => {
            let mut out = String::new();
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    out.push_str(text);
                }
            }
            out
        }
        _ => String::new(),
    }
}

/// Extract ordered tool calls from a vendor `tool_calls` array. Entries
/// without a name are dropped; arguments are preserved as the raw JSON
/// string the vendor sent (object-valued arguments are re-serialized).
pub(crate) fn extract_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(entries) = message.get("tool_calls").and_then(Value::as_array) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let function = entry.get("function")?;
            let name = function.get("name")?.as_str()?;
            if name.is_empty() {
                return None;
            }
            let arguments = match function.get("arguments") {
                Some(Value::String(raw)) => raw.clone(),
                Some(value) if !value.is_null() => value.to_string(),
                _ => "{}".to_string(),
            };
            Some(ToolCall::new(name, arguments))
        })
        .collect()
}

/// Build a usage record from vendor counts, computing the total when the
/// vendor omits it.
pub(crate) fn usage_from_counts(
    prompt: Option<u64>,
    completion: Option<u64>,
    total: Option<u64>,
) -> Usage {
    Usage::new(
        prompt.unwrap_or(0) as u32,
        completion.unwrap_or(0) as u32,
        total.map(|t| t as u32),
    )
}

/// Copy the vendor passthrough fields (`id`, `model`, `created`,
/// `system_fingerprint`) out of a response body into a `raw` map.
pub(crate) fn raw_passthrough(body: &Value, keys: &[&str]) -> HashMap<String, Value> {
    let mut raw = HashMap::new();
    for key in keys {
        if let Some(value) = body.get(*key) {
            if !value.is_null() {
                raw.insert((*key).to_string(), value.clone());
            }
        }
    }
    raw
}

/// Assemble a normalized response from its mapped pieces.
pub(crate) fn build_response(
    content: String,
    tool_calls: Vec<ToolCall>,
    usage: Usage,
    finish_reason: Option<FinishReason>,
    raw: HashMap<String, Value>,
) -> ChatResponse {
    let mut response = ChatResponse::new(Message::assistant(content), usage);
    response.finish_reason = finish_reason;
    response.tool_calls = tool_calls;
    response.raw = raw;
    response
}

/// Merge `<prefix>.`-keyed provider hints into a JSON body. The key's
/// remainder is split on `.` and written as a nested path, overriding
/// whatever the adapter put there by default.
pub(crate) fn apply_hint_overrides(body: &mut Value, request: &ChatRequest, prefix: &str) {
    let Some(hints) = request.provider_hints.as_ref() else {
        return;
    };
    let scope = format!("{prefix}.");
    for (key, value) in hints {
        if let Some(path) = key.strip_prefix(&scope) {
            set_nested(body, path, value.clone());
        }
    }
}

fn set_nested(body: &mut Value, path: &str, value: Value) {
    let mut current = body;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segment.is_empty() {
            return;
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_text_accepts_string_and_parts() {
        assert_eq!(content_text(&json!("Hello")), "Hello");
        assert_eq!(
            content_text(&json!([
                {"type": "text", "text": "Hel"},
                {"type": "text", "text": "lo"},
                {"type": "image_url", "image_url": {"url": "ignored"}},
            ])),
            "Hello"
        );
        assert_eq!(content_text(&Value::Null), "");
    }

    #[test]
    fn test_extract_tool_calls_drops_nameless_entries() {
        let message = json!({
            "tool_calls": [
                {"id": "call_1", "function": {"name": "weather", "arguments": "{\"city\":\"Paris\"}"}},
                {"id": "call_2", "function": {"arguments": "{}"}},
                {"id": "call_3", "function": {"name": "", "arguments": "{}"}},
                {"id": "call_4", "function": {"name": "calendar", "arguments": {"day": 1}}},
            ]
        });
        let calls = extract_tool_calls(&message);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "weather");
        assert_eq!(calls[0].arguments_json, "{\"city\":\"Paris\"}");
        assert_eq!(calls[1].name, "calendar");
        assert_eq!(calls[1].arguments_json, "{\"day\":1}");
    }

    #[test]
    fn test_usage_total_fallback() {
        let usage = usage_from_counts(Some(10), Some(5), None);
        assert_eq!(usage.total_tokens, 15);
        let usage = usage_from_counts(Some(10), Some(5), Some(16));
        assert_eq!(usage.total_tokens, 16);
        let usage = usage_from_counts(None, None, None);
        assert_eq!(usage, Usage::default());
    }

    #[test]
    fn test_raw_passthrough_skips_absent_and_null() {
        let body = json!({
            "id": "chatcmpl-1",
            "model": "gpt-test",
            "created": 1700000000,
            "system_fingerprint": null,
        });
        let raw = raw_passthrough(&body, &["id", "model", "created", "system_fingerprint"]);
        assert_eq!(raw.get("id"), Some(&json!("chatcmpl-1")));
        assert_eq!(raw.get("created"), Some(&json!(1700000000)));
        assert!(!raw.contains_key("system_fingerprint"));
    }

    #[test]
    fn test_hint_overrides_write_nested_paths() {
        let request = crate::types::ChatRequest::new(vec![])
            .with_hint("ollama.options.temperature", 0.1)
            .with_hint("ollama.keep_alive", "10m")
            .with_hint("no_cache", true);

        let mut body = json!({"model": "m", "options": {"temperature": 0.7}});
        apply_hint_overrides(&mut body, &request, "ollama");

        assert_eq!(body["options"]["temperature"], json!(0.1));
        assert_eq!(body["keep_alive"], json!("10m"));
        // Unscoped hints are not merged by the override pass.
        assert!(body.get("no_cache").is_none());
    }
}
