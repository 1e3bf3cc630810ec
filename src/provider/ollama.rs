//! Ollama chat adapter.
//!
//! Speaks the local Ollama server's `/api/chat` contract: sampling knobs
//! nest under an `options` map, JSON mode is `format: "json"`, and
//! streaming is newline-delimited JSON objects terminated by one with
//! `done: true` carrying `done_reason` and the eval counts.

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::provider::{
    ChatProvider, apply_hint_overrides, build_response, content_text, extract_tool_calls,
    raw_passthrough, usage_from_counts,
};
use crate::stream::{EventStream, StreamEvent};
use crate::transport::{Transport, TransportRequest, TransportResponse};
use crate::types::{
    ChatRequest, ChatResponse, FinishReason, ProviderCapabilities, ProviderModel, Usage,
};
use crate::util::{parse_retry_after, status_to_error, tools_to_wire, wire_role};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Adapter for a local Ollama server.
pub struct OllamaProvider {
    base_url: String,
    transport: Arc<dyn Transport>,
    capabilities: ProviderCapabilities,
}

impl OllamaProvider {
    /// Create an adapter against an Ollama base URL
    /// (e.g. `http://localhost:11434`).
    pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>) -> Self {
        OllamaProvider {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transport,
            capabilities: ProviderCapabilities {
                supports_streaming: true,
                supports_json_mode: true,
                supports_tools: true,
                supports_batch: false,
                supports_vision: false,
                supports_audio: false,
            },
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn build_body(&self, model: &ProviderModel, request: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": wire_role(m.role),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": model.id,
            "messages": messages,
            "stream": stream,
        });

        let mut options = serde_json::Map::new();
        if let Some(temperature) = request.temperature {
            options.insert("temperature".to_string(), serde_json::json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            options.insert("top_p".to_string(), serde_json::json!(top_p));
        }
        if let Some(max_tokens) = request.max_output_tokens {
            options.insert("num_predict".to_string(), serde_json::json!(max_tokens));
        }
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }

        if let Some(tools) = &request.tools {
            if !tools.is_empty() {
                body["tools"] = Value::Array(tools_to_wire(tools));
            }
        }
        if request.response_format == Some(crate::types::ResponseFormat::JsonObject) {
            body["format"] = Value::String("json".to_string());
        }

        apply_hint_overrides(&mut body, request, "ollama");
        body
    }

    fn build_transport_request(
        &self,
        model: &ProviderModel,
        request: &ChatRequest,
        stream: bool,
    ) -> TransportRequest {
        let body = self.build_body(model, request, stream);
        TransportRequest::post(self.chat_url(), body.to_string())
            .header("Content-Type", "application/json")
    }

    fn check_status(&self, response: &TransportResponse, call: &CallContext) -> Result<()> {
        if response.is_success() {
            return Ok(());
        }
        let retry_after = response.header("retry-after").and_then(parse_retry_after);
        Err(status_to_error(
            response.status,
            response.body.clone(),
            call.request_id(),
            retry_after,
        ))
    }
}

fn parse_usage(body: &Value) -> Usage {
    usage_from_counts(
        body.get("prompt_eval_count").and_then(Value::as_u64),
        body.get("eval_count").and_then(Value::as_u64),
        None,
    )
}

fn parse_chat_response(body: &Value) -> ChatResponse {
    let message = body.get("message").cloned().unwrap_or(Value::Null);
    let content = message
        .get("content")
        .map(content_text)
        .unwrap_or_default();
    let tool_calls = extract_tool_calls(&message);
    let finish_reason = body
        .get("done_reason")
        .and_then(Value::as_str)
        .map(FinishReason::from_wire);
    let usage = parse_usage(body);
    let raw = raw_passthrough(body, &["model", "created_at"]);

    build_response(content, tool_calls, usage, finish_reason, raw)
}

/// Fold the newline-delimited JSON lines into ordered stream events with
/// exactly one terminal `complete`.
fn events_from_ndjson_body(body: &str, request_id: &str) -> Vec<Result<StreamEvent>> {
    let mut events: Vec<Result<StreamEvent>> = Vec::new();
    let mut usage: Option<Usage> = None;
    let mut finish_reason: Option<FinishReason> = None;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let chunk: Value = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                events.push(Err(Error::llm(format!(
                    "failed to parse stream line: {e}"
                ))
                .with_request_id(request_id)));
                continue;
            }
        };

        if let Some(message) = chunk.get("message") {
            if let Some(text) = message.get("content").and_then(Value::as_str) {
                if !text.is_empty() {
                    events.push(Ok(StreamEvent::Delta {
                        text: text.to_string(),
                    }));
                }
            }
            // Ollama sends tool calls fully assembled.
            for call in extract_tool_calls(message) {
                events.push(Ok(StreamEvent::ToolCall { call }));
            }
        }

        if chunk.get("done").and_then(Value::as_bool) == Some(true) {
            finish_reason = chunk
                .get("done_reason")
                .and_then(Value::as_str)
                .map(FinishReason::from_wire);
            let parsed = parse_usage(&chunk);
            if parsed != Usage::default() {
                usage = Some(parsed);
            }
        }
    }

    events.push(Ok(StreamEvent::Complete {
        usage,
        finish_reason,
        reasoning: None,
    }));
    events
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn send(
        &self,
        model: &ProviderModel,
        request: &ChatRequest,
        call: &CallContext,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let transport_request = self.build_transport_request(model, request, false);
        let response = self.transport.send(transport_request, cancel).await?;
        self.check_status(&response, call)?;

        let body: Value = serde_json::from_str(&response.body).map_err(|e| {
            Error::llm(format!("failed to parse response body: {e}"))
                .with_request_id(call.request_id())
                .with_source(e)
        })?;
        Ok(parse_chat_response(&body))
    }

    async fn stream(
        &self,
        model: &ProviderModel,
        request: &ChatRequest,
        call: &CallContext,
        cancel: &CancellationToken,
    ) -> Result<EventStream> {
        let transport_request = self.build_transport_request(model, request, true);
        let response = self.transport.send(transport_request, cancel).await?;
        self.check_status(&response, call)?;

        let events = events_from_ndjson_body(&response.body, call.request_id());
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    struct NoopTransport;

    #[async_trait]
    impl Transport for NoopTransport {
        async fn send(
            &self,
            _request: TransportRequest,
            _cancel: &CancellationToken,
        ) -> Result<TransportResponse> {
            Err(Error::provider_unavailable("noop transport"))
        }
    }

    fn provider() -> OllamaProvider {
        OllamaProvider::new(Arc::new(NoopTransport), "http://localhost:11434/")
    }

    fn model() -> ProviderModel {
        ProviderModel::new("llama3.2", Default::default())
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        assert_eq!(provider().chat_url(), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_body_nests_sampling_under_options() {
        let request = ChatRequest::new(vec![Message::user("hi")])
            .with_temperature(0.2)
            .unwrap()
            .with_max_output_tokens(128)
            .unwrap()
            .with_response_format(crate::types::ResponseFormat::JsonObject);

        let body = provider().build_body(&model(), &request, false);
        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["temperature"], 0.2);
        assert_eq!(body["options"]["num_predict"], 128);
        assert_eq!(body["format"], "json");
    }

    #[test]
    fn test_hint_overrides_beat_request_fields() {
        let request = ChatRequest::new(vec![Message::user("hi")])
            .with_temperature(0.7)
            .unwrap()
            .with_hint("ollama.options.temperature", 0.1)
            .with_hint("ollama.keep_alive", "5m");

        let body = provider().build_body(&model(), &request, false);
        assert_eq!(body["options"]["temperature"], 0.1);
        assert_eq!(body["keep_alive"], "5m");
    }

    #[test]
    fn test_unary_parse_computes_total() {
        let body = serde_json::json!({
            "model": "llama3.2",
            "created_at": "2024-05-01T12:00:00Z",
            "message": {"role": "assistant", "content": "Hi there"},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 11,
            "eval_count": 4,
        });

        let response = parse_chat_response(&body);
        assert_eq!(response.message.content, "Hi there");
        assert_eq!(response.usage, Usage::new(11, 4, None));
        assert_eq!(response.usage.total_tokens, 15);
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert_eq!(
            response.raw.get("model"),
            Some(&serde_json::json!("llama3.2"))
        );
    }

    #[test]
    fn test_ndjson_stream_events_in_order() {
        let body = concat!(
            "{\"message\":{\"content\":\"Hello\"},\"done\":false}\n",
            "{\"message\":{\"content\":\" world\"},\"done\":false}\n",
            "{\"done\":true,\"done_reason\":\"stop\",\"prompt_eval_count\":5,\"eval_count\":3}\n",
        );

        let events: Vec<StreamEvent> = events_from_ndjson_body(body, "req-1")
            .into_iter()
            .map(|e| e.unwrap())
            .collect();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StreamEvent::delta("Hello"));
        assert_eq!(events[1], StreamEvent::delta(" world"));
        match &events[2] {
            StreamEvent::Complete {
                usage,
                finish_reason,
                ..
            } => {
                assert_eq!(*usage, Some(Usage::new(5, 3, None)));
                assert_eq!(usage.unwrap().total_tokens, 8);
                assert_eq!(*finish_reason, Some(FinishReason::Stop));
            }
            other => panic!("expected complete, got {other:?}"),
        }
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[test]
    fn test_ndjson_stream_synthesizes_terminal_when_done_missing() {
        let body = "{\"message\":{\"content\":\"partial\"},\"done\":false}\n";
        let events: Vec<StreamEvent> = events_from_ndjson_body(body, "req-1")
            .into_iter()
            .map(|e| e.unwrap())
            .collect();

        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());
    }
}
