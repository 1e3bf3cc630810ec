//! OpenAI-style chat completions adapter.
//!
//! Works with OpenAI and any endpoint that follows the same contract, and
//! handles Azure OpenAI, which uses the same wire format with a different
//! URL pattern (`/openai/deployments/{deployment}/chat/completions`), the
//! `api-key` auth header, and the request id forwarded as
//! `x-ms-client-request-id`.

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::provider::{
    ChatProvider, apply_hint_overrides, build_response, content_text, extract_tool_calls,
    raw_passthrough, sse, usage_from_counts,
};
use crate::stream::{EventStream, StreamEvent};
use crate::transport::{Transport, TransportRequest, TransportResponse};
use crate::types::{
    ChatRequest, ChatResponse, FinishReason, ProviderCapabilities, ProviderModel, ToolCall, Usage,
};
use crate::util::{parse_retry_after, status_to_error, tools_to_wire, wire_role};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

/// Adapter for OpenAI-style chat completion endpoints.
pub struct OpenAiProvider {
    name: String,
    base_url: String,
    api_key: String,
    /// `Some` switches the adapter into Azure mode; carries the api-version.
    azure_api_version: Option<String>,
    transport: Arc<dyn Transport>,
    capabilities: ProviderCapabilities,
}

impl OpenAiProvider {
    /// Create an adapter for a standard OpenAI-style endpoint.
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        OpenAiProvider {
            name: "openai".to_string(),
            base_url: trim_base_url(base_url),
            api_key: api_key.into(),
            azure_api_version: None,
            transport,
            capabilities: default_capabilities(),
        }
    }

    /// Create an adapter for an Azure OpenAI resource. The model id acts as
    /// the deployment name.
    pub fn azure(
        transport: Arc<dyn Transport>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_version: Option<String>,
    ) -> Self {
        OpenAiProvider {
            name: "azure".to_string(),
            base_url: trim_base_url(base_url),
            api_key: api_key.into(),
            azure_api_version: Some(
                api_version.unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            ),
            transport,
            capabilities: default_capabilities(),
        }
    }

    fn is_azure(&self) -> bool {
        self.azure_api_version.is_some()
    }

    fn chat_url(&self, model: &ProviderModel) -> String {
        match &self.azure_api_version {
            Some(version) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url, model.id, version
            ),
            None => format!("{}/chat/completions", self.base_url),
        }
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
            "messages": messages,
        });

        // Azure carries the deployment in the URL; standard endpoints take
        // the model in the body.
        if !self.is_azure() {
            body["model"] = Value::String(model.id.clone());
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(max_tokens) = request.max_output_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(tools) = &request.tools {
            if !tools.is_empty() {
                body["tools"] = Value::Array(tools_to_wire(tools));
            }
        }
        if request.response_format == Some(crate::types::ResponseFormat::JsonObject) {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        if stream {
            body["stream"] = Value::Bool(true);
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }

        apply_hint_overrides(&mut body, request, &self.name);
        body
    }

    fn build_transport_request(
        &self,
        model: &ProviderModel,
        request: &ChatRequest,
        call: &CallContext,
        stream: bool,
    ) -> TransportRequest {
        let body = self.build_body(model, request, stream);
        let mut transport_request = TransportRequest::post(self.chat_url(model), body.to_string())
            .header("Content-Type", "application/json");

        if self.is_azure() {
            transport_request = transport_request
                .header("api-key", &self.api_key)
                .header("x-ms-client-request-id", call.request_id());
        } else {
            transport_request =
                transport_request.header("Authorization", format!("Bearer {}", self.api_key));
        }
        transport_request
    }

    fn check_status(&self, response: &TransportResponse, call: &CallContext) -> Result<()> {
        if response.is_success() {
            return Ok(());
        }
        let retry_after = response.header("retry-after").and_then(parse_retry_after);
        let (message, provider_code) = vendor_error_details(&response.body);
        let err = status_to_error(response.status, message, call.request_id(), retry_after);
        Err(match provider_code {
            Some(code) => err.with_provider_code(code),
            None => err,
        })
    }
}

fn trim_base_url(base_url: impl Into<String>) -> String {
    base_url.into().trim_end_matches('/').to_string()
}

fn default_capabilities() -> ProviderCapabilities {
    ProviderCapabilities {
        supports_streaming: true,
        supports_json_mode: true,
        supports_tools: true,
        supports_batch: false,
        supports_vision: true,
        supports_audio: false,
    }
}

/// Pull the vendor error message and code out of an error body, falling
/// back to the raw body text.
fn vendor_error_details(body: &str) -> (String, Option<String>) {
    if let Ok(parsed) = serde_json::from_str::<Value>(body) {
        if let Some(error) = parsed.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or(body)
                .to_string();
            let code = error
                .get("code")
                .and_then(Value::as_str)
                .map(str::to_string);
            return (message, code);
        }
    }
    (body.to_string(), None)
}

fn parse_usage(value: &Value) -> Usage {
    usage_from_counts(
        value.get("prompt_tokens").and_then(Value::as_u64),
        value.get("completion_tokens").and_then(Value::as_u64),
        value.get("total_tokens").and_then(Value::as_u64),
    )
}

fn parse_chat_response(body: &Value, request_id: &str) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| {
            Error::llm("malformed response: no choices").with_request_id(request_id)
        })?;

    let message = choice.get("message").ok_or_else(|| {
        Error::llm("malformed response: choice has no message").with_request_id(request_id)
    })?;

    let content = message
        .get("content")
        .map(content_text)
        .unwrap_or_default();
    let tool_calls = extract_tool_calls(message);
    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map(FinishReason::from_wire);
    let usage = body.get("usage").map(parse_usage).unwrap_or_default();
    let raw = raw_passthrough(body, &["id", "model", "created", "system_fingerprint"]);

    Ok(build_response(content, tool_calls, usage, finish_reason, raw))
}

// ============================================================================
// Streaming chunk assembly
// ============================================================================

/// A tool call being assembled from per-index fragments.
#[derive(Default)]
struct PartialToolCall {
    name: Option<String>,
    arguments: String,
}

/// Folds the SSE chunk sequence into ordered stream events: deltas and
/// reasoning fragments as they arrive, assembled tool calls next, then
/// exactly one terminal `complete`.
fn events_from_sse_body(body: &str, request_id: &str) -> Vec<Result<StreamEvent>> {
    let mut events: Vec<Result<StreamEvent>> = Vec::new();
    let mut usage: Option<Usage> = None;
    let mut finish_reason: Option<FinishReason> = None;
    let mut reasoning = String::new();
    // Keyed by the vendor-assigned index so interleaved fragments of
    // several calls assemble independently and flush in index order.
    let mut partial_calls: BTreeMap<u64, PartialToolCall> = BTreeMap::new();

    for payload in sse::data_payloads(body) {
        if payload == "[DONE]" {
            break;
        }
        let chunk: Value = match serde_json::from_str(&payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                events.push(Err(Error::llm(format!(
                    "failed to parse stream chunk: {e}"
                ))
                .with_request_id(request_id)));
                continue;
            }
        };

        if let Some(chunk_usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            usage = Some(parse_usage(chunk_usage));
        }

        let Some(choice) = chunk
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
        else {
            continue;
        };

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            finish_reason = Some(FinishReason::from_wire(reason));
        }

        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(fragments) = delta.get("tool_calls").and_then(Value::as_array) {
            for fragment in fragments {
                let index = fragment.get("index").and_then(Value::as_u64).unwrap_or(0);
                let entry = partial_calls.entry(index).or_default();
                if let Some(function) = fragment.get("function") {
                    if let Some(name) = function.get("name").and_then(Value::as_str) {
                        entry.name = Some(name.to_string());
                    }
                    if let Some(arguments) = function.get("arguments").and_then(Value::as_str) {
                        entry.arguments.push_str(arguments);
                    }
                }
            }
        }

        if let Some(text) = delta.get("reasoning_content").and_then(Value::as_str) {
            if !text.is_empty() {
                reasoning.push_str(text);
                events.push(Ok(StreamEvent::Reasoning {
                    text: text.to_string(),
                }));
            }
        }

        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::Delta {
                    text: text.to_string(),
                }));
            }
        }
    }

    // Assembled tool calls surface ahead of the terminal, in index order.
    // Fragments that never received a name are dropped.
    for (_, partial) in partial_calls {
        if let Some(name) = partial.name {
            let arguments = if partial.arguments.is_empty() {
                "{}".to_string()
            } else {
                partial.arguments
            };
            events.push(Ok(StreamEvent::ToolCall {
                call: ToolCall::new(name, arguments),
            }));
        }
    }

    events.push(Ok(StreamEvent::Complete {
        usage,
        finish_reason,
        reasoning: if reasoning.is_empty() {
            None
        } else {
            Some(reasoning)
        },
    }));
    events
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
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
        let transport_request = self.build_transport_request(model, request, call, false);
        let response = self.transport.send(transport_request, cancel).await?;
        self.check_status(&response, call)?;

        let body: Value = serde_json::from_str(&response.body).map_err(|e| {
            Error::llm(format!("failed to parse response body: {e}"))
                .with_request_id(call.request_id())
                .with_source(e)
        })?;
        parse_chat_response(&body, call.request_id())
    }

    async fn stream(
        &self,
        model: &ProviderModel,
        request: &ChatRequest,
        call: &CallContext,
        cancel: &CancellationToken,
    ) -> Result<EventStream> {
        let transport_request = self.build_transport_request(model, request, call, true);
        let response = self.transport.send(transport_request, cancel).await?;
        self.check_status(&response, call)?;

        let events = events_from_sse_body(&response.body, call.request_id());
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn sample_model() -> ProviderModel {
        ProviderModel::new("gpt-test", Default::default())
    }

    #[test]
    fn test_body_omits_absent_sampling_fields() {
        let transport: Arc<dyn Transport> = Arc::new(NoopTransport);
        let provider = OpenAiProvider::new(transport, "https://api.test/v1", "sk-test");
        let request = ChatRequest::new(vec![Message::user("hi")]);

        let body = provider.build_body(&sample_model(), &request, false);
        assert_eq!(body["model"], "gpt-test");
        assert!(body.get("temperature").is_none());
        assert!(body.get("top_p").is_none());
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("tools").is_none());
        assert!(body.get("response_format").is_none());
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_body_carries_present_fields_exactly() {
        let transport: Arc<dyn Transport> = Arc::new(NoopTransport);
        let provider = OpenAiProvider::new(transport, "https://api.test/v1", "sk-test");
        let request = ChatRequest::new(vec![Message::user("hi")])
            .with_temperature(0.5)
            .unwrap()
            .with_max_output_tokens(777)
            .unwrap()
            .with_response_format(crate::types::ResponseFormat::JsonObject);

        let body = provider.build_body(&sample_model(), &request, true);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["max_tokens"], 777);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_azure_url_and_body_omit_model() {
        let transport: Arc<dyn Transport> = Arc::new(NoopTransport);
        let provider =
            OpenAiProvider::azure(transport, "https://res.openai.azure.com/", "key", None);
        let model = sample_model();

        assert_eq!(
            provider.chat_url(&model),
            "https://res.openai.azure.com/openai/deployments/gpt-test/chat/completions?api-version=2024-10-21"
        );
        let body = provider.build_body(&model, &ChatRequest::new(vec![]), false);
        assert!(body.get("model").is_none());
    }

    #[test]
    fn test_unary_parse_with_parts_content() {
        let body = serde_json::json!({
            "id": "chatcmpl-1",
            "model": "gpt-test",
            "created": 1700000000,
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": [{"type": "text", "text": "Hel"}, {"type": "text", "text": "lo"}],
                },
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5},
        });

        let response = parse_chat_response(&body, "req-1").unwrap();
        assert_eq!(response.message.content, "Hello");
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.usage, Usage::new(10, 5, None));
        assert_eq!(response.raw.get("id"), Some(&serde_json::json!("chatcmpl-1")));
    }

    #[test]
    fn test_sse_stream_assembles_events_in_order() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":2,\"total_tokens\":9}}\n\n",
            "data: [DONE]\n\n",
        );

        let events: Vec<StreamEvent> = events_from_sse_body(body, "req-1")
            .into_iter()
            .map(|e| e.unwrap())
            .collect();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StreamEvent::delta("Hel"));
        assert_eq!(events[1], StreamEvent::delta("lo"));
        match &events[2] {
            StreamEvent::Complete {
                usage,
                finish_reason,
                reasoning,
            } => {
                assert_eq!(*usage, Some(Usage::new(7, 2, Some(9))));
                assert_eq!(*finish_reason, Some(FinishReason::Stop));
                assert!(reasoning.is_none());
            }
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[test]
    fn test_sse_stream_assembles_interleaved_tool_calls() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\"function\":{\"name\":\"search\",\"arguments\":\"{\\\"q\\\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"id\":\"c2\",\"function\":{\"name\":\"calc\",\"arguments\":\"{}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\":\\\"rust\\\"}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: [DONE]\n\n",
        );

        let events: Vec<StreamEvent> = events_from_sse_body(body, "req-1")
            .into_iter()
            .map(|e| e.unwrap())
            .collect();

        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            StreamEvent::ToolCall {
                call: ToolCall::new("search", "{\"q\":\"rust\"}")
            }
        );
        assert_eq!(
            events[1],
            StreamEvent::ToolCall {
                call: ToolCall::new("calc", "{}")
            }
        );
        assert!(events[2].is_terminal());
    }

    #[test]
    fn test_sse_stream_synthesizes_terminal_when_missing() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n";
        let events: Vec<StreamEvent> = events_from_sse_body(body, "req-1")
            .into_iter()
            .map(|e| e.unwrap())
            .collect();

        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());
    }

    #[test]
    fn test_sse_reasoning_fragments_coalesce_into_terminal() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"think \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"hard\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"done\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let events: Vec<StreamEvent> = events_from_sse_body(body, "req-1")
            .into_iter()
            .map(|e| e.unwrap())
            .collect();

        assert_eq!(
            events[0],
            StreamEvent::Reasoning {
                text: "think ".into()
            }
        );
        match events.last().unwrap() {
            StreamEvent::Complete { reasoning, .. } => {
                assert_eq!(reasoning.as_deref(), Some("think hard"));
            }
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[test]
    fn test_vendor_error_details() {
        let (message, code) = vendor_error_details(
            "{\"error\":{\"message\":\"No key\",\"type\":\"auth\",\"code\":\"invalid_api_key\"}}",
        );
        assert_eq!(message, "No key");
        assert_eq!(code.as_deref(), Some("invalid_api_key"));

        let (message, code) = vendor_error_details("plain text failure");
        assert_eq!(message, "plain text failure");
        assert!(code.is_none());
    }

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
}
