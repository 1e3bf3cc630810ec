//! Streaming-path tests: event ordering through the pipeline, terminal
//! guarantees, coalescing, streaming validation, and the Ollama
//! newline-delimited JSON wire format end to end.

use async_trait::async_trait;
use futures::StreamExt;
use llm_comms::{
    CallContext, ChatProvider, ChatRequest, ChatResponse, Error, ErrorKind, EventStream,
    FinishReason, LlmClient, Message, OllamaProvider, ProviderCapabilities, ProviderModel,
    ResponseFormat, Result, StreamEvent, ToolCall, ToolCollection, ToolDefinition, Transport,
    TransportRequest, TransportResponse, Usage, items,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Streaming fake provider handing out a pre-built event sequence once.
struct FakeStreamProvider {
    capabilities: ProviderCapabilities,
    events: Mutex<Option<Vec<Result<StreamEvent>>>>,
}

impl FakeStreamProvider {
    fn new(events: Vec<Result<StreamEvent>>) -> Self {
        FakeStreamProvider {
            capabilities: ProviderCapabilities {
                supports_streaming: true,
                supports_json_mode: true,
                supports_tools: true,
                supports_batch: false,
                supports_vision: false,
                supports_audio: false,
            },
            events: Mutex::new(Some(events)),
        }
    }
}

#[async_trait]
impl ChatProvider for FakeStreamProvider {
    fn name(&self) -> &str {
        "fake-stream"
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn send(
        &self,
        _model: &ProviderModel,
        _request: &ChatRequest,
        _call: &CallContext,
        _cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        Ok(ChatResponse::new(Message::assistant("unused"), Usage::default()))
    }

    async fn stream(
        &self,
        _model: &ProviderModel,
        _request: &ChatRequest,
        _call: &CallContext,
        _cancel: &CancellationToken,
    ) -> Result<EventStream> {
        let events = self
            .events
            .lock()
            .unwrap()
            .take()
            .expect("stream may only be opened once per test");
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

fn stream_client(events: Vec<Result<StreamEvent>>) -> LlmClient {
    LlmClient::builder()
        .provider(Arc::new(FakeStreamProvider::new(events)))
        .model("fake-model")
        .build()
        .unwrap()
}

async fn collect(mut stream: EventStream) -> Vec<Result<StreamEvent>> {
    let mut out = Vec::new();
    while let Some(event) = stream.next().await {
        out.push(event);
    }
    out
}

fn complete_with(usage: Option<Usage>, finish: Option<FinishReason>) -> StreamEvent {
    StreamEvent::Complete {
        usage,
        finish_reason: finish,
        reasoning: None,
    }
}

#[tokio::test]
async fn delta_order_is_preserved_through_the_whole_pipeline() {
    let client = stream_client(vec![
        Ok(StreamEvent::delta("a")),
        Ok(StreamEvent::delta("b")),
        Ok(StreamEvent::delta("c")),
        Ok(complete_with(Some(Usage::new(2, 3, None)), Some(FinishReason::Stop))),
    ]);

    let events = collect(client.stream(ChatRequest::new(vec![Message::user("hi")])).await.unwrap()).await;
    let events: Vec<StreamEvent> = events.into_iter().map(|e| e.unwrap()).collect();

    assert_eq!(
        &events[..3],
        &[
            StreamEvent::delta("a"),
            StreamEvent::delta("b"),
            StreamEvent::delta("c"),
        ]
    );
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(events.last().unwrap().is_terminal());
}

#[tokio::test]
async fn missing_terminal_is_synthesized_for_the_caller() {
    let client = stream_client(vec![
        Ok(StreamEvent::delta("partial")),
        // Misbehaving adapter: stream just ends.
    ]);

    let events = collect(client.stream(ChatRequest::new(vec![Message::user("hi")])).await.unwrap()).await;
    let events: Vec<StreamEvent> = events.into_iter().map(|e| e.unwrap()).collect();

    assert_eq!(events.len(), 2);
    assert_eq!(events[0], StreamEvent::delta("partial"));
    assert!(matches!(events[1], StreamEvent::Complete { .. }));
}

#[tokio::test]
async fn coalescing_emits_one_delta_before_the_terminal() {
    let client = LlmClient::builder()
        .provider(Arc::new(FakeStreamProvider::new(vec![
            Ok(StreamEvent::delta("Hel")),
            Ok(StreamEvent::delta("lo ")),
            Ok(StreamEvent::delta("world")),
            Ok(complete_with(Some(Usage::new(1, 3, None)), Some(FinishReason::Stop))),
        ])))
        .model("fake-model")
        .coalesce_final_stream_text(true)
        .build()
        .unwrap();

    let events = collect(client.stream(ChatRequest::new(vec![Message::user("hi")])).await.unwrap()).await;
    let events: Vec<StreamEvent> = events.into_iter().map(|e| e.unwrap()).collect();

    assert_eq!(events.len(), 2);
    assert_eq!(events[0], StreamEvent::delta("Hello world"));
    assert!(events[1].is_terminal());
}

#[tokio::test]
async fn strict_streaming_json_failure_surfaces_as_error_not_terminal() {
    let client = stream_client(vec![
        Ok(StreamEvent::delta("{not")),
        Ok(StreamEvent::delta(" json")),
        Ok(complete_with(None, Some(FinishReason::Stop))),
    ]);

    let request = ChatRequest::new(vec![Message::user("hi")])
        .with_response_format(ResponseFormat::JsonObject);
    let events = collect(client.stream(request).await.unwrap()).await;

    // Deltas pass through, then the validator fails the stream; no
    // synthetic `complete` follows an error.
    assert_eq!(events.len(), 3);
    assert!(events[0].is_ok());
    assert!(events[1].is_ok());
    let err = events[2].as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("valid JSON"));
}

#[tokio::test]
async fn lenient_streaming_json_failure_publishes_a_context_item() {
    let provider = Arc::new(FakeStreamProvider::new(vec![
        Ok(StreamEvent::delta("plain text")),
        Ok(complete_with(Some(Usage::new(2, 1, None)), Some(FinishReason::Stop))),
    ]));
    let client = LlmClient::builder()
        .provider(provider)
        .model("fake-model")
        .throw_on_invalid_json(false)
        .build()
        .unwrap();

    let request = ChatRequest::new(vec![Message::user("hi")])
        .with_response_format(ResponseFormat::JsonObject);
    let call = CallContext::new();
    let events = collect(
        client
            .stream_with(request, call.clone(), CancellationToken::new())
            .await
            .unwrap(),
    )
    .await;

    assert!(events.iter().all(|e| e.is_ok()));
    assert!(call.item_flag(items::VALIDATION_JSON_INVALID));
}

#[tokio::test]
async fn lenient_streaming_tool_mismatch_publishes_a_context_item() {
    let provider = Arc::new(FakeStreamProvider::new(vec![
        Ok(StreamEvent::ToolCall {
            call: ToolCall::new("calendar", "{}"),
        }),
        Ok(complete_with(None, Some(FinishReason::ToolCall))),
    ]));
    let client = LlmClient::builder()
        .provider(provider)
        .model("fake-model")
        .throw_on_invalid_json(false)
        .build()
        .unwrap();

    let mut tools = ToolCollection::new();
    tools
        .add(ToolDefinition::new("weather", "", serde_json::json!({})).unwrap())
        .unwrap();
    let request = ChatRequest::new(vec![Message::user("hi")]).with_tools(tools);

    let call = CallContext::new();
    let events = collect(
        client
            .stream_with(request, call.clone(), CancellationToken::new())
            .await
            .unwrap(),
    )
    .await;

    assert!(events.iter().all(|e| e.is_ok()));
    assert!(call.item_flag(items::VALIDATION_TOOL_MISMATCH));
}

#[tokio::test]
async fn in_band_error_events_pass_through_unchanged() {
    let client = stream_client(vec![
        Ok(StreamEvent::delta("some")),
        Ok(StreamEvent::Error {
            kind: ErrorKind::ProviderUnavailable,
            message: "upstream hiccup".into(),
        }),
    ]);

    let events = collect(client.stream(ChatRequest::new(vec![Message::user("hi")])).await.unwrap()).await;
    let events: Vec<StreamEvent> = events.into_iter().map(|e| e.unwrap()).collect();

    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[1],
        StreamEvent::Error {
            kind: ErrorKind::ProviderUnavailable,
            ..
        }
    ));
    // The error event is terminal; nothing is appended after it.
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

// ============================================================================
// Ollama newline-delimited JSON, end to end through the pipeline
// ============================================================================

struct FixedTransport {
    body: &'static str,
    requests: Mutex<Vec<TransportRequest>>,
}

#[async_trait]
impl Transport for FixedTransport {
    async fn send(
        &self,
        request: TransportRequest,
        _cancel: &CancellationToken,
    ) -> Result<TransportResponse> {
        self.requests.lock().unwrap().push(request);
        Ok(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: self.body.to_string(),
        })
    }
}

#[tokio::test]
async fn ollama_ndjson_stream_end_to_end() {
    let transport = Arc::new(FixedTransport {
        body: concat!(
            "{\"message\":{\"content\":\"Hello\"},\"done\":false}\n",
            "{\"message\":{\"content\":\" world\"},\"done\":false}\n",
            "{\"done\":true,\"done_reason\":\"stop\",\"prompt_eval_count\":5,\"eval_count\":3}\n",
        ),
        requests: Mutex::new(Vec::new()),
    });
    let provider = Arc::new(OllamaProvider::new(transport.clone(), "http://localhost:11434"));
    let client = LlmClient::builder()
        .provider(provider)
        .model("llama3.2")
        .build()
        .unwrap();

    let events = collect(
        client
            .stream(ChatRequest::new(vec![Message::user("Say hello")]))
            .await
            .unwrap(),
    )
    .await;
    let events: Vec<StreamEvent> = events.into_iter().map(|e| e.unwrap()).collect();

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], StreamEvent::delta("Hello"));
    assert_eq!(events[1], StreamEvent::delta(" world"));
    match &events[2] {
        StreamEvent::Complete {
            usage: Some(usage),
            finish_reason,
            ..
        } => {
            assert_eq!(*usage, Usage::new(5, 3, None));
            assert_eq!(usage.total_tokens, 8);
            assert_eq!(*finish_reason, Some(FinishReason::Stop));
        }
        other => panic!("expected usage-bearing complete, got {other:?}"),
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    // The adapter asked for a streaming response on the wire.
    let sent = transport.requests.lock().unwrap();
    let body: serde_json::Value = serde_json::from_str(&sent[0].body).unwrap();
    assert_eq!(body["stream"], true);
}

#[tokio::test]
async fn stream_construction_failure_propagates_as_error() {
    struct FailingTransport;

    #[async_trait]
    impl Transport for FailingTransport {
        async fn send(
            &self,
            _request: TransportRequest,
            _cancel: &CancellationToken,
        ) -> Result<TransportResponse> {
            Err(Error::provider_unavailable("connection refused"))
        }
    }

    let provider = Arc::new(OllamaProvider::new(Arc::new(FailingTransport), "http://localhost:11434"));
    let client = LlmClient::builder()
        .provider(provider)
        .model("llama3.2")
        .build()
        .unwrap();

    let err = match client
        .stream(ChatRequest::new(vec![Message::user("hi")]))
        .await
    {
        Ok(_) => panic!("expected stream construction to fail"),
        Err(e) => e,
    };
    assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
}
