//! Tracing middleware.
//!
//! Starts one client-kind span per invocation, named
//! `llm.<provider>.<model>`, through the process-global OpenTelemetry
//! tracer. Request attributes (provider, model, request id, streaming flag,
//! sampling knobs when present) are attached up front; the request id also
//! travels as baggage on the context the inner layers run under. Success
//! records the finish reason and token counts with an ok status; failure
//! records the error kind and message with an error status. Streaming
//! accumulates usage across `complete` events and marks the span as failed
//! when any `error` event was observed.
//!
//! Without an installed tracer provider the spans are no-ops, so the
//! middleware is safe to keep in every pipeline.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::middleware::{Middleware, Next};
use crate::stream::{EventStream, StreamEvent};
use crate::types::{ChatResponse, Usage};
use async_trait::async_trait;
use futures::StreamExt;
use opentelemetry::baggage::BaggageExt;
use opentelemetry::trace::{FutureExt, SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue, global};

/// Instrumentation scope name for the spans this middleware starts.
pub const TRACER_NAME: &str = "llm-comms";

/// Baggage key carrying the request id.
pub const BAGGAGE_REQUEST_ID: &str = "llm.request_id";

/// Middleware wrapping every invocation in a client span.
#[derive(Default)]
pub struct TracingMiddleware;

impl TracingMiddleware {
    /// Create a tracing middleware.
    pub fn new() -> Self {
        TracingMiddleware
    }
}

/// Span name for one invocation: `llm.<provider>.<model>`.
pub(crate) fn span_name(provider: &str, model: &str) -> String {
    format!("llm.{provider}.{model}")
}

fn request_attributes(ctx: &ExecutionContext) -> Vec<KeyValue> {
    let mut attributes = vec![
        KeyValue::new("llm.provider", ctx.provider_name().to_string()),
        KeyValue::new("llm.model", ctx.model_id().to_string()),
        KeyValue::new("llm.request_id", ctx.request_id().to_string()),
        KeyValue::new("llm.streaming", ctx.streaming),
    ];
    if let Some(temperature) = ctx.request.temperature {
        attributes.push(KeyValue::new("llm.temperature", f64::from(temperature)));
    }
    if let Some(max_tokens) = ctx.request.max_output_tokens {
        attributes.push(KeyValue::new(
            "llm.max_output_tokens",
            i64::from(max_tokens),
        ));
    }
    attributes
}

/// Start the invocation span and return the context carrying it plus the
/// request-id baggage.
fn start_invocation(ctx: &ExecutionContext) -> Context {
    let tracer = global::tracer(TRACER_NAME);
    let span = tracer
        .span_builder(span_name(ctx.provider_name(), ctx.model_id()))
        .with_kind(SpanKind::Client)
        .with_attributes(request_attributes(ctx))
        .start(&tracer);

    Context::current_with_span(span).with_baggage(vec![KeyValue::new(
        BAGGAGE_REQUEST_ID,
        ctx.request_id().to_string(),
    )])
}

fn record_usage(cx: &Context, usage: &Usage) {
    let span = cx.span();
    span.set_attribute(KeyValue::new(
        "llm.tokens.prompt",
        i64::from(usage.prompt_tokens),
    ));
    span.set_attribute(KeyValue::new(
        "llm.tokens.completion",
        i64::from(usage.completion_tokens),
    ));
    span.set_attribute(KeyValue::new(
        "llm.tokens.total",
        i64::from(usage.total_tokens),
    ));
}

fn finish_ok(cx: &Context, usage: &Usage, finish_reason: Option<&str>) {
    record_usage(cx, usage);
    let span = cx.span();
    if let Some(reason) = finish_reason {
        span.set_attribute(KeyValue::new("llm.finish_reason", reason.to_string()));
    }
    span.set_status(Status::Ok);
    span.end();
}

fn finish_error(cx: &Context, error_kind: &str, message: &str) {
    let span = cx.span();
    span.set_attribute(KeyValue::new("llm.error_kind", error_kind.to_string()));
    span.set_status(Status::error(message.to_string()));
    span.end();
}

#[async_trait]
impl Middleware for TracingMiddleware {
    async fn handle(&self, ctx: &mut ExecutionContext, next: Next<'_>) -> Result<ChatResponse> {
        let cx = start_invocation(ctx);
        let result = next.run(ctx).with_context(cx.clone()).await;

        match &result {
            Ok(response) => finish_ok(
                &cx,
                &response.usage,
                response.finish_reason.map(|f| f.as_str()),
            ),
            Err(err) => finish_error(&cx, err.kind().as_str(), err.message()),
        }
        result
    }

    async fn handle_stream(
        &self,
        ctx: &mut ExecutionContext,
        next: Next<'_>,
    ) -> Result<EventStream> {
        let cx = start_invocation(ctx);

        let mut inner = match next.run_stream(ctx).with_context(cx.clone()).await {
            Ok(stream) => stream,
            Err(err) => {
                finish_error(&cx, err.kind().as_str(), err.message());
                return Err(err);
            }
        };

        let wrapped = async_stream::stream! {
            let mut usage = Usage::default();
            let mut finish_reason: Option<&'static str> = None;
            let mut failure: Option<(String, String)> = None;

            while let Some(event) = inner.next().await {
                match &event {
                    Ok(StreamEvent::Complete { usage: event_usage, finish_reason: reason, .. }) => {
                        if let Some(event_usage) = event_usage {
                            usage.accumulate(event_usage);
                        }
                        if let Some(reason) = reason {
                            finish_reason = Some(reason.as_str());
                        }
                    }
                    Ok(StreamEvent::Error { kind, message }) => {
                        failure.get_or_insert_with(|| (kind.as_str().to_string(), message.clone()));
                    }
                    Err(err) => {
                        failure.get_or_insert_with(|| {
                            (err.kind().as_str().to_string(), err.message().to_string())
                        });
                    }
                    _ => {}
                }
                yield event;
            }

            match failure {
                Some((kind, message)) => {
                    record_usage(&cx, &usage);
                    finish_error(&cx, &kind, &message);
                }
                None => finish_ok(&cx, &usage, finish_reason),
            }
        };

        Ok(Box::pin(wrapped))
    }
}
