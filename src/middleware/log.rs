//! Logging middleware.
//!
//! Emits structured `tracing` events around every invocation. Event ids are
//! stable integers chosen once per event kind so downstream consumers can
//! filter without string-matching:
//!
//! | id   | event             |
//! |------|-------------------|
//! | 1000 | `request.start`   |
//! | 1001 | `request.preview` |
//! | 1002 | `request.success` |
//! | 1003 | `request.failure` |
//! | 1004 | `request.warning` |
//!
//! Message content never reaches the log: the only content-adjacent field
//! is the masked preview the redaction middleware published.

use crate::context::{ExecutionContext, items};
use crate::error::Result;
use crate::middleware::{Middleware, Next};
use crate::stream::{EventStream, StreamEvent};
use crate::types::{ChatResponse, Usage};
use crate::util::request_hash;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Instant;

/// Stable event id for `request.start`.
pub const EVENT_REQUEST_START: u32 = 1000;
/// Stable event id for `request.preview`.
pub const EVENT_REQUEST_PREVIEW: u32 = 1001;
/// Stable event id for `request.success`.
pub const EVENT_REQUEST_SUCCESS: u32 = 1002;
/// Stable event id for `request.failure`.
pub const EVENT_REQUEST_FAILURE: u32 = 1003;
/// Stable event id for `request.warning`.
pub const EVENT_REQUEST_WARNING: u32 = 1004;

/// Middleware emitting the `request.*` log events.
#[derive(Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    /// Create a logging middleware.
    pub fn new() -> Self {
        LoggingMiddleware
    }

    fn log_start(&self, ctx: &ExecutionContext) {
        tracing::info!(
            event_id = EVENT_REQUEST_START,
            request_id = %ctx.request_id(),
            provider = %ctx.provider_name(),
            model = %ctx.model_id(),
            streaming = ctx.streaming,
            message_count = ctx.request.messages.len(),
            request_hash = %request_hash(&ctx.request),
            "request.start"
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            if let Some(preview) = ctx
                .call
                .item(items::REDACTED_PREVIEW)
                .and_then(|v| v.as_str().map(String::from))
            {
                tracing::debug!(
                    event_id = EVENT_REQUEST_PREVIEW,
                    request_id = %ctx.request_id(),
                    preview = %preview,
                    "request.preview"
                );
            }
        }
    }
}

fn log_success(request_id: &str, started: Instant, usage: &Usage, finish_reason: Option<&str>) {
    tracing::info!(
        event_id = EVENT_REQUEST_SUCCESS,
        request_id = %request_id,
        duration_ms = started.elapsed().as_millis() as u64,
        finish_reason = finish_reason.unwrap_or("unknown"),
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        "request.success"
    );
}

fn log_failure(request_id: &str, started: Instant, error_kind: &str) {
    tracing::warn!(
        event_id = EVENT_REQUEST_FAILURE,
        request_id = %request_id,
        duration_ms = started.elapsed().as_millis() as u64,
        error_kind = %error_kind,
        "request.failure"
    );
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(&self, ctx: &mut ExecutionContext, next: Next<'_>) -> Result<ChatResponse> {
        let started = Instant::now();
        self.log_start(ctx);
        let request_id = ctx.request_id().to_string();

        match next.run(ctx).await {
            Ok(response) => {
                log_success(
                    &request_id,
                    started,
                    &response.usage,
                    response.finish_reason.map(|f| f.as_str()),
                );
                Ok(response)
            }
            Err(err) => {
                log_failure(&request_id, started, err.kind().as_str());
                Err(err)
            }
        }
    }

    async fn handle_stream(
        &self,
        ctx: &mut ExecutionContext,
        next: Next<'_>,
    ) -> Result<EventStream> {
        let started = Instant::now();
        self.log_start(ctx);
        let request_id = ctx.request_id().to_string();

        let mut inner = match next.run_stream(ctx).await {
            Ok(stream) => stream,
            Err(err) => {
                log_failure(&request_id, started, err.kind().as_str());
                return Err(err);
            }
        };

        let wrapped = async_stream::stream! {
            let mut usage = Usage::default();
            let mut finish_reason: Option<&'static str> = None;
            let mut failed = false;
            let mut error_event_seen = false;
            let mut terminal_seen = false;

            while let Some(event) = inner.next().await {
                match &event {
                    Ok(StreamEvent::Complete { usage: event_usage, finish_reason: reason, .. }) => {
                        terminal_seen = true;
                        if let Some(event_usage) = event_usage {
                            usage.accumulate(event_usage);
                        }
                        if let Some(reason) = reason {
                            finish_reason = Some(reason.as_str());
                        }
                    }
                    Ok(StreamEvent::Error { .. }) => {
                        terminal_seen = true;
                        error_event_seen = true;
                    }
                    Err(err) => {
                        if !failed {
                            failed = true;
                            log_failure(&request_id, started, err.kind().as_str());
                        }
                    }
                    _ => {}
                }
                yield event;
            }

            if !failed {
                if error_event_seen {
                    tracing::warn!(
                        event_id = EVENT_REQUEST_WARNING,
                        request_id = %request_id,
                        duration_ms = started.elapsed().as_millis() as u64,
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        total_tokens = usage.total_tokens,
                        "request.warning"
                    );
                } else {
                    tracing::info!(
                        event_id = EVENT_REQUEST_SUCCESS,
                        request_id = %request_id,
                        duration_ms = started.elapsed().as_millis() as u64,
                        finish_reason = finish_reason.unwrap_or("unknown"),
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        total_tokens = usage.total_tokens,
                        terminal_seen = terminal_seen,
                        "request.success"
                    );
                }
            }
        };

        Ok(Box::pin(wrapped))
    }
}
