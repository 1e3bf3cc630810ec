//! Metrics middleware.
//!
//! Records five instruments under the `LlmComms` meter:
//!
//! - `llm.requests.total`: counter, unit `requests`
//! - `llm.request.duration`: histogram, unit `ms`
//! - `llm.tokens.prompt` / `llm.tokens.completion` / `llm.tokens.total`:
//!   histograms, unit `tokens`
//!
//! Every measurement carries the provider, model, streaming flag, outcome
//! (`success` | `failure` | `warning`), and, when known, the finish
//! reason and error type. Exactly one request count and one duration sample
//! are recorded per invocation; token histograms are recorded only for
//! positive counts and only when token usage events are enabled. Streaming
//! invocations aggregate usage across `complete` events and record at
//! end-of-stream.
//!
//! The meter and its instruments are process-global by design so every
//! client in a process shares telemetry; without an installed SDK provider
//! they are no-ops.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::middleware::{Middleware, Next};
use crate::stream::{EventStream, StreamEvent};
use crate::types::{ChatResponse, Usage};
use async_trait::async_trait;
use futures::StreamExt;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use std::time::Instant;

/// Name of the shared meter.
pub const METER_NAME: &str = "LlmComms";

/// Invocation outcome recorded on every measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    Failure,
    Warning,
}

impl Outcome {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Warning => "warning",
        }
    }
}

/// Build the tag set carried by every measurement of one invocation.
pub(crate) fn measurement_attributes(
    provider: &str,
    model: &str,
    streaming: bool,
    outcome: Outcome,
    finish_reason: Option<&str>,
    error_type: Option<&str>,
) -> Vec<KeyValue> {
    let mut attributes = vec![
        KeyValue::new("provider", provider.to_string()),
        KeyValue::new("model", model.to_string()),
        KeyValue::new("streaming", streaming),
        KeyValue::new("outcome", outcome.as_str()),
    ];
    if let Some(reason) = finish_reason {
        attributes.push(KeyValue::new("finish_reason", reason.to_string()));
    }
    if let Some(error_type) = error_type {
        attributes.push(KeyValue::new("error_type", error_type.to_string()));
    }
    attributes
}

/// Middleware recording the request/duration/token instruments.
pub struct MetricsMiddleware {
    requests: Counter<u64>,
    duration: Histogram<f64>,
    prompt_tokens: Histogram<u64>,
    completion_tokens: Histogram<u64>,
    total_tokens: Histogram<u64>,
}

impl MetricsMiddleware {
    /// Create a middleware recording through the process-global meter.
    pub fn new() -> Self {
        MetricsMiddleware::with_meter(&global::meter(METER_NAME))
    }

    /// Create a middleware recording through an explicit meter. Lets tests
    /// and embedders route measurements into their own provider.
    pub fn with_meter(meter: &Meter) -> Self {
        MetricsMiddleware {
            requests: meter
                .u64_counter("llm.requests.total")
                .with_unit("requests")
                .with_description("Completed LLM invocations")
                .build(),
            duration: meter
                .f64_histogram("llm.request.duration")
                .with_unit("ms")
                .with_description("Wall-clock duration of LLM invocations")
                .build(),
            prompt_tokens: meter
                .u64_histogram("llm.tokens.prompt")
                .with_unit("tokens")
                .with_description("Prompt tokens per invocation")
                .build(),
            completion_tokens: meter
                .u64_histogram("llm.tokens.completion")
                .with_unit("tokens")
                .with_description("Completion tokens per invocation")
                .build(),
            total_tokens: meter
                .u64_histogram("llm.tokens.total")
                .with_unit("tokens")
                .with_description("Total tokens per invocation")
                .build(),
        }
    }

    /// Record the one-per-invocation measurements.
    fn record(
        &self,
        attributes: &[KeyValue],
        started: Instant,
        usage: Option<&Usage>,
        token_events_enabled: bool,
    ) {
        self.requests.add(1, attributes);
        self.duration
            .record(started.elapsed().as_secs_f64() * 1000.0, attributes);

        if !token_events_enabled {
            return;
        }
        if let Some(usage) = usage {
            if usage.prompt_tokens > 0 {
                self.prompt_tokens
                    .record(u64::from(usage.prompt_tokens), attributes);
            }
            if usage.completion_tokens > 0 {
                self.completion_tokens
                    .record(u64::from(usage.completion_tokens), attributes);
            }
            if usage.total_tokens > 0 {
                self.total_tokens
                    .record(u64::from(usage.total_tokens), attributes);
            }
        }
    }
}

impl Default for MetricsMiddleware {
    fn default() -> Self {
        MetricsMiddleware::new()
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    async fn handle(&self, ctx: &mut ExecutionContext, next: Next<'_>) -> Result<ChatResponse> {
        let started = Instant::now();
        let provider = ctx.provider_name().to_string();
        let model = ctx.model_id().to_string();
        let token_events = ctx.options.enable_token_usage_events;

        match next.run(ctx).await {
            Ok(response) => {
                let attributes = measurement_attributes(
                    &provider,
                    &model,
                    false,
                    Outcome::Success,
                    response.finish_reason.map(|f| f.as_str()),
                    None,
                );
                self.record(&attributes, started, Some(&response.usage), token_events);
                Ok(response)
            }
            Err(err) => {
                let attributes = measurement_attributes(
                    &provider,
                    &model,
                    false,
                    Outcome::Failure,
                    None,
                    Some(err.kind().as_str()),
                );
                self.record(&attributes, started, None, token_events);
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
        let provider = ctx.provider_name().to_string();
        let model = ctx.model_id().to_string();
        let token_events = ctx.options.enable_token_usage_events;

        let mut inner = match next.run_stream(ctx).await {
            Ok(stream) => stream,
            Err(err) => {
                let attributes = measurement_attributes(
                    &provider,
                    &model,
                    true,
                    Outcome::Failure,
                    None,
                    Some(err.kind().as_str()),
                );
                self.record(&attributes, started, None, token_events);
                return Err(err);
            }
        };

        let requests = self.requests.clone();
        let duration = self.duration.clone();
        let prompt_hist = self.prompt_tokens.clone();
        let completion_hist = self.completion_tokens.clone();
        let total_hist = self.total_tokens.clone();

        let wrapped = async_stream::stream! {
            let mut usage = Usage::default();
            let mut saw_usage = false;
            let mut finish_reason: Option<&'static str> = None;
            let mut error_type: Option<String> = None;
            let mut error_event_seen = false;

            while let Some(event) = inner.next().await {
                match &event {
                    Ok(StreamEvent::Complete { usage: event_usage, finish_reason: reason, .. }) => {
                        if let Some(event_usage) = event_usage {
                            usage.accumulate(event_usage);
                            saw_usage = true;
                        }
                        if let Some(reason) = reason {
                            finish_reason = Some(reason.as_str());
                        }
                    }
                    Ok(StreamEvent::Error { kind, .. }) => {
                        error_event_seen = true;
                        error_type.get_or_insert_with(|| kind.as_str().to_string());
                    }
                    Err(err) => {
                        error_type.get_or_insert_with(|| err.kind().as_str().to_string());
                    }
                    _ => {}
                }
                yield event;
            }

            let outcome = if error_type.is_some() && !error_event_seen {
                Outcome::Failure
            } else if error_event_seen {
                Outcome::Warning
            } else {
                Outcome::Success
            };
            let attributes = measurement_attributes(
                &provider,
                &model,
                true,
                outcome,
                finish_reason,
                error_type.as_deref(),
            );

            requests.add(1, &attributes);
            duration.record(started.elapsed().as_secs_f64() * 1000.0, &attributes);
            if token_events && saw_usage {
                if usage.prompt_tokens > 0 {
                    prompt_hist.record(u64::from(usage.prompt_tokens), &attributes);
                }
                if usage.completion_tokens > 0 {
                    completion_hist.record(u64::from(usage.completion_tokens), &attributes);
                }
                if usage.total_tokens > 0 {
                    total_hist.record(u64::from(usage.total_tokens), &attributes);
                }
            }
        };

        Ok(Box::pin(wrapped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_names() {
        assert_eq!(Outcome::Success.as_str(), "success");
        assert_eq!(Outcome::Failure.as_str(), "failure");
        assert_eq!(Outcome::Warning.as_str(), "warning");
    }

    #[test]
    fn test_attributes_carry_required_tags() {
        let attrs = measurement_attributes(
            "ollama",
            "llama3.2",
            true,
            Outcome::Success,
            Some("stop"),
            None,
        );
        assert!(attrs.contains(&KeyValue::new("provider", "ollama".to_string())));
        assert!(attrs.contains(&KeyValue::new("model", "llama3.2".to_string())));
        assert!(attrs.contains(&KeyValue::new("streaming", true)));
        assert!(attrs.contains(&KeyValue::new("outcome", "success")));
        assert!(attrs.contains(&KeyValue::new("finish_reason", "stop".to_string())));
        assert_eq!(attrs.len(), 5);
    }

    #[test]
    fn test_attributes_omit_absent_tags() {
        let attrs =
            measurement_attributes("openai", "gpt-test", false, Outcome::Failure, None, Some("validation"));
        assert!(attrs.contains(&KeyValue::new("error_type", "validation".to_string())));
        assert!(!attrs.iter().any(|kv| kv.key.as_str() == "finish_reason"));
    }

    #[test]
    fn test_meter_name_is_stable() {
        assert_eq!(METER_NAME, "LlmComms");
    }
}
