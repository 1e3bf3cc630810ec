//! The client surface.
//!
//! [`LlmClient`] owns one provider, one model handle, and one middleware
//! pipeline built at construction time. Client options are snapshotted at
//! build, so mutating a builder afterwards never affects built clients.
//!
//! Each call seeds a fresh [`CallContext`] (new request id, empty item
//! bag), applies the default output-token budget when the request omits
//! one, and runs the chain. Streaming is rejected with `not_supported`
//! before any per-call state exists when the provider does not advertise
//! it.

use crate::cache::{InMemoryResponseCache, ResponseCache};
use crate::context::{CallContext, ExecutionContext};
use crate::error::{Error, Result};
use crate::middleware::{
    CacheMiddleware, LoggingMiddleware, MetricsMiddleware, Middleware, Pipeline,
    RedactionMiddleware, TerminalMiddleware, TracingMiddleware, ValidatorMiddleware,
};
use crate::provider::ChatProvider;
use crate::stream::{EventStream, StreamEvent};
use crate::types::{ChatRequest, ChatResponse, ClientOptions, ModelOptions, ProviderModel};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A built client: provider + model + pipeline + options snapshot.
pub struct LlmClient {
    provider: Arc<dyn ChatProvider>,
    model: ProviderModel,
    pipeline: Arc<Pipeline>,
    options: ClientOptions,
}

impl LlmClient {
    /// Start building a client.
    pub fn builder() -> LlmClientBuilder {
        LlmClientBuilder::default()
    }

    /// The options snapshot this client runs with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// The model handle this client calls.
    pub fn model(&self) -> &ProviderModel {
        &self.model
    }

    /// Send a unary request.
    pub async fn send(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.send_with(request, CallContext::new(), CancellationToken::new())
            .await
    }

    /// Send a unary request with a caller-supplied call context and
    /// cancellation token. The context's item bag stays readable after the
    /// call, which is how embedders observe `llm.cache.*` and friends.
    pub async fn send_with(
        &self,
        request: ChatRequest,
        call: CallContext,
        cancel: CancellationToken,
    ) -> Result<ChatResponse> {
        let mut ctx = self.execution_context(request, call, cancel, false);
        self.pipeline.execute(&mut ctx).await
    }

    /// Open a streaming invocation.
    pub async fn stream(&self, request: ChatRequest) -> Result<EventStream> {
        self.stream_with(request, CallContext::new(), CancellationToken::new())
            .await
    }

    /// Open a streaming invocation with a caller-supplied call context and
    /// cancellation token.
    pub async fn stream_with(
        &self,
        request: ChatRequest,
        call: CallContext,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        // Capability gate runs before any per-call state is built.
        if !self.provider.capabilities().supports_streaming {
            return Err(Error::not_supported(format!(
                "provider '{}' does not support streaming",
                self.provider.name()
            )));
        }

        let mut ctx = self.execution_context(request, call, cancel, true);
        let inner = self.pipeline.execute_stream(&mut ctx).await?;
        Ok(finalize_stream(
            inner,
            self.options.coalesce_final_stream_text,
        ))
    }

    fn execution_context(
        &self,
        mut request: ChatRequest,
        call: CallContext,
        cancel: CancellationToken,
        streaming: bool,
    ) -> ExecutionContext {
        if request.max_output_tokens.is_none() {
            request.max_output_tokens = Some(self.options.default_max_output_tokens);
        }
        ExecutionContext {
            provider: self.provider.clone(),
            model: self.model.clone(),
            request,
            call,
            options: self.options.clone(),
            cancel,
            streaming,
        }
    }
}

/// Client-side stream wrapper: optionally coalesces delta text into one
/// final fragment, and guarantees the caller sees a terminal event even if
/// an adapter misbehaved and ended without one.
fn finalize_stream(mut inner: EventStream, coalesce: bool) -> EventStream {
    Box::pin(async_stream::stream! {
        let mut text = String::new();
        let mut terminal_seen = false;
        let mut error_seen = false;

        while let Some(event) = inner.next().await {
            match event {
                Ok(StreamEvent::Delta { text: fragment }) if coalesce => {
                    text.push_str(&fragment);
                }
                Ok(event) => {
                    if event.is_terminal() {
                        terminal_seen = true;
                        if coalesce && !text.is_empty() {
                            yield Ok(StreamEvent::Delta { text: std::mem::take(&mut text) });
                        }
                    }
                    yield Ok(event);
                }
                Err(err) => {
                    error_seen = true;
                    yield Err(err);
                }
            }
        }

        // A graceful stream always ends in a terminal event; a failed or
        // cancelled one never gains a synthetic `complete`.
        if !terminal_seen && !error_seen {
            if coalesce && !text.is_empty() {
                yield Ok(StreamEvent::Delta { text: std::mem::take(&mut text) });
            }
            yield Ok(StreamEvent::complete());
        }
    })
}

/// Builder for [`LlmClient`] with the default middleware order:
/// Tracing → Redaction → Logging → Metrics → custom middlewares in
/// registration order → Cache → Validator → Terminal.
#[derive(Default)]
pub struct LlmClientBuilder {
    provider: Option<Arc<dyn ChatProvider>>,
    model_id: Option<String>,
    model_options: ModelOptions,
    options: ClientOptions,
    cache: Option<Arc<dyn ResponseCache>>,
    cache_ttl: Option<Duration>,
    custom: Vec<Arc<dyn Middleware>>,
}

impl LlmClientBuilder {
    /// Set the provider adapter (required).
    pub fn provider(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the model id (required).
    pub fn model(mut self, id: impl Into<String>) -> Self {
        self.model_id = Some(id.into());
        self
    }

    /// Set the options handed to the provider's model factory.
    pub fn model_options(mut self, options: ModelOptions) -> Self {
        self.model_options = options;
        self
    }

    /// Replace the whole options block.
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Strict (fail) vs. lenient (annotate) validation behavior.
    pub fn throw_on_invalid_json(mut self, strict: bool) -> Self {
        self.options.throw_on_invalid_json = strict;
        self
    }

    /// Enable or disable publication of masked message copies.
    pub fn enable_redaction(mut self, enabled: bool) -> Self {
        self.options.enable_redaction = enabled;
        self
    }

    /// Enable or disable token histograms.
    pub fn enable_token_usage_events(mut self, enabled: bool) -> Self {
        self.options.enable_token_usage_events = enabled;
        self
    }

    /// Coalesce stream text into one delta before the terminal event.
    pub fn coalesce_final_stream_text(mut self, enabled: bool) -> Self {
        self.options.coalesce_final_stream_text = enabled;
        self
    }

    /// Output-token budget applied when a request omits one.
    pub fn default_max_output_tokens(mut self, tokens: u32) -> Self {
        self.options.default_max_output_tokens = tokens;
        self
    }

    /// Use a specific response cache store (defaults to a fresh in-memory
    /// cache per client).
    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Default TTL for cached responses when no hint supplies one.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Register a custom middleware. Custom middlewares sit between the
    /// metrics and cache layers, in registration order.
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.custom.push(Arc::new(middleware));
        self
    }

    /// Build the client, constructing the pipeline once.
    ///
    /// # Errors
    ///
    /// Fails when the provider or model is missing.
    pub fn build(self) -> Result<LlmClient> {
        let provider = self
            .provider
            .ok_or_else(|| Error::validation("provider is required"))?;
        let model_id = self
            .model_id
            .ok_or_else(|| Error::validation("model is required"))?;
        let model = provider.create_model(&model_id, self.model_options);

        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryResponseCache::new()));
        let mut cache_middleware = CacheMiddleware::new(cache);
        if let Some(ttl) = self.cache_ttl {
            cache_middleware = cache_middleware.with_default_ttl(ttl);
        }

        let mut pipeline = Pipeline::builder()
            .add(TracingMiddleware::new())
            .add(RedactionMiddleware::new())
            .add(LoggingMiddleware::new())
            .add(MetricsMiddleware::new());
        for middleware in self.custom {
            pipeline = pipeline.add_arc(middleware);
        }
        // The cache wraps the validator: a strict validation failure then
        // propagates past the cache without a store, and lenient
        // annotations are part of what gets cached.
        let pipeline = pipeline
            .add(cache_middleware)
            .add(ValidatorMiddleware::new())
            .terminal(TerminalMiddleware::new())
            .build()?;

        Ok(LlmClient {
            provider,
            model,
            pipeline: Arc::new(pipeline),
            options: self.options,
        })
    }
}
