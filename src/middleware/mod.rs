//! The middleware pipeline.
//!
//! A pipeline is an ordered list of middlewares terminating in exactly one
//! terminal. Invocation walks the list outer→inner: each non-terminal layer
//! receives the execution context plus a [`Next`] continuation and either
//! short-circuits (cache hit) or invokes the continuation at most once,
//! observing or transforming its result. The terminal ignores its
//! continuation and performs the provider call.
//!
//! Streaming invocations mirror the unary shape: each layer receives a
//! continuation yielding the inner [`EventStream`] and may wrap it, inject
//! synthetic events, or publish context items, but must preserve the
//! provider-emitted event order.

mod cache_mw;
mod log;
mod metrics;
mod redact;
mod terminal;
mod trace;
mod validate;

pub use cache_mw::CacheMiddleware;
pub use log::{
    EVENT_REQUEST_FAILURE, EVENT_REQUEST_PREVIEW, EVENT_REQUEST_START, EVENT_REQUEST_SUCCESS,
    EVENT_REQUEST_WARNING, LoggingMiddleware,
};
pub use metrics::{METER_NAME, MetricsMiddleware};
pub use redact::RedactionMiddleware;
pub use terminal::TerminalMiddleware;
pub use trace::{TRACER_NAME, TracingMiddleware};
pub use validate::{RAW_JSON_INVALID, RAW_TOOL_MISMATCH, ValidatorMiddleware};

use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::stream::EventStream;
use crate::types::ChatResponse;
use async_trait::async_trait;
use std::sync::Arc;

/// A layered interceptor in the request pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handle a unary invocation. Call `next.run(ctx)` at most once, or
    /// return without calling it to short-circuit. Errors propagate
    /// unchanged unless a layer deliberately observes and rethrows.
    async fn handle(&self, ctx: &mut ExecutionContext, next: Next<'_>) -> Result<ChatResponse>;

    /// Handle a streaming invocation. The returned stream must preserve
    /// the order of provider-emitted events.
    async fn handle_stream(
        &self,
        ctx: &mut ExecutionContext,
        next: Next<'_>,
    ) -> Result<EventStream>;

    /// Whether this middleware claims the terminal role. The pipeline
    /// builder keeps at most one terminal; a later claimant replaces any
    /// prior one.
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Continuation handed to each middleware: the remainder of the chain.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    /// Invoke the rest of the chain for a unary call.
    pub async fn run(self, ctx: &mut ExecutionContext) -> Result<ChatResponse> {
        match self.chain.split_first() {
            Some((head, tail)) => head.handle(ctx, Next { chain: tail }).await,
            None => Err(Error::llm("middleware chain exhausted without a terminal")),
        }
    }

    /// Invoke the rest of the chain for a streaming call.
    pub async fn run_stream(self, ctx: &mut ExecutionContext) -> Result<EventStream> {
        match self.chain.split_first() {
            Some((head, tail)) => head.handle_stream(ctx, Next { chain: tail }).await,
            None => Err(Error::llm("middleware chain exhausted without a terminal")),
        }
    }
}

/// An immutable, executable middleware chain. Built once per client and
/// shared across invocations; the pipeline itself holds no per-request
/// state.
pub struct Pipeline {
    chain: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    /// Start building a pipeline.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Execute a unary invocation through the chain.
    pub async fn execute(&self, ctx: &mut ExecutionContext) -> Result<ChatResponse> {
        Next { chain: &self.chain }.run(ctx).await
    }

    /// Execute a streaming invocation through the chain.
    pub async fn execute_stream(&self, ctx: &mut ExecutionContext) -> Result<EventStream> {
        Next { chain: &self.chain }.run_stream(ctx).await
    }

    /// Number of layers including the terminal.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Whether the pipeline has no layers. Never true for a built pipeline,
    /// which always carries at least its terminal.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

/// Builder collecting middlewares in registration order plus a designated
/// terminal.
#[derive(Default)]
pub struct PipelineBuilder {
    middlewares: Vec<Arc<dyn Middleware>>,
    terminal: Option<Arc<dyn Middleware>>,
}

impl PipelineBuilder {
    /// Register a middleware. A middleware claiming the terminal role
    /// replaces any previously registered terminal instead of joining the
    /// ordered list.
    pub fn add(self, middleware: impl Middleware + 'static) -> Self {
        self.add_arc(Arc::new(middleware))
    }

    /// Register an already-shared middleware.
    pub fn add_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        if middleware.is_terminal() {
            self.terminal = Some(middleware);
        } else {
            self.middlewares.push(middleware);
        }
        self
    }

    /// Designate the terminal explicitly.
    pub fn terminal(mut self, middleware: impl Middleware + 'static) -> Self {
        self.terminal = Some(Arc::new(middleware));
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    ///
    /// Fails when no terminal was registered.
    pub fn build(self) -> Result<Pipeline> {
        let terminal = self
            .terminal
            .ok_or_else(|| Error::llm("pipeline requires exactly one terminal middleware"))?;
        let mut chain = self.middlewares;
        chain.push(terminal);
        Ok(Pipeline { chain })
    }
}
