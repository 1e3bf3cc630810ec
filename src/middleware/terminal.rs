//! Terminal middleware: the fixed leaf of every pipeline.
//!
//! Calls the provider adapter with the invocation's model, request, call
//! context and cancellation signal, and passes the result through
//! unchanged. Errors raised while constructing a stream propagate as
//! errors; failures the adapter detects mid-stream surface as `error`
//! events or as failed advances, at the adapter's discretion.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::middleware::{Middleware, Next};
use crate::stream::EventStream;
use crate::types::ChatResponse;
use async_trait::async_trait;

/// The leaf middleware performing the actual provider call.
#[derive(Default)]
pub struct TerminalMiddleware;

impl TerminalMiddleware {
    /// Create a terminal middleware.
    pub fn new() -> Self {
        TerminalMiddleware
    }
}

#[async_trait]
impl Middleware for TerminalMiddleware {
    async fn handle(&self, ctx: &mut ExecutionContext, _next: Next<'_>) -> Result<ChatResponse> {
        ctx.provider
            .send(&ctx.model, &ctx.request, &ctx.call, &ctx.cancel)
            .await
    }

    async fn handle_stream(
        &self,
        ctx: &mut ExecutionContext,
        _next: Next<'_>,
    ) -> Result<EventStream> {
        ctx.provider
            .stream(&ctx.model, &ctx.request, &ctx.call, &ctx.cancel)
            .await
    }

    fn is_terminal(&self) -> bool {
        true
    }
}
