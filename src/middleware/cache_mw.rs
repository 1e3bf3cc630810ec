//! Cache middleware.
//!
//! Short-circuits unary invocations whose normalized request was answered
//! before; the streaming path passes through untouched. Keys are
//! `<provider>:<model>:<request-hash>`, so hint-only differences between
//! requests share an entry.
//!
//! A `no_cache` hint (boolean, the string `"true"`, or a non-zero integer)
//! bypasses the middleware entirely; bypassed invocations publish no
//! `llm.cache.*` items. TTL resolution order: `cache_ttl_seconds` hint,
//! `cache_ttl` hint, the construction-time default (5 minutes). Responses
//! carrying tool calls are never stored; their effects are side-effecting
//! by contract.

use crate::cache::ResponseCache;
use crate::context::{ExecutionContext, items};
use crate::error::Result;
use crate::middleware::{Middleware, Next};
use crate::stream::EventStream;
use crate::types::{ChatRequest, ChatResponse};
use crate::util::request_hash;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Middleware answering unary invocations from a [`ResponseCache`].
pub struct CacheMiddleware {
    cache: Arc<dyn ResponseCache>,
    default_ttl: Duration,
}

impl CacheMiddleware {
    /// Create a cache middleware with the 5-minute default TTL.
    pub fn new(cache: Arc<dyn ResponseCache>) -> Self {
        CacheMiddleware {
            cache,
            default_ttl: DEFAULT_TTL,
        }
    }

    /// Override the default TTL used when no hint supplies one.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// The cache key for an invocation: `<provider>:<model>:<hash>`.
    pub fn cache_key(provider: &str, model: &str, request: &ChatRequest) -> String {
        format!("{provider}:{model}:{}", request_hash(request))
    }

    fn resolve_ttl(&self, request: &ChatRequest) -> Duration {
        for key in ["cache_ttl_seconds", "cache_ttl"] {
            if let Some(seconds) = request.hint(key).and_then(Value::as_f64) {
                if seconds > 0.0 {
                    return Duration::from_secs_f64(seconds);
                }
            }
        }
        self.default_ttl
    }
}

/// Whether the request's hints ask to bypass the cache. Accepts a boolean,
/// the string `"true"`, or a non-zero integer.
fn no_cache_requested(request: &ChatRequest) -> bool {
    match request.hint("no_cache") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => text.eq_ignore_ascii_case("true"),
        Some(Value::Number(number)) => number.as_i64().is_some_and(|n| n != 0)
            || number.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

#[async_trait]
impl Middleware for CacheMiddleware {
    async fn handle(&self, ctx: &mut ExecutionContext, next: Next<'_>) -> Result<ChatResponse> {
        if no_cache_requested(&ctx.request) {
            return next.run(ctx).await;
        }

        let key = CacheMiddleware::cache_key(ctx.provider_name(), ctx.model_id(), &ctx.request);

        if let Some(hit) = self.cache.get(&key).await? {
            ctx.call.set_item(items::CACHE_HIT, true);
            return Ok(hit);
        }

        let response = next.run(ctx).await?;

        let ttl = self.resolve_ttl(&ctx.request);
        if response.tool_calls.is_empty() && !ttl.is_zero() {
            self.cache.set(&key, &response, ttl).await?;
            ctx.call.set_item(items::CACHE_STORED, true);
        }
        Ok(response)
    }

    async fn handle_stream(
        &self,
        ctx: &mut ExecutionContext,
        next: Next<'_>,
    ) -> Result<EventStream> {
        // Only unary responses are cached.
        next.run_stream(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryResponseCache;
    use crate::types::Message;

    fn request() -> ChatRequest {
        ChatRequest::new(vec![Message::user("hello")])
    }

    #[test]
    fn test_no_cache_hint_forms() {
        assert!(no_cache_requested(&request().with_hint("no_cache", true)));
        assert!(no_cache_requested(&request().with_hint("no_cache", "true")));
        assert!(no_cache_requested(&request().with_hint("no_cache", "TRUE")));
        assert!(no_cache_requested(&request().with_hint("no_cache", 1)));
        assert!(no_cache_requested(&request().with_hint("no_cache", -3)));

        assert!(!no_cache_requested(&request()));
        assert!(!no_cache_requested(&request().with_hint("no_cache", false)));
        assert!(!no_cache_requested(&request().with_hint("no_cache", "false")));
        assert!(!no_cache_requested(&request().with_hint("no_cache", 0)));
    }

    #[test]
    fn test_ttl_precedence() {
        let middleware = CacheMiddleware::new(Arc::new(InMemoryResponseCache::new()))
            .with_default_ttl(Duration::from_secs(60));

        let both = request()
            .with_hint("cache_ttl_seconds", 10)
            .with_hint("cache_ttl", 20);
        assert_eq!(middleware.resolve_ttl(&both), Duration::from_secs(10));

        let fallback = request().with_hint("cache_ttl", 20);
        assert_eq!(middleware.resolve_ttl(&fallback), Duration::from_secs(20));

        assert_eq!(middleware.resolve_ttl(&request()), Duration::from_secs(60));
    }

    #[test]
    fn test_non_positive_ttl_hints_fall_through() {
        let middleware = CacheMiddleware::new(Arc::new(InMemoryResponseCache::new()));
        let zero = request().with_hint("cache_ttl_seconds", 0);
        assert_eq!(middleware.resolve_ttl(&zero), DEFAULT_TTL);
        let negative = request().with_hint("cache_ttl_seconds", -5);
        assert_eq!(middleware.resolve_ttl(&negative), DEFAULT_TTL);
    }

    #[test]
    fn test_cache_key_shape() {
        let req = request();
        let key = CacheMiddleware::cache_key("ollama", "llama3.2", &req);
        let hash = request_hash(&req);
        assert_eq!(key, format!("ollama:llama3.2:{hash}"));
    }

    #[test]
    fn test_cache_key_ignores_hints() {
        let plain = request();
        let hinted = request().with_hint("cache_ttl", 30);
        assert_eq!(
            CacheMiddleware::cache_key("p", "m", &plain),
            CacheMiddleware::cache_key("p", "m", &hinted)
        );
    }
}
