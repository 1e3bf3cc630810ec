//! # llm-comms
//!
//! A provider-agnostic client library for conversational LLM backends.
//!
//! One stable calling surface fans out to several vendor endpoints (an
//! OpenAI-style chat API, a local Ollama server, Azure's hosted OpenAI
//! variant) while uniformly providing request shaping, response
//! normalization, streamed incremental delivery, observability, redaction,
//! validation, caching, and a structured error taxonomy.
//!
//! ## Architecture
//!
//! The core is a middleware pipeline. Every invocation flows
//! outer→inner through an ordered chain that ends in exactly one terminal:
//!
//! ```text
//! caller → client → Tracing → Redaction → Logging → Metrics
//!        → [custom middlewares] → Cache → Validator → Terminal
//!        → provider adapter → transport port
//! ```
//!
//! Responses flow back through the same layers, which observe or transform
//! them; the streaming path mirrors the unary path with an ordered event
//! sequence instead of a single response.
//!
//! ## Example
//!
//! ```rust,no_run
//! use llm_comms::{ChatRequest, HttpTransport, LlmClient, Message, OllamaProvider};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), llm_comms::Error> {
//!     let transport = Arc::new(HttpTransport::new()?);
//!     let provider = Arc::new(OllamaProvider::new(transport, "http://localhost:11434"));
//!
//!     let client = LlmClient::builder()
//!         .provider(provider)
//!         .model("llama3.2")
//!         .build()?;
//!
//!     let response = client
//!         .send(ChatRequest::new(vec![
//!             Message::system("You are concise."),
//!             Message::user("Hello"),
//!         ]))
//!         .await?;
//!
//!     println!("{}", response.message.content);
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use llm_comms::{ChatRequest, HttpTransport, LlmClient, Message, OllamaProvider, StreamEvent};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), llm_comms::Error> {
//! # let transport = Arc::new(HttpTransport::new()?);
//! # let provider = Arc::new(OllamaProvider::new(transport, "http://localhost:11434"));
//! let client = LlmClient::builder()
//!     .provider(provider)
//!     .model("llama3.2")
//!     .build()?;
//!
//! let mut events = client
//!     .stream(ChatRequest::new(vec![Message::user("Tell me a story")]))
//!     .await?;
//!
//! while let Some(event) = events.next().await {
//!     match event? {
//!         StreamEvent::Delta { text } => print!("{text}"),
//!         StreamEvent::Complete { usage, .. } => println!("\n{usage:?}"),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Response cache contract and the in-memory TTL reference store.
mod cache;

/// The client surface: per-call context seeding and pipeline invocation.
mod client;

/// Per-invocation call/execution contexts and the context-item key surface.
mod context;

/// Error taxonomy with correlation fields.
mod error;

/// The middleware chain and the built-in middlewares.
mod middleware;

/// Provider adapter contract, shared shaping/mapping rules, and the
/// bundled OpenAI-style and Ollama adapters.
mod provider;

/// Stream event contract.
mod stream;

/// Core data contracts: messages, tools, requests, responses, options.
mod types;

/// The abstract transport port and its reqwest reference binding.
mod transport;

/// Role mapping, normalization, hashing, ids, status translation.
mod util;

/// Resilience policies (timeout, retry, composition). Public as a module so
/// callers can wrap their own operations the same way.
pub mod policy;

// --- Client surface ---

pub use client::{LlmClient, LlmClientBuilder};

// --- Contexts ---

pub use context::{CallContext, ExecutionContext, items};

// --- Data contracts ---

pub use types::{
    ChatRequest, ChatResponse, ClientOptions, FinishReason, Message, ModelFormat, ModelOptions,
    ProviderCapabilities, ProviderModel, ResponseFormat, Role, ToolCall, ToolCollection,
    ToolDefinition, Usage,
};

// --- Streaming ---

pub use stream::{BoxStream, EventStream, StreamEvent};

// --- Errors ---

pub use error::{Error, ErrorKind, Result};

// --- Middleware surface ---

pub use middleware::{
    CacheMiddleware, EVENT_REQUEST_FAILURE, EVENT_REQUEST_PREVIEW, EVENT_REQUEST_START,
    EVENT_REQUEST_SUCCESS, EVENT_REQUEST_WARNING, LoggingMiddleware, METER_NAME,
    MetricsMiddleware, Middleware, Next, Pipeline, PipelineBuilder, RAW_JSON_INVALID,
    RAW_TOOL_MISMATCH, RedactionMiddleware, TRACER_NAME, TerminalMiddleware, TracingMiddleware,
    ValidatorMiddleware,
};

// --- Cache ---

pub use cache::{InMemoryResponseCache, ResponseCache};

// --- Providers ---

pub use provider::{ChatProvider, OllamaProvider, OpenAiProvider};

// --- Transport ---

pub use transport::{HttpTransport, Transport, TransportRequest, TransportResponse};

// --- Utilities ---

pub use util::{
    new_request_id, normalize_request, request_hash, role_from_wire, status_to_error, wire_role,
};

/// Convenience module with the most commonly used types.
/// Import with `use llm_comms::prelude::*;`.
pub mod prelude {
    pub use crate::{
        ChatProvider, ChatRequest, ChatResponse, ClientOptions, Error, ErrorKind, EventStream,
        FinishReason, HttpTransport, LlmClient, Message, OllamaProvider, OpenAiProvider,
        ResponseFormat, Result, Role, StreamEvent, ToolCall, ToolCollection, ToolDefinition,
        Transport, Usage,
    };
}
