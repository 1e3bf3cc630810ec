//! Shared utilities: canonical role mapping, tool descriptor extraction,
//! request normalization and content-hashing, request-id generation, and
//! HTTP-status-to-error translation.
//!
//! Everything in this module is pure and deterministic; the request hash in
//! particular is stable across processes so cache keys computed on
//! different machines agree.

use crate::error::Error;
use crate::types::{ChatRequest, Role, ToolCollection};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Map a [`Role`] onto the canonical wire role.
///
/// The mapping is total and idempotent; the `Function` role serializes as
/// `"tool"` on every supported backend.
pub fn wire_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Function => "tool",
    }
}

/// Parse a wire role back into a [`Role`]. Unknown roles fall back to
/// `User` so the mapping stays total.
pub fn role_from_wire(role: &str) -> Role {
    match role {
        "system" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" | "function" => Role::Function,
        _ => Role::User,
    }
}

/// Serialize a tool collection into the shared wire shape:
/// `{"type": "function", "function": {name, description, parameters}}`.
pub fn tools_to_wire(tools: &ToolCollection) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect()
}

/// Produce the normalized copy of a request used for hashing: volatile,
/// non-semantic fields are stripped (`provider_hints` is always `None`);
/// every other field is preserved exactly. Idempotent.
pub fn normalize_request(request: &ChatRequest) -> ChatRequest {
    let mut normalized = request.clone();
    normalized.provider_hints = None;
    normalized
}

/// Deterministic content hash of a request: SHA-256 over the canonical JSON
/// encoding of the normalized request, hex-encoded lowercase (64 chars).
///
/// Canonical means: struct fields in declaration order, `None` fields
/// omitted, JSON object keys sorted (serde_json's default map ordering;
/// the `preserve_order` feature must stay off). Two requests that differ
/// only in `provider_hints` hash identically.
pub fn request_hash(request: &ChatRequest) -> String {
    let normalized = normalize_request(request);
    // ChatRequest serialization cannot fail: it is a closed tree of strings,
    // numbers, and Values.
    let canonical = serde_json::to_vec(&normalized).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    hex::encode(digest)
}

/// Generate a fresh opaque request id: 32 lowercase hex characters.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Translate an HTTP status into the error taxonomy. Total over the status
/// domain; statuses outside the mapped set yield a generic LLM error
/// carrying the status code.
pub fn status_to_error(
    status: u16,
    message: impl Into<String>,
    request_id: &str,
    retry_after: Option<Duration>,
) -> Error {
    let message = message.into();
    let err = match status {
        400 | 422 => Error::validation(message),
        401 => Error::authorization(message),
        402 => Error::quota_exceeded(message),
        403 => Error::permission_denied(message),
        404 => Error::provider_unknown(message),
        408 => Error::timeout(message),
        409 => Error::provider_unavailable(message),
        429 => {
            let err = Error::rate_limited(message);
            match retry_after {
                Some(delay) => err.with_retry_after(delay),
                None => err,
            }
        }
        s if (500..600).contains(&s) => Error::provider_unavailable(message),
        _ => Error::llm(message),
    };
    err.with_status_code(status).with_request_id(request_id)
}

/// Parse a `Retry-After` header value (whole seconds) into a duration.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
