//! Validator middleware.
//!
//! Two validation layers run over provider output:
//!
//! 1. **JSON mode**: when the request asked for `json_object`, the
//!    response content must parse to a top-level JSON object. Streaming
//!    accumulates all delta text and performs the same check at the
//!    terminal event.
//! 2. **Tool calls**: every emitted call must name a declared tool
//!    (case-sensitive), carry parseable JSON arguments, and supply every
//!    property the matched schema's `required` list demands.
//!
//! In strict mode (`throw_on_invalid_json`, the default) violations fail
//! the invocation with a `validation` error. In lenient mode the unary path
//! annotates the response `raw` map (`json_invalid`, `tool_mismatch`) and
//! the streaming path publishes the equivalent context items.

use crate::context::{ExecutionContext, items};
use crate::error::{Error, Result};
use crate::middleware::{Middleware, Next};
use crate::stream::{EventStream, StreamEvent};
use crate::types::{ChatResponse, ResponseFormat, ToolCall, ToolCollection};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

/// `raw` key set when lenient JSON validation fails.
pub const RAW_JSON_INVALID: &str = "json_invalid";
/// `raw` key set when lenient tool validation fails.
pub const RAW_TOOL_MISMATCH: &str = "tool_mismatch";

/// Whether the text parses as a JSON value whose top-level kind is object.
fn parses_to_object(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .map(|value| value.is_object())
        .unwrap_or(false)
}

fn invalid_json_error() -> Error {
    Error::validation("response content is not valid JSON with a top-level object")
}

/// Check one tool call against the declared collection.
fn validate_tool_call(call: &ToolCall, tools: Option<&ToolCollection>) -> Result<()> {
    let definition = tools.and_then(|t| t.get(&call.name)).ok_or_else(|| {
        Error::validation(format!(
            "tool '{}' is not part of the declared tool collection",
            call.name
        ))
    })?;

    let arguments: Value = serde_json::from_str(&call.arguments_json).map_err(|e| {
        Error::validation(format!(
            "tool '{}' arguments are not valid JSON: {e}",
            call.name
        ))
    })?;

    for property in definition.required_properties() {
        if arguments.get(property).is_none() {
            return Err(Error::validation(format!(
                "tool '{}' arguments are missing required property '{property}'",
                call.name
            )));
        }
    }
    Ok(())
}

/// Check every call; the first violation wins.
fn validate_tool_calls(calls: &[ToolCall], tools: Option<&ToolCollection>) -> Result<()> {
    for call in calls {
        validate_tool_call(call, tools)?;
    }
    Ok(())
}

/// Middleware enforcing JSON-mode and tool-call validity.
#[derive(Default)]
pub struct ValidatorMiddleware;

impl ValidatorMiddleware {
    /// Create a validator middleware.
    pub fn new() -> Self {
        ValidatorMiddleware
    }
}

#[async_trait]
impl Middleware for ValidatorMiddleware {
    async fn handle(&self, ctx: &mut ExecutionContext, next: Next<'_>) -> Result<ChatResponse> {
        let strict = ctx.options.throw_on_invalid_json;
        let json_mode = ctx.request.response_format == Some(ResponseFormat::JsonObject);
        let tools = ctx.request.tools.clone();
        let request_id = ctx.request_id().to_string();

        let mut response = next.run(ctx).await?;

        if json_mode && !parses_to_object(&response.message.content) {
            if strict {
                return Err(invalid_json_error().with_request_id(request_id));
            }
            response = response.with_raw(RAW_JSON_INVALID, true);
        }

        if !response.tool_calls.is_empty() {
            if let Err(violation) = validate_tool_calls(&response.tool_calls, tools.as_ref()) {
                if strict {
                    return Err(violation.with_request_id(request_id));
                }
                response = response.with_raw(RAW_TOOL_MISMATCH, true);
            }
        }

        Ok(response)
    }

    async fn handle_stream(
        &self,
        ctx: &mut ExecutionContext,
        next: Next<'_>,
    ) -> Result<EventStream> {
        let strict = ctx.options.throw_on_invalid_json;
        let json_mode = ctx.request.response_format == Some(ResponseFormat::JsonObject);
        let tools = ctx.request.tools.clone();
        let request_id = ctx.request_id().to_string();
        let call_ctx = ctx.call.clone();

        let mut inner = next.run_stream(ctx).await?;

        // Nothing to validate: stay out of the event path entirely.
        if !json_mode && tools.is_none() {
            return Ok(inner);
        }

        let wrapped = async_stream::stream! {
            let mut buffer = String::new();

            while let Some(event) = inner.next().await {
                let mut failure = None;
                match &event {
                    Ok(StreamEvent::Delta { text }) => {
                        if json_mode {
                            buffer.push_str(text);
                        }
                    }
                    Ok(StreamEvent::ToolCall { call }) => {
                        if let Err(violation) = validate_tool_call(call, tools.as_ref()) {
                            if strict {
                                failure = Some(violation);
                            } else {
                                call_ctx.set_item(items::VALIDATION_TOOL_MISMATCH, true);
                            }
                        }
                    }
                    Ok(StreamEvent::Complete { .. }) => {
                        if json_mode && !parses_to_object(&buffer) {
                            if strict {
                                failure = Some(invalid_json_error());
                            } else {
                                call_ctx.set_item(items::VALIDATION_JSON_INVALID, true);
                            }
                        }
                    }
                    _ => {}
                }

                // A strict violation replaces the offending event and ends
                // the stream.
                if let Some(violation) = failure {
                    yield Err(violation.with_request_id(request_id.clone()));
                    return;
                }
                yield event;
            }
        };

        Ok(Box::pin(wrapped))
    }
}
