//! Core data contracts for the llm-comms library.
//!
//! These are the provider-agnostic shapes that flow through the middleware
//! pipeline: conversation messages, tool declarations, the chat request and
//! its normalized response, token usage, stream-independent client options,
//! and the capability/model descriptors a provider adapter advertises.
//!
//! Requests and responses are treated as logically immutable once they enter
//! the pipeline: middlewares that need a modified request materialize a
//! derived copy, and middlewares that need to annotate a response rebuild it
//! (or extend its `raw` passthrough map) rather than mutating shared state.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// MESSAGES
// ============================================================================

/// Identifies the sender of a message in the conversation.
///
/// Serializes to lowercase strings (`"system"`, `"user"`, ...). The
/// `Function` role covers tool-result turns and maps to the wire role
/// `"tool"` on every supported backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Establishes behavior and context; typically the first message.
    System,
    /// Input from the human or the calling application.
    User,
    /// A response produced by the model.
    Assistant,
    /// The result of a tool/function execution fed back to the model.
    Function,
}

/// A single conversation message: a role plus textual content.
///
/// Two messages are equal iff both fields are equal. The struct is plain
/// data; once handed to the client it is never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Who sent this message.
    pub role: Role,
    /// The textual content.
    pub content: String,
}

impl Message {
    /// Create a message with an explicit role.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Message {
            role,
            content: content.into(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Message::new(Role::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Message::new(Role::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::new(Role::Assistant, content)
    }

    /// Create a function/tool-result message.
    pub fn function(content: impl Into<String>) -> Self {
        Message::new(Role::Function, content)
    }
}

// ============================================================================
// TOOLS
// ============================================================================

/// Declaration of a tool the model may invoke.
///
/// `parameters` is a JSON-schema-like descriptor, typically containing at
/// least `type` and optionally `properties` and `required`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// Tool name; non-empty, case-sensitive.
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON-schema-like parameter descriptor.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `name` is empty or whitespace.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::validation("tool name cannot be empty"));
        }
        Ok(ToolDefinition {
            name,
            description: description.into(),
            parameters,
        })
    }

    /// The distinct property names listed in the schema's `required` array.
    ///
    /// Duplicate entries collapse to one; a missing or malformed `required`
    /// field yields an empty list.
    pub fn required_properties(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        if let Some(required) = self.parameters.get("required").and_then(Value::as_array) {
            for entry in required {
                if let Some(name) = entry.as_str() {
                    if !out.contains(&name) {
                        out.push(name);
                    }
                }
            }
        }
        out
    }
}

/// An ordered collection of [`ToolDefinition`]s with unique names.
///
/// Name uniqueness is case-sensitive and enforced at insertion time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ToolCollection {
    tools: Vec<ToolDefinition>,
}

impl ToolCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        ToolCollection::default()
    }

    /// Add a definition, preserving registration order.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a tool with the same name exists.
    pub fn add(&mut self, tool: ToolDefinition) -> Result<()> {
        if self.tools.iter().any(|t| t.name == tool.name) {
            return Err(Error::validation(format!(
                "duplicate tool name '{}'",
                tool.name
            )));
        }
        self.tools.push(tool);
        Ok(())
    }

    /// Look up a definition by exact name.
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Iterate over the definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.iter()
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl TryFrom<Vec<ToolDefinition>> for ToolCollection {
    type Error = Error;

    fn try_from(tools: Vec<ToolDefinition>) -> Result<Self> {
        let mut collection = ToolCollection::new();
        for tool in tools {
            collection.add(tool)?;
        }
        Ok(collection)
    }
}

/// A tool invocation emitted by the model.
///
/// `arguments_json` is the raw JSON string exactly as the provider sent it;
/// validation and parsing happen downstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    /// Name of the invoked tool.
    pub name: String,
    /// Raw JSON string holding the invocation arguments.
    pub arguments_json: String,
}

impl ToolCall {
    /// Create a new tool call.
    pub fn new(name: impl Into<String>, arguments_json: impl Into<String>) -> Self {
        ToolCall {
            name: name.into(),
            arguments_json: arguments_json.into(),
        }
    }
}

// ============================================================================
// REQUEST
// ============================================================================

/// Requested shape of the model's answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Free-form text (the default when the field is absent).
    Text,
    /// The answer must be a single JSON object.
    JsonObject,
}

/// A provider-agnostic chat completion request.
///
/// Past the client entry point the request is logically immutable;
/// middlewares that need a different view (redaction, normalization) build
/// derived copies. Optional sampling fields are only serialized to the wire
/// when present, and `provider_hints` never participates in the request
/// hash.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    /// The conversation messages to send, in order. Normally at least one;
    /// an empty list is passed through and the adapter decides whether the
    /// backend accepts it.
    pub messages: Vec<Message>,

    /// Tool definitions the model may invoke.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCollection>,

    /// Sampling temperature (0.0 – 2.0). `None` lets the provider choose.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff (0.0 – 1.0). `None` lets the provider choose.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Maximum number of tokens the model may generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Requested answer shape.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,

    /// Adapter- or cache-specific flags (`no_cache`, `cache_ttl_seconds`,
    /// `ollama.options.*`, ...). Non-semantic: stripped by normalization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_hints: Option<HashMap<String, Value>>,
}

impl ChatRequest {
    /// Create a request from a list of messages.
    pub fn new(messages: Vec<Message>) -> Self {
        ChatRequest {
            messages,
            ..ChatRequest::default()
        }
    }

    /// Set the tool collection.
    pub fn with_tools(mut self, tools: ToolCollection) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Set the sampling temperature.
    ///
    /// # Errors
    ///
    /// Returns a validation error outside 0.0 – 2.0.
    pub fn with_temperature(mut self, temperature: f32) -> Result<Self> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(Error::validation(
                "temperature must be between 0.0 and 2.0",
            ));
        }
        self.temperature = Some(temperature);
        Ok(self)
    }

    /// Set the nucleus sampling cutoff.
    ///
    /// # Errors
    ///
    /// Returns a validation error outside 0.0 – 1.0.
    pub fn with_top_p(mut self, top_p: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&top_p) {
            return Err(Error::validation("top_p must be between 0.0 and 1.0"));
        }
        self.top_p = Some(top_p);
        Ok(self)
    }

    /// Set the output token budget.
    ///
    /// # Errors
    ///
    /// Returns a validation error for zero.
    pub fn with_max_output_tokens(mut self, tokens: u32) -> Result<Self> {
        if tokens == 0 {
            return Err(Error::validation(
                "max_output_tokens must be greater than 0",
            ));
        }
        self.max_output_tokens = Some(tokens);
        Ok(self)
    }

    /// Set the requested answer shape.
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Add a single provider hint.
    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.provider_hints
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Read a provider hint by key.
    pub fn hint(&self, key: &str) -> Option<&Value> {
        self.provider_hints.as_ref().and_then(|h| h.get(key))
    }
}

// ============================================================================
// RESPONSE
// ============================================================================

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Build a usage record, computing the total as `prompt + completion`
    /// when the provider did not report one.
    pub fn new(prompt_tokens: u32, completion_tokens: u32, total_tokens: Option<u32>) -> Self {
        Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: total_tokens.unwrap_or(prompt_tokens + completion_tokens),
        }
    }

    /// Fold another usage record into this one. Used by the streaming
    /// observers, which accumulate usage across `complete` events.
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural completion.
    Stop,
    /// The output token budget was exhausted.
    Length,
    /// The model wants one or more tools invoked.
    ToolCall,
    /// The provider reported something this library does not classify.
    Unknown,
}

impl FinishReason {
    /// Map a vendor finish-reason string onto the canonical variants.
    ///
    /// The mapping is total: anything unrecognized becomes `Unknown`.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_call" | "tool_calls" | "tool" => FinishReason::ToolCall,
            _ => FinishReason::Unknown,
        }
    }

    /// Stable snake_case name, used as the `finish_reason` telemetry tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCall => "tool_call",
            FinishReason::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider-agnostic chat completion response.
///
/// Logically immutable: middlewares that need to annotate a response (the
/// validator in lenient mode) rebuild it with an extended `raw` map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    /// The assistant's message.
    pub message: Message,
    /// Token usage for the call.
    pub usage: Usage,
    /// Why generation stopped, when the provider reported it.
    pub finish_reason: Option<FinishReason>,
    /// Tool invocations requested by the model, in provider order.
    pub tool_calls: Vec<ToolCall>,
    /// Provider-specific passthrough fields (response id, model, created
    /// timestamp, system fingerprint, annotations).
    pub raw: HashMap<String, Value>,
}

impl ChatResponse {
    /// Create a response around an assistant message.
    pub fn new(message: Message, usage: Usage) -> Self {
        ChatResponse {
            message,
            usage,
            finish_reason: None,
            tool_calls: Vec::new(),
            raw: HashMap::new(),
        }
    }

    /// Set the finish reason.
    pub fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }

    /// Set the tool calls.
    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    /// Add a raw passthrough entry.
    pub fn with_raw(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.raw.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// CLIENT OPTIONS
// ============================================================================

/// Per-client behavior switches, snapshotted at client build time so later
/// mutation does not affect already-built clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// When true, the validator fails invalid-JSON / tool-mismatch responses
    /// with a validation error; when false it annotates instead.
    pub throw_on_invalid_json: bool,
    /// When true, the redaction middleware publishes a masked copy of the
    /// request messages into the call context.
    pub enable_redaction: bool,
    /// When true, the metrics middleware records token histograms.
    pub enable_token_usage_events: bool,
    /// When true, the client withholds stream deltas and emits one
    /// concatenated text delta just before the terminal event.
    pub coalesce_final_stream_text: bool,
    /// Applied to requests that omit `max_output_tokens`.
    pub default_max_output_tokens: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            throw_on_invalid_json: true,
            enable_redaction: true,
            enable_token_usage_events: true,
            coalesce_final_stream_text: false,
            default_max_output_tokens: 512,
        }
    }
}

// ============================================================================
// PROVIDER DESCRIPTORS
// ============================================================================

/// Feature flags a provider adapter advertises.
///
/// The client consults `supports_streaming` before building any per-call
/// state; the other flags are informational for callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub supports_streaming: bool,
    pub supports_json_mode: bool,
    pub supports_tools: bool,
    pub supports_batch: bool,
    pub supports_vision: bool,
    pub supports_audio: bool,
}

/// Conversational format a model speaks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    #[default]
    Chat,
    Instruct,
    Json,
}

/// Options supplied when creating a model handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelOptions {
    pub format: ModelFormat,
    pub max_input_tokens: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

/// An opaque model handle produced by a provider's `create_model`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderModel {
    /// Provider-side model identifier (or Azure deployment name).
    pub id: String,
    /// Conversational format tag.
    pub format: ModelFormat,
    /// Advertised input window, when known.
    pub max_input_tokens: Option<u32>,
    /// Advertised output budget, when known.
    pub max_output_tokens: Option<u32>,
}

impl ProviderModel {
    /// Create a model handle from an id and options.
    pub fn new(id: impl Into<String>, options: ModelOptions) -> Self {
        ProviderModel {
            id: id.into(),
            format: options.format,
            max_input_tokens: options.max_input_tokens,
            max_output_tokens: options.max_output_tokens,
        }
    }
}
