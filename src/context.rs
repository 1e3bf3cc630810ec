//! Per-invocation contexts.
//!
//! [`CallContext`] is the sideband channel of one client invocation: an
//! opaque request id plus a mutable bag of items middlewares publish and
//! consume (`llm.cache.hit`, `llm.redacted.preview`, ...). It is cheap to
//! clone (clones share the same bag), so streaming observers can keep
//! publishing after the pipeline has returned its stream.
//!
//! [`ExecutionContext`] is the state threaded through the middleware chain:
//! provider, model, the current request, the call context, an options
//! snapshot, and the cancellation signal. Middlewares may replace the
//! request with a derived copy; the other references stay fixed for the
//! lifetime of the invocation.

use crate::provider::ChatProvider;
use crate::types::{ChatRequest, ClientOptions, ProviderModel};
use crate::util::new_request_id;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;

/// Context-item keys readable by external middlewares. These names are part
/// of the stable surface of the library.
pub mod items {
    /// Masked copy of the request messages (published when redaction is on).
    pub const REDACTED_MESSAGES: &str = "llm.redacted.messages";
    /// Short sanitized excerpt of the last one-or-two messages.
    pub const REDACTED_PREVIEW: &str = "llm.redacted.preview";
    /// The cache middleware answered from the store.
    pub const CACHE_HIT: &str = "llm.cache.hit";
    /// The cache middleware stored the response it saw.
    pub const CACHE_STORED: &str = "llm.cache.stored";
    /// Lenient-mode streaming JSON validation failed.
    pub const VALIDATION_JSON_INVALID: &str = "llm.validation.json_invalid";
    /// Lenient-mode streaming tool validation failed.
    pub const VALIDATION_TOOL_MISMATCH: &str = "llm.validation.tool_mismatch";
}

/// The sideband state of one client invocation.
///
/// Created at client entry, dropped when the outermost middleware returns
/// (or, for streaming, when the last clone held by a stream wrapper goes
/// away).
#[derive(Debug, Clone)]
pub struct CallContext {
    request_id: String,
    items: Arc<RwLock<HashMap<String, Value>>>,
}

impl CallContext {
    /// Create a context with a fresh 32-character hex request id.
    pub fn new() -> Self {
        CallContext {
            request_id: new_request_id(),
            items: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a context with an explicit request id. Useful in tests and
    /// when correlating with an id minted elsewhere.
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        CallContext {
            request_id: request_id.into(),
            items: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The invocation's request id (opaque 32-char hex).
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Publish an item into the bag, replacing any previous value.
    pub fn set_item(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.write_items().insert(key.into(), value.into());
    }

    /// Read an item out of the bag.
    pub fn item(&self, key: &str) -> Option<Value> {
        self.read_items().get(key).cloned()
    }

    /// Read a boolean item; absent or non-boolean values read as `false`.
    pub fn item_flag(&self, key: &str) -> bool {
        self.item(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Whether any item exists under the key.
    pub fn has_item(&self, key: &str) -> bool {
        self.read_items().contains_key(key)
    }

    fn read_items(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        match self.items.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_items(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        match self.items.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        CallContext::new()
    }
}

/// The state threaded through the middleware chain for one invocation.
pub struct ExecutionContext {
    /// The provider adapter the terminal middleware will call.
    pub provider: Arc<dyn ChatProvider>,
    /// The model handle for this invocation.
    pub model: ProviderModel,
    /// The current request. Middlewares may replace this with a derived
    /// copy (redaction, default application) but must not mutate shared
    /// state reachable from a previously observed value.
    pub request: ChatRequest,
    /// Sideband items and the request id.
    pub call: CallContext,
    /// Client options, snapshotted at client build time.
    pub options: ClientOptions,
    /// Cooperative cancellation signal for the invocation.
    pub cancel: CancellationToken,
    /// Whether this invocation runs the streaming path.
    pub streaming: bool,
}

impl ExecutionContext {
    /// The invocation's request id.
    pub fn request_id(&self) -> &str {
        self.call.request_id()
    }

    /// The provider's short stable name.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// The model identifier.
    pub fn model_id(&self) -> &str {
        &self.model.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_context_has_hex_request_id() {
        let ctx = CallContext::new();
        assert_eq!(ctx.request_id().len(), 32);
        assert!(ctx.request_id().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_items_round_trip() {
        let ctx = CallContext::new();
        assert!(!ctx.has_item(items::CACHE_HIT));

        ctx.set_item(items::CACHE_HIT, true);
        assert!(ctx.item_flag(items::CACHE_HIT));
        assert_eq!(ctx.item(items::CACHE_HIT), Some(Value::Bool(true)));
    }

    #[test]
    fn test_clones_share_the_items_bag() {
        let ctx = CallContext::new();
        let clone = ctx.clone();
        clone.set_item("published.after.clone", 1);
        assert!(ctx.has_item("published.after.clone"));
        assert_eq!(ctx.request_id(), clone.request_id());
    }

    #[test]
    fn test_item_flag_defaults_false_for_non_bool() {
        let ctx = CallContext::new();
        ctx.set_item("numeric", 3);
        assert!(!ctx.item_flag("numeric"));
        assert!(!ctx.item_flag("absent"));
    }
}
