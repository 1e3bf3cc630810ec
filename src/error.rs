//! Error types for the llm-comms library.
//!
//! Every error surfaced by the library carries the same correlation fields:
//! a structured [`ErrorKind`], a human-readable message, the originating
//! request id when one exists, and, where known, the HTTP status code and
//! the provider-specific error code. Rate-limit errors additionally carry
//! the provider-suggested retry delay.
//!
//! Provider adapters translate vendor failures into this taxonomy at the
//! boundary; callers never see raw HTTP errors unless wrapped as a cause.

use std::time::Duration;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of an [`Error`].
///
/// The kinds map one-to-one onto the retry/abort decisions the resilience
/// policies make and onto the `error_type` tag the metrics middleware
/// records, so their rendered names are part of the stable observability
/// surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request or the provider's answer failed a structural check
    /// (invalid JSON in JSON mode, undeclared tool, missing required
    /// arguments, rejected payload).
    Validation,

    /// Credentials were missing or not accepted.
    Authorization,

    /// Credentials were accepted but do not grant access to the resource.
    PermissionDenied,

    /// The account's quota or billing state blocks the call.
    QuotaExceeded,

    /// The provider throttled the call. May carry a retry-after delay.
    RateLimited,

    /// The provider is reachable but unable to serve the call right now,
    /// or the transport failed to reach it at all.
    ProviderUnavailable,

    /// The provider does not know the requested resource (model,
    /// deployment, endpoint).
    ProviderUnknown,

    /// A deadline elapsed before the call completed.
    Timeout,

    /// The operation is not supported by the selected provider
    /// (e.g. streaming against a non-streaming adapter).
    NotSupported,

    /// The caller cancelled the call. Kept distinct from [`Timeout`] so
    /// telemetry can tell deadline expiry apart from user intent.
    ///
    /// [`Timeout`]: ErrorKind::Timeout
    Cancelled,

    /// Generic fallthrough for anything the taxonomy does not cover.
    Llm,
}

impl ErrorKind {
    /// Stable snake_case name, used as the `error_type` tag in telemetry.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authorization => "authorization",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::ProviderUnknown => "provider_unknown",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotSupported => "not_supported",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Llm => "llm",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Main error type for the library.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    request_id: Option<String>,
    status_code: Option<u16>,
    provider_code: Option<String>,
    retry_after: Option<Duration>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Create an error of an explicit kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            request_id: None,
            status_code: None,
            provider_code: None,
            retry_after: None,
            source: None,
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::Validation, msg)
    }

    /// Create an authorization error
    pub fn authorization(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::Authorization, msg)
    }

    /// Create a permission-denied error
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::PermissionDenied, msg)
    }

    /// Create a quota-exceeded error
    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::QuotaExceeded, msg)
    }

    /// Create a rate-limited error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::RateLimited, msg)
    }

    /// Create a provider-unavailable error
    pub fn provider_unavailable(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::ProviderUnavailable, msg)
    }

    /// Create a provider-unknown error
    pub fn provider_unknown(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::ProviderUnknown, msg)
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::Timeout, msg)
    }

    /// Create a not-supported error
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotSupported, msg)
    }

    /// Create a cancelled error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::Cancelled, msg)
    }

    /// Create a generic LLM error
    pub fn llm(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::Llm, msg)
    }

    /// Attach the originating request id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attach the HTTP status code the provider answered with.
    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Attach the provider-specific error code.
    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    /// Attach the provider-suggested retry delay.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Attach the underlying cause.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The error's classification.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The originating request id, when known.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// The HTTP status code, when known.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// The provider-specific error code, when known.
    pub fn provider_code(&self) -> Option<&str> {
        self.provider_code.as_deref()
    }

    /// The provider-suggested retry delay, when present.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_kind_and_message() {
        let err = Error::validation("response is not valid JSON");
        assert_eq!(err.to_string(), "validation: response is not valid JSON");
    }

    #[test]
    fn test_error_kind_names_are_stable() {
        assert_eq!(ErrorKind::Validation.as_str(), "validation");
        assert_eq!(ErrorKind::Authorization.as_str(), "authorization");
        assert_eq!(ErrorKind::PermissionDenied.as_str(), "permission_denied");
        assert_eq!(ErrorKind::QuotaExceeded.as_str(), "quota_exceeded");
        assert_eq!(ErrorKind::RateLimited.as_str(), "rate_limited");
        assert_eq!(
            ErrorKind::ProviderUnavailable.as_str(),
            "provider_unavailable"
        );
        assert_eq!(ErrorKind::ProviderUnknown.as_str(), "provider_unknown");
        assert_eq!(ErrorKind::Timeout.as_str(), "timeout");
        assert_eq!(ErrorKind::NotSupported.as_str(), "not_supported");
        assert_eq!(ErrorKind::Cancelled.as_str(), "cancelled");
        assert_eq!(ErrorKind::Llm.as_str(), "llm");
    }

    #[test]
    fn test_error_correlation_fields() {
        let err = Error::rate_limited("slow down")
            .with_request_id("abc123")
            .with_status_code(429)
            .with_provider_code("rate_limit_exceeded")
            .with_retry_after(Duration::from_millis(250));

        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(err.request_id(), Some("abc123"));
        assert_eq!(err.status_code(), Some(429));
        assert_eq!(err.provider_code(), Some("rate_limit_exceeded"));
        assert_eq!(err.retry_after(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_error_source_is_preserved() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = Error::validation("bad payload").with_source(json_err);

        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_cancelled_is_distinct_from_timeout() {
        assert_ne!(ErrorKind::Cancelled, ErrorKind::Timeout);
        assert_eq!(Error::cancelled("stopped").kind(), ErrorKind::Cancelled);
    }
}
