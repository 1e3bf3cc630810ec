//! The transport port: an abstract HTTP send/receive boundary.
//!
//! Provider adapters marshal their payloads into [`TransportRequest`] and
//! read vendor bodies back out of [`TransportResponse`]; they never touch an
//! HTTP client directly. Streaming bodies are delivered as a single body
//! string containing the vendor's own delimiters (SSE `data:` prefixes or
//! newline-delimited JSON); the parsers live in the adapters.
//!
//! [`HttpTransport`] is the bundled reqwest binding so the crate works out
//! of the box; tests and embedders supply their own [`Transport`] doubles.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// An outbound HTTP request with fixed fields.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Absolute URL.
    pub url: String,
    /// HTTP method; defaults to POST.
    pub method: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: String,
}

impl TransportRequest {
    /// Create a POST request.
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        TransportRequest {
            url: url.into(),
            method: "POST".to_string(),
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// An inbound HTTP response with fixed fields.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers; a header may carry multiple values.
    pub headers: HashMap<String, Vec<String>>,
    /// Response body (for streamed endpoints: the whole delimited payload).
    pub body: String,
}

impl TransportResponse {
    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The single-operation transport port.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the complete response.
    async fn send(
        &self,
        request: TransportRequest,
        cancel: &CancellationToken,
    ) -> Result<TransportResponse>;
}

/// Reference [`Transport`] binding over reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a default client.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(from_reqwest)?;
        Ok(HttpTransport { client })
    }

    /// Create a transport around an existing reqwest client, so embedders
    /// can share connection pools and proxy settings.
    pub fn with_client(client: reqwest::Client) -> Self {
        HttpTransport { client }
    }

    async fn dispatch(&self, request: TransportRequest) -> Result<TransportResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::validation(format!("invalid HTTP method: {e}")))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = response.status().as_u16();
        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }

        let body = response.text().await.map_err(from_reqwest)?;
        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: TransportRequest,
        cancel: &CancellationToken,
    ) -> Result<TransportResponse> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::cancelled("transport send cancelled")),
            result = self.dispatch(request) => result,
        }
    }
}

/// Convert a [`reqwest::Error`] into the domain [`Error`].
///
/// Timeouts map to `Timeout`; everything else is a network-level failure
/// and maps to `ProviderUnavailable` (which the retry policy treats as
/// retryable).
fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::timeout(e.to_string()).with_source(e)
    } else {
        Error::provider_unavailable(e.to_string()).with_source(e)
    }
}
