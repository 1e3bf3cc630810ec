//! Resilience policies: timeout, retry with decorrelated jitter, and
//! outer-first composition.
//!
//! Policies wrap an async operation that accepts a cancellation token. The
//! timeout policy derives a child token from the caller's token plus a
//! deadline; the retry policy re-invokes the operation for retryable error
//! kinds with a decorrelated-jitter backoff; [`CompositePolicy`] chains
//! layers outer-first, so `retry` outside `timeout` gives every attempt a
//! fresh deadline.
//!
//! # Examples
//!
//! ```rust,no_run
//! use llm_comms::policy::RetryPolicy;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), llm_comms::Error> {
//! let policy = RetryPolicy::new().with_max_retries(3);
//! let cancel = CancellationToken::new();
//!
//! let value = policy
//!     .execute(&cancel, |_token| async {
//!         // Your fallible async operation here
//!         Ok::<_, llm_comms::Error>(42)
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, ErrorKind, Result};
use futures::future::BoxFuture;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Determine whether an error should be retried.
///
/// Retryable: rate limiting and provider/network unavailability (the
/// transport translates raw network I/O failures into
/// `ProviderUnavailable`). Everything else (validation, authorization,
/// permission, quota, timeout, cancellation) aborts immediately.
pub fn is_retryable(error: &Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::RateLimited | ErrorKind::ProviderUnavailable
    )
}

// ============================================================================
// TIMEOUT
// ============================================================================

/// Wraps an operation with a deadline.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    /// Create a timeout policy with the given deadline.
    pub fn new(duration: Duration) -> Self {
        TimeoutPolicy { duration }
    }

    /// The configured deadline.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run `op` under the deadline.
    ///
    /// The operation receives a child token derived from the caller's token;
    /// when the deadline fires the child is cancelled and the call fails
    /// with a `Timeout` error (tagged with `request_id` when available).
    /// Caller-initiated cancellation surfaces as `Cancelled`, not timeout.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        request_id: Option<&str>,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let child = cancel.child_token();
        let work = op(child.clone());
        tokio::pin!(work);
        let deadline = tokio::time::sleep(self.duration);
        tokio::pin!(deadline);

        tokio::select! {
            result = &mut work => result,
            _ = &mut deadline => {
                child.cancel();
                let err = Error::timeout(format!(
                    "deadline of {}ms elapsed",
                    self.duration.as_millis()
                ));
                Err(match request_id {
                    Some(id) => err.with_request_id(id),
                    None => err,
                })
            }
            _ = cancel.cancelled() => {
                child.cancel();
                let err = Error::cancelled("invocation cancelled by caller");
                Err(match request_id {
                    Some(id) => err.with_request_id(id),
                    None => err,
                })
            }
        }
    }
}

// ============================================================================
// RETRY
// ============================================================================

/// Wraps an operation with bounded retries and decorrelated-jitter backoff.
///
/// The next delay is `min(cap, uniform(base, previous * 3))` where
/// `previous` starts at `base`, so the first sleep is drawn from
/// `[base, 3·base]`. A `RateLimited` error carrying a retry-after delay
/// uses that delay instead for the affected attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Create a retry policy with the default configuration
    /// (2 retries, 250ms base, 4s cap).
    pub fn new() -> Self {
        RetryPolicy::default()
    }

    /// Set the maximum number of retries (attempts = retries + 1).
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Run `op`, retrying retryable failures up to the configured cap.
    ///
    /// Backoff sleeps honor the cancellation token; cancellation during a
    /// sleep surfaces as `Cancelled`.
    pub async fn execute<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut previous = self.base_delay;
        let mut attempt: u32 = 0;

        loop {
            match op(cancel.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_retries || !is_retryable(&err) {
                        return Err(err);
                    }

                    // A provider-suggested delay overrides the jitter for
                    // this attempt and leaves the jitter state untouched.
                    let delay = match (err.kind(), err.retry_after()) {
                        (ErrorKind::RateLimited, Some(after)) => after,
                        _ => self.next_delay(&mut previous),
                    };

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            return Err(Error::cancelled("retry backoff cancelled by caller"));
                        }
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Draw the next decorrelated-jitter delay and advance the state.
    fn next_delay(&self, previous: &mut Duration) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let upper_ms = (previous.as_millis() as u64).saturating_mul(3).max(base_ms);
        let sampled = if upper_ms > base_ms {
            rand::thread_rng().gen_range(base_ms..=upper_ms)
        } else {
            base_ms
        };
        let capped = sampled.min(self.max_delay.as_millis() as u64);
        let delay = Duration::from_millis(capped);
        *previous = delay;
        delay
    }
}

// ============================================================================
// COMPOSITION
// ============================================================================

/// A single layer of a [`CompositePolicy`].
#[derive(Debug, Clone)]
pub enum PolicyLayer {
    Timeout(TimeoutPolicy),
    Retry(RetryPolicy),
}

/// Chains policies outer-first: the first layer wraps everything after it,
/// so `CompositePolicy::new().then_retry(..).then_timeout(..)` gives each
/// retry attempt its own fresh deadline.
#[derive(Debug, Clone, Default)]
pub struct CompositePolicy {
    layers: Vec<PolicyLayer>,
}

impl CompositePolicy {
    /// Create an empty composition (executes the operation directly).
    pub fn new() -> Self {
        CompositePolicy { layers: Vec::new() }
    }

    /// Append a retry layer.
    pub fn then_retry(mut self, policy: RetryPolicy) -> Self {
        self.layers.push(PolicyLayer::Retry(policy));
        self
    }

    /// Append a timeout layer.
    pub fn then_timeout(mut self, policy: TimeoutPolicy) -> Self {
        self.layers.push(PolicyLayer::Timeout(policy));
        self
    }

    /// Run `op` under the composed layers.
    pub async fn execute<T, F>(
        &self,
        cancel: &CancellationToken,
        request_id: Option<&str>,
        op: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(CancellationToken) -> BoxFuture<'static, Result<T>> + Send + Sync,
    {
        self.run_from(0, cancel.clone(), request_id, &op).await
    }

    fn run_from<'a, T, F>(
        &'a self,
        index: usize,
        cancel: CancellationToken,
        request_id: Option<&'a str>,
        op: &'a F,
    ) -> BoxFuture<'a, Result<T>>
    where
        T: Send + 'static,
        F: Fn(CancellationToken) -> BoxFuture<'static, Result<T>> + Send + Sync,
    {
        Box::pin(async move {
            match self.layers.get(index) {
                None => op(cancel).await,
                Some(PolicyLayer::Timeout(timeout)) => {
                    timeout
                        .execute(&cancel, request_id, |child| {
                            self.run_from(index + 1, child, request_id, op)
                        })
                        .await
                }
                Some(PolicyLayer::Retry(retry)) => {
                    retry
                        .execute(&cancel, |token| {
                            self.run_from(index + 1, token, request_id, op)
                        })
                        .await
                }
            }
        })
    }
}
