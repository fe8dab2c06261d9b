//! Timeout and exponential-backoff retry for provider calls.
//!
//! [`RetryPolicy`] wraps any [`CompletionProvider`] and applies a per-call
//! deadline plus bounded exponential backoff. Retries cover transient
//! errors only: timeouts, rate limits, network failures, and HTTP 5xx.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use archi_types::Completion;

use crate::error::{ProviderError, Result};
use crate::provider::{CompletionProvider, CompletionRequest};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (default: 3).
    pub max_attempts: u32,
    /// Base delay between retries (default: 1 second).
    pub base_delay: Duration,
    /// Backoff factor applied per attempt (default: 2.0).
    pub factor: f64,
    /// Per-call deadline (default: 60 seconds).
    pub call_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// Determines whether a [`ProviderError`] is worth retrying.
pub fn is_retryable(err: &ProviderError) -> bool {
    match err {
        ProviderError::RateLimited { .. } => true,
        ProviderError::Timeout => true,
        ProviderError::Http(_) => true,
        ProviderError::RequestFailed(msg) => {
            msg.starts_with("HTTP 500")
                || msg.starts_with("HTTP 502")
                || msg.starts_with("HTTP 503")
                || msg.starts_with("HTTP 504")
        }
        ProviderError::AuthFailed(_)
        | ProviderError::ModelNotFound(_)
        | ProviderError::NotConfigured(_)
        | ProviderError::InvalidResponse(_)
        | ProviderError::Json(_) => false,
    }
}

/// Delay before retry attempt `n` (0-indexed): `base_delay * factor^n`.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let scale = config.factor.powi(attempt as i32);
    config.base_delay.mul_f64(scale)
}

/// A provider wrapper that enforces a per-call timeout and retries
/// transient failures with exponential backoff.
pub struct RetryPolicy<P> {
    inner: P,
    config: RetryConfig,
}

impl<P: CompletionProvider> RetryPolicy<P> {
    /// Wrap a provider with the given retry configuration.
    pub fn new(inner: P, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Returns a reference to the retry configuration.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns a reference to the inner provider.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: CompletionProvider> CompletionProvider for RetryPolicy<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn supports_vision(&self) -> bool {
        self.inner.supports_vision()
    }

    async fn complete_with_image(
        &self,
        request: &CompletionRequest,
        image_path: &std::path::Path,
    ) -> Result<Completion> {
        // Vision calls are one-shot: a retry re-uploads the whole image
        // for a request that usually failed for non-transient reasons.
        tokio::time::timeout(
            self.config.call_timeout,
            self.inner.complete_with_image(request, image_path),
        )
        .await
        .map_err(|_| ProviderError::Timeout)
        .and_then(|r| r)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let mut last_err = ProviderError::Timeout;

        for attempt in 0..self.config.max_attempts {
            let result = tokio::time::timeout(self.config.call_timeout, self.inner.complete(request))
                .await
                .map_err(|_| ProviderError::Timeout)
                .and_then(|r| r);

            match result {
                Ok(completion) => {
                    if attempt > 0 {
                        debug!(
                            provider = %self.inner.name(),
                            attempt,
                            "request succeeded after retry"
                        );
                    }
                    return Ok(completion);
                }
                Err(err) => {
                    if !is_retryable(&err) || attempt + 1 == self.config.max_attempts {
                        return Err(err);
                    }

                    // Rate limits carry their own suggested delay; honor it
                    // when it exceeds the computed backoff.
                    let delay = if let ProviderError::RateLimited { retry_after_ms } = &err {
                        compute_delay(&self.config, attempt)
                            .max(Duration::from_millis(*retry_after_ms))
                    } else {
                        compute_delay(&self.config, attempt)
                    };

                    warn!(
                        provider = %self.inner.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient provider error, retrying"
                    );
                    last_err = err;
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_err)
    }
}
