//! Circuit breaker for failing providers.
//!
//! [`CircuitBreaker`] wraps a [`CompletionProvider`] and stops sending
//! requests after repeated failures, preventing a dead local server or a
//! flapping API from stalling every routing decision. After a recovery
//! timeout the breaker half-opens and lets probe requests through; enough
//! consecutive successes close it again.
//!
//! While the circuit is open, `is_available()` reports `false`, so the
//! router skips the provider without paying a connection timeout.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use archi_types::Completion;

use crate::error::{ProviderError, Result};
use crate::provider::{CompletionProvider, CompletionRequest};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failing; requests are refused.
    Open,
    /// Testing whether the backend recovered.
    HalfOpen,
}

/// Configuration for the breaker thresholds.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long to wait before probing again.
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes needed to close.
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// A provider wrapper implementing the circuit-breaker pattern.
pub struct CircuitBreaker<P> {
    inner: P,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl<P: CompletionProvider> CircuitBreaker<P> {
    pub fn new(inner: P, config: BreakerConfig) -> Self {
        Self {
            inner,
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
        }
    }

    /// Current circuit state (open circuits report as-is even if the
    /// recovery timeout has elapsed; the transition happens on the next
    /// call).
    pub fn state(&self) -> CircuitState {
        self.state.lock().expect("circuit breaker lock poisoned").state
    }

    /// Returns a reference to the inner provider.
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Decide whether a request may proceed, transitioning Open ->
    /// HalfOpen when the recovery timeout has elapsed.
    fn admit(&self) -> bool {
        let mut state = self.state.lock().expect("circuit breaker lock poisoned");
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = state
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if elapsed {
                    info!(provider = %self.inner.name(), "circuit half-open, probing");
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn on_success(&self) {
        let mut state = self.state.lock().expect("circuit breaker lock poisoned");
        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    info!(provider = %self.inner.name(), "circuit closed, provider recovered");
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                }
            }
            CircuitState::Closed => state.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut state = self.state.lock().expect("circuit breaker lock poisoned");
        state.failure_count += 1;
        state.success_count = 0;
        state.last_failure = Some(Instant::now());
        if state.failure_count >= self.config.failure_threshold
            || state.state == CircuitState::HalfOpen
        {
            if state.state != CircuitState::Open {
                warn!(
                    provider = %self.inner.name(),
                    failures = state.failure_count,
                    "circuit opened"
                );
            }
            state.state = CircuitState::Open;
        }
    }
}

#[async_trait]
impl<P: CompletionProvider> CompletionProvider for CircuitBreaker<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_available(&self) -> bool {
        if !self.inner.is_available() {
            return false;
        }
        // An open circuit that is due for a probe counts as available.
        let state = self.state.lock().expect("circuit breaker lock poisoned");
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => state
                .last_failure
                .map(|at| at.elapsed() >= self.config.recovery_timeout)
                .unwrap_or(true),
        }
    }

    fn supports_vision(&self) -> bool {
        self.inner.supports_vision()
    }

    async fn complete_with_image(
        &self,
        request: &CompletionRequest,
        image_path: &std::path::Path,
    ) -> Result<Completion> {
        if !self.admit() {
            return Err(ProviderError::RequestFailed(format!(
                "circuit open for provider '{}'",
                self.inner.name()
            )));
        }
        match self.inner.complete_with_image(request, image_path).await {
            Ok(completion) => {
                if completion.success {
                    self.on_success();
                } else {
                    self.on_failure();
                }
                Ok(completion)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        if !self.admit() {
            return Err(ProviderError::RequestFailed(format!(
                "circuit open for provider '{}'",
                self.inner.name()
            )));
        }

        match self.inner.complete(request).await {
            Ok(completion) => {
                // A provider-reported failure still counts against the
                // circuit; the backend responded but could not serve.
                if completion.success {
                    self.on_success();
                } else {
                    self.on_failure();
                }
                Ok(completion)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }
}
