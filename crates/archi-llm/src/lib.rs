//! # archi-llm
//!
//! Completion-provider abstraction for the Archi agent.
//!
//! The control plane talks to models through the [`CompletionProvider`]
//! trait. The one concrete implementation, [`OpenAiCompatProvider`], speaks
//! the OpenAI chat-completions format and therefore covers both sides of
//! the routing split: a llama.cpp / vLLM server on localhost is the free
//! "local" provider, and any hosted OpenAI-compatible API is the paid
//! "remote" provider. [`RetryPolicy`] wraps a provider with per-call
//! timeouts and bounded exponential backoff; [`CircuitBreaker`] stops
//! hammering a backend that keeps failing.

pub mod breaker;
pub mod error;
pub mod openai_compat;
pub mod provider;
pub mod retry;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use error::{ProviderError, Result};
pub use openai_compat::{ModelPricing, OpenAiCompatProvider, ProviderConfig};
pub use provider::{CompletionProvider, CompletionRequest};
pub use retry::{RetryConfig, RetryPolicy};
