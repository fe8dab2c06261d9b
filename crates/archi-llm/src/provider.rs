//! The core [`CompletionProvider`] trait.
//!
//! All model backends implement this trait, which provides a single
//! `complete` method. The request carries flat rendered prompt text; the
//! router owns prompt structure and renders before calling.

use async_trait::async_trait;

use archi_types::Completion;

use crate::error::Result;

/// A single completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Rendered prompt text.
    pub prompt: String,
    /// Maximum number of tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Optional stop sequences.
    pub stop: Vec<String>,
}

impl CompletionRequest {
    /// A request with default sampling (500 tokens, temperature 0.7).
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: 500,
            temperature: 0.7,
            stop: Vec::new(),
        }
    }

    /// Builder-style token limit override.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Builder-style temperature override.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A backend that can execute completion requests.
///
/// Implementations handle the protocol details for a specific model API.
/// The main implementation is
/// [`OpenAiCompatProvider`](crate::openai_compat::OpenAiCompatProvider),
/// which works with any OpenAI-compatible endpoint, including local
/// llama.cpp / vLLM servers.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name for logging and usage accounting (e.g. "local",
    /// "openrouter").
    fn name(&self) -> &str;

    /// True when the backend can currently serve requests. The router uses
    /// this to decide whether trying the local model is worthwhile at all;
    /// transient failures are still reported through `complete`.
    fn is_available(&self) -> bool {
        true
    }

    /// Execute a completion request.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`](crate::error::ProviderError) on network
    /// failures, authentication problems, rate limiting, or unparseable
    /// responses.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;

    /// True when this backend can accept image input.
    fn supports_vision(&self) -> bool {
        false
    }

    /// Execute a completion over text plus one image file (vision path).
    ///
    /// The default implementation reports the capability missing; only
    /// vision-capable backends override it.
    async fn complete_with_image(
        &self,
        _request: &CompletionRequest,
        _image_path: &std::path::Path,
    ) -> Result<Completion> {
        Err(crate::error::ProviderError::NotConfigured(format!(
            "provider '{}' has no vision support",
            self.name()
        )))
    }
}
