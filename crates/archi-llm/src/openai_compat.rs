//! OpenAI-compatible provider implementation.
//!
//! [`OpenAiCompatProvider`] works with any API that follows the OpenAI chat
//! completion format. A llama.cpp or vLLM server on localhost acts as the
//! free local model (pricing zeroed, no API key); OpenRouter or any hosted
//! endpoint acts as the paid remote model.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use archi_types::Completion;

use crate::error::{ProviderError, Result};
use crate::provider::{CompletionProvider, CompletionRequest};

/// Per-million-token pricing for one model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ModelPricing {
    /// USD per 1M input tokens.
    pub input_per_million: f64,
    /// USD per 1M output tokens.
    pub output_per_million: f64,
}

impl ModelPricing {
    /// Zero pricing for local inference.
    pub fn free() -> Self {
        Self::default()
    }

    /// Cost of a call with the given token counts.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (output_tokens as f64 / 1_000_000.0) * self.output_per_million
    }
}

/// Configuration for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Logical name used in logs and the budget ledger ("local", "openrouter").
    pub name: String,
    /// Base URL, e.g. `http://127.0.0.1:8080/v1` or `https://openrouter.ai/api/v1`.
    pub base_url: String,
    /// Environment variable holding the API key. Empty = no auth header.
    pub api_key_env: String,
    /// Model identifier sent with each request.
    pub model: String,
    /// Pricing used to compute `cost_usd` from usage.
    pub pricing: ModelPricing,
    /// Whether the backing model accepts image input.
    pub vision: bool,
}

/// A completion provider speaking the OpenAI chat-completions protocol.
pub struct OpenAiCompatProvider {
    config: ProviderConfig,
    http: reqwest::Client,
    api_key: Option<String>,
}

// ── Wire types ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Serialize)]
struct WireVisionRequest<'a> {
    model: &'a str,
    messages: Vec<WireVisionMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Serialize)]
struct WireVisionMessage<'a> {
    role: &'a str,
    content: Vec<WirePart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: WireImageUrl },
}

#[derive(Serialize)]
struct WireImageUrl {
    url: String,
}

/// Encode an image file as a `data:` URL for the chat-completions API.
fn image_data_url(path: &Path) -> Result<String> {
    let mime = match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        other => {
            return Err(ProviderError::RequestFailed(format!(
                "unsupported image format: {other:?}"
            )));
        }
    };
    let bytes = std::fs::read(path)
        .map_err(|e| ProviderError::RequestFailed(format!("unreadable image: {e}")))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{mime};base64,{encoded}"))
}

impl OpenAiCompatProvider {
    /// Create a new provider from configuration.
    ///
    /// The API key is resolved from `config.api_key_env` at request time,
    /// so construction never fails.
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            api_key: None,
        }
    }

    /// Create a provider with an explicit API key (bypasses env lookup).
    pub fn with_api_key(config: ProviderConfig, api_key: String) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            api_key: Some(api_key),
        }
    }

    /// Returns the provider configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    /// Resolve the API key: explicit key > environment variable > none.
    fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }
        if self.config.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.config.api_key_env).ok()
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let url = self.completions_url();
        let wire = WireRequest {
            model: &self.config.model,
            messages: vec![WireMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop: request.stop.clone(),
        };

        debug!(
            provider = %self.config.name,
            model = %self.config.model,
            prompt_chars = request.prompt.len(),
            "sending completion request"
        );

        let mut req = self
            .http
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(key) = self.resolve_api_key() {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let started = Instant::now();
        let response = req.json(&wire).send().await?;
        self.handle_response(response, started).await
    }

    fn supports_vision(&self) -> bool {
        self.config.vision
    }

    async fn complete_with_image(
        &self,
        request: &CompletionRequest,
        image_path: &Path,
    ) -> Result<Completion> {
        let url = self.completions_url();
        let data_url = image_data_url(image_path)?;
        let wire = WireVisionRequest {
            model: &self.config.model,
            messages: vec![WireVisionMessage {
                role: "user",
                content: vec![
                    WirePart::Text {
                        text: request.prompt.clone(),
                    },
                    WirePart::ImageUrl {
                        image_url: WireImageUrl { url: data_url },
                    },
                ],
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        debug!(
            provider = %self.config.name,
            image = %image_path.display(),
            "sending vision completion request"
        );

        let mut req = self
            .http
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(key) = self.resolve_api_key() {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let started = Instant::now();
        let response = req.json(&wire).send().await?;
        self.handle_response(response, started).await
    }
}

impl OpenAiCompatProvider {
    /// Map an HTTP response to a [`Completion`], with the shared error
    /// taxonomy for failure statuses.
    async fn handle_response(
        &self,
        response: reqwest::Response,
        started: Instant,
    ) -> Result<Completion> {
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                let retry_ms = parse_retry_after_ms(&body).unwrap_or(1000);
                warn!(provider = %self.config.name, retry_after_ms = retry_ms, "rate limited");
                return Err(ProviderError::RateLimited {
                    retry_after_ms: retry_ms,
                });
            }
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(ProviderError::AuthFailed(body));
            }
            if status.as_u16() == 404 {
                return Err(ProviderError::ModelNotFound(format!(
                    "model '{}': {body}",
                    self.config.model
                )));
            }
            return Err(ProviderError::RequestFailed(format!("HTTP {status}: {body}")));
        }

        let wire_response: WireResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("failed to parse response: {e}")))?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let text = wire_response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let usage = wire_response.usage.unwrap_or_default();
        let cost_usd = self
            .config
            .pricing
            .cost(usage.prompt_tokens, usage.completion_tokens);

        debug!(
            provider = %self.config.name,
            duration_ms,
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            cost_usd,
            "completion response received"
        );

        Ok(Completion {
            text,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            duration_ms,
            cost_usd,
            model: wire_response.model.unwrap_or_else(|| self.config.model.clone()),
            success: true,
            error: None,
        })
    }
}

/// Extract a retry delay in milliseconds from a 429 response body.
///
/// Looks for `"retry_after": <seconds>` in the error JSON.
fn parse_retry_after_ms(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let secs = value
        .get("error")
        .and_then(|e| e.get("retry_after"))
        .or_else(|| value.get("retry_after"))
        .and_then(|v| v.as_f64())?;
    Some((secs * 1000.0) as u64)
}
