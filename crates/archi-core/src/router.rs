//! Model router: pick the free local model or the paid remote API per
//! request.
//!
//! The router classifies the user's turn, tries the local model for
//! simple/medium work, scores its answer, and escalates to the remote
//! provider only when confidence is too low -- and only when the budget
//! ledger permits the spend. Every final response lands in the response
//! cache; repeats within the TTL cost nothing.
//!
//! The routing decision reads `prompt.user` only. System scaffolding and
//! history never trip the complexity or web-search heuristics.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use archi_llm::{CompletionProvider, CompletionRequest};
use archi_types::{Completion, Prompt, RouteFlags};

use crate::budget::BudgetLedger;
use crate::cache::{ResponseCache, fingerprint};
use crate::parsing::strip_reasoning_blocks;

/// Confidence floor for keeping a local answer.
const CONFIDENCE_THRESHOLD: f32 = 0.7;
/// Lower floor for short conversational queries (greetings, identity).
const CONFIDENCE_THRESHOLD_CONVERSATIONAL: f32 = 0.5;
/// Nominal cost estimate used for the pre-call budget gate.
const REMOTE_CALL_ESTIMATE_USD: f64 = 0.001;

/// Complexity class of a user query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

/// A completion as returned by the router, annotated with routing outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedCompletion {
    pub text: String,
    /// Which provider produced this ("local", "openrouter", "blocked").
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Cost of THIS call; 0 for local, cached, and blocked responses.
    pub cost_usd: f64,
    /// Confidence estimate; present only for local responses.
    #[serde(default)]
    pub confidence: Option<f32>,
    /// True when served from the response cache.
    #[serde(default)]
    pub cached: bool,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl RoutedCompletion {
    fn from_completion(completion: Completion, provider: &str, confidence: Option<f32>) -> Self {
        Self {
            text: completion.text,
            provider: provider.to_string(),
            model: completion.model,
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
            cost_usd: completion.cost_usd,
            confidence,
            cached: false,
            success: completion.success,
            error: completion.error,
        }
    }

    fn blocked(message: String) -> Self {
        Self {
            text: String::new(),
            provider: "blocked".into(),
            model: "blocked".into(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            confidence: None,
            cached: false,
            success: false,
            error: Some(message),
        }
    }
}

/// Routing counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouterStats {
    pub local_used: u64,
    pub remote_used: u64,
    pub total_cost_usd: f64,
}

/// Routes prompts between the local model and the remote API.
pub struct ModelRouter {
    local: Option<Arc<dyn CompletionProvider>>,
    remote: Arc<dyn CompletionProvider>,
    cache: Arc<ResponseCache>,
    ledger: Arc<BudgetLedger>,
    /// Fraction of the daily budget past which simple queries stop escalating.
    budget_warning_fraction: f64,
    stats: RwLock<RouterStats>,
}

impl ModelRouter {
    pub fn new(
        local: Option<Arc<dyn CompletionProvider>>,
        remote: Arc<dyn CompletionProvider>,
        cache: Arc<ResponseCache>,
        ledger: Arc<BudgetLedger>,
        budget_warning_pct: f32,
    ) -> Self {
        info!(
            local_available = local.is_some(),
            remote = %remote.name(),
            "model router initialized"
        );
        Self {
            local,
            remote,
            cache,
            ledger,
            budget_warning_fraction: f64::from(budget_warning_pct) / 100.0,
            stats: RwLock::new(RouterStats::default()),
        }
    }

    /// True when the local model is wired up and reachable.
    pub fn local_available(&self) -> bool {
        self.local.as_ref().is_some_and(|p| p.is_available())
    }

    /// Route and execute one completion request.
    pub async fn generate(
        &self,
        prompt: &Prompt,
        max_tokens: u32,
        temperature: f64,
        flags: RouteFlags,
    ) -> RoutedCompletion {
        let rendered = prompt.render();
        let fp = fingerprint(&rendered);

        // Single-flight: hold the fingerprint's fill lock across the miss
        // so concurrent identical requests produce one provider call.
        let fill_lock = self.cache.fill_lock(&fp);
        let _guard = fill_lock.lock().await;

        if let Some(mut hit) = self.cache.get(&fp) {
            debug!(fingerprint = %&fp[..12], "cache hit");
            hit.cached = true;
            hit.cost_usd = 0.0;
            return hit;
        }

        let complexity = classify_complexity(&prompt.user);
        let needs_search = !flags.skip_web_search && needs_web_search(&prompt.user);
        debug!(
            ?complexity,
            needs_search,
            prefer_local = flags.prefer_local,
            force_remote = flags.force_remote,
            user_words = prompt.user.split_whitespace().count(),
            "routing decision inputs"
        );

        if flags.force_remote {
            let response = self.use_remote(&rendered, max_tokens, temperature).await;
            if response.success {
                self.cache.set(&fp, response.clone());
            }
            return response;
        }

        let try_local = flags.prefer_local || (complexity != Complexity::Complex && !needs_search);

        if try_local
            && let Some(local) = self.local.clone().filter(|p| p.is_available())
        {
            let response = self
                .use_local(&*local, &rendered, max_tokens, temperature, flags.use_reasoning)
                .await;
            let confidence = estimate_confidence(&response);
            let mut routed =
                RoutedCompletion::from_completion(response, self.local_name(), Some(confidence));
            routed.cost_usd = 0.0;

            // prefer_local: keep any non-empty local answer, no escalation.
            if flags.prefer_local && routed.success && !routed.text.trim().is_empty() {
                self.note_local_use();
                self.cache.set(&fp, routed.clone());
                return routed;
            }

            let user_words = prompt.user.split_whitespace().count();
            let threshold = if user_words <= 15 && !needs_search {
                CONFIDENCE_THRESHOLD_CONVERSATIONAL
            } else {
                CONFIDENCE_THRESHOLD
            };

            if routed.success && confidence >= threshold {
                debug!(confidence, threshold, "local response accepted");
                self.note_local_use();
                self.cache.set(&fp, routed.clone());
                return routed;
            }

            debug!(
                confidence,
                threshold, "local confidence below threshold, considering escalation"
            );

            // Past the budget warning line, a simple query is not worth
            // paid escalation; the local answer stands.
            if complexity == Complexity::Simple && !needs_search && self.budget_warning_reached() {
                info!("budget warning reached, keeping local response for simple query");
                self.note_local_use();
                self.cache.set(&fp, routed.clone());
                return routed;
            }
        }

        let response = self.use_remote(&rendered, max_tokens, temperature).await;
        if response.success {
            self.cache.set(&fp, response.clone());
        }
        response
    }

    /// Convenience wrapper with default sampling and flags.
    pub async fn generate_text(&self, user: &str) -> RoutedCompletion {
        self.generate(&Prompt::from_user(user), 500, 0.7, RouteFlags::default())
            .await
    }

    /// Analyze an image with the local vision model, falling back to a
    /// text-only remote call when no vision backend is available.
    ///
    /// Vision responses are never cached: the fingerprint would cover the
    /// text but not the image bytes.
    pub async fn chat_with_image(
        &self,
        text: &str,
        image_path: &std::path::Path,
        max_tokens: u32,
        temperature: f64,
    ) -> RoutedCompletion {
        if let Some(local) = self.local.clone().filter(|p| p.is_available() && p.supports_vision())
        {
            info!("using local vision model for image analysis");
            let request = CompletionRequest::new(text)
                .with_max_tokens(max_tokens)
                .with_temperature(temperature);
            match local.complete_with_image(&request, image_path).await {
                Ok(mut completion) if completion.success && !completion.text.trim().is_empty() => {
                    completion.text = strip_reasoning_blocks(&completion.text);
                    completion.cost_usd = 0.0;
                    self.note_local_use();
                    return RoutedCompletion::from_completion(completion, self.local_name(), None);
                }
                Ok(completion) => {
                    warn!(error = ?completion.error, "local vision returned empty response");
                }
                Err(e) => {
                    warn!(error = %e, "local vision failed");
                }
            }
        }

        info!("no local vision available, using text-only remote fallback");
        let fallback = format!(
            "{text}\n\n[Note: An image was provided but the vision model is not available. \
             Please respond based on the text prompt only.]"
        );
        self.use_remote(&fallback, max_tokens, temperature).await
    }

    /// Routing and cache statistics.
    pub fn stats(&self) -> (RouterStats, crate::cache::CacheStats) {
        let stats = self.stats.read().expect("router stats lock poisoned").clone();
        (stats, self.cache.stats())
    }

    // ── Provider paths ──────────────────────────────────────────────

    fn local_name(&self) -> &str {
        self.local.as_ref().map(|p| p.name()).unwrap_or("local")
    }

    async fn use_local(
        &self,
        local: &dyn CompletionProvider,
        rendered: &str,
        max_tokens: u32,
        temperature: f64,
        use_reasoning: bool,
    ) -> Completion {
        // Qwen-style soft switch: suppress chain-of-thought for tasks that
        // don't need it (greetings, arithmetic), avoiding think-only output.
        let prompt_text = if use_reasoning {
            rendered.to_string()
        } else {
            format!("{rendered} /no_think")
        };

        let request = CompletionRequest::new(prompt_text)
            .with_max_tokens(max_tokens)
            .with_temperature(temperature);

        match local.complete(&request).await {
            Ok(mut completion) => {
                completion.text = strip_reasoning_blocks(&completion.text);
                completion.cost_usd = 0.0;
                completion
            }
            Err(e) => {
                warn!(error = %e, "local model failed");
                Completion::failure(self.local_name(), e.to_string())
            }
        }
    }

    async fn use_remote(
        &self,
        rendered: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> RoutedCompletion {
        // Budget gate before any paid call.
        let check = self.ledger.check(REMOTE_CALL_ESTIMATE_USD);
        if !check.permitted {
            let message = format!(
                "budget hard stop: ${:.2} of ${:.2} daily spent ({}); remote calls blocked",
                check.daily_spent, check.daily_limit, check.reason
            );
            warn!("{message}");
            return RoutedCompletion::blocked(message);
        }

        let request = CompletionRequest::new(rendered)
            .with_max_tokens(max_tokens)
            .with_temperature(temperature);

        match self.remote.complete(&request).await {
            Ok(completion) => {
                self.ledger.record(
                    self.remote.name(),
                    &completion.model,
                    completion.input_tokens,
                    completion.output_tokens,
                    Some(completion.cost_usd),
                );
                {
                    let mut stats = self.stats.write().expect("router stats lock poisoned");
                    stats.remote_used += 1;
                    stats.total_cost_usd += completion.cost_usd;
                }
                info!(
                    cost_usd = completion.cost_usd,
                    model = %completion.model,
                    "remote completion"
                );
                RoutedCompletion::from_completion(completion, self.remote.name(), None)
            }
            Err(e) => {
                warn!(error = %e, "remote provider failed");
                RoutedCompletion::from_completion(
                    Completion::failure(self.remote.name(), e.to_string()),
                    self.remote.name(),
                    None,
                )
            }
        }
    }

    fn note_local_use(&self) {
        self.stats.write().expect("router stats lock poisoned").local_used += 1;
    }

    fn budget_warning_reached(&self) -> bool {
        let check = self.ledger.check(0.0);
        check.daily_limit > 0.0
            && check.daily_spent / check.daily_limit >= self.budget_warning_fraction
    }
}

// ── Heuristics ──────────────────────────────────────────────────────────

const COMPLEX_KEYWORDS: &[&str] = &[
    "analyze",
    "compare",
    "evaluate",
    "explain why",
    "in detail",
    "step by step",
    "comprehensive",
    "detailed analysis",
];

const SIMPLE_KEYWORDS: &[&str] = &[
    "what is",
    "what's",
    "who is",
    "who are",
    "when was",
    "where is",
    "how many",
    "calculate",
    "define",
    "hello",
    "hi ",
    "hey ",
    "your name",
    "who are you",
    "what can you do",
];

const WEB_SEARCH_KEYWORDS: &[&str] = &[
    "current",
    "today",
    "now",
    "latest",
    "recent",
    "weather",
    "news",
    "stock price",
    "spot price",
    "price of",
    "market price",
    "commodity",
    "score",
    "what happened",
    "what's happening",
    "headline",
    "bitcoin",
    "crypto",
    "forex",
    "exchange rate",
];

const UNCERTAINTY_PHRASES: &[&str] = &[
    "i'm not sure",
    "i don't know",
    "maybe",
    "possibly",
    "it's unclear",
    "uncertain",
    "perhaps",
];

/// Classify the user's turn as simple, medium, or complex.
///
/// Word count decides the extremes (< 10 simple, > 50 complex); keyword
/// sets settle the middle band, with complex keywords winning.
pub fn classify_complexity(user: &str) -> Complexity {
    let lower = user.to_lowercase();
    let words = user.split_whitespace().count();

    if words < 10 {
        return Complexity::Simple;
    }
    if words > 50 {
        return Complexity::Complex;
    }
    if COMPLEX_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return Complexity::Complex;
    }
    if SIMPLE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return Complexity::Simple;
    }
    Complexity::Medium
}

/// True when the user's turn likely needs current/live data.
pub fn needs_web_search(user: &str) -> bool {
    let lower = user.to_lowercase();
    WEB_SEARCH_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Estimate confidence in a local response, in `0.0..=1.0`.
///
/// Short direct answers score high; empty, rambling, or hedged answers
/// score low. Slow generation costs a little.
pub fn estimate_confidence(response: &Completion) -> f32 {
    if !response.success {
        return 0.0;
    }

    let text = response.text.trim();
    if text.is_empty() {
        return 0.3;
    }

    let lower = text.to_lowercase();
    let word_count = text.split_whitespace().count();
    let hedged = UNCERTAINTY_PHRASES.iter().any(|p| lower.contains(p));

    // Single-word or tiny answers ("4", "Paris") are usually exactly what
    // a short factual prompt asked for.
    if text.len() < 20 && word_count <= 3 && !hedged {
        return 0.85;
    }

    let mut confidence: f32 = 0.7;
    if word_count < 20 {
        confidence += 0.1;
    } else if word_count > 100 {
        confidence -= 0.1;
    }
    if hedged {
        confidence -= 0.2;
    }
    if response.duration_ms > 10_000 {
        confidence -= 0.1;
    }
    confidence.clamp(0.0, 1.0)
}
