//! Completion result and routed-prompt types.
//!
//! [`Completion`] is the typed result every provider returns: failures are
//! carried in-band (`success = false` plus an error string) so component
//! boundaries exchange results, not panics.
//!
//! [`Prompt`] keeps the system scaffold, conversation history, and the
//! user's turn separate. The router classifies `user` directly instead of
//! re-extracting it from concatenated text.

use serde::{Deserialize, Serialize};

/// One turn of prior conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// A structured prompt: system scaffold, history, and the current user turn.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Prompt {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    /// The user's actual request. Complexity classification and web-search
    /// detection read only this field.
    pub user: String,
}

impl Prompt {
    /// A bare prompt with no scaffold: the whole string is the user turn.
    pub fn from_user(user: impl Into<String>) -> Self {
        Self {
            system: None,
            history: Vec::new(),
            user: user.into(),
        }
    }

    /// Render the canonical flat text sent to providers and fingerprinted
    /// by the cache. Deterministic: identical prompts render identically.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(ref system) = self.system {
            out.push_str(system);
            out.push_str("\n\n");
        }
        for turn in &self.history {
            let label = if turn.role == "assistant" { "Archi" } else { "User" };
            out.push_str(label);
            out.push_str(": ");
            out.push_str(&turn.content);
            out.push('\n');
        }
        out.push_str("User: ");
        out.push_str(&self.user);
        out
    }
}

impl From<&str> for Prompt {
    fn from(user: &str) -> Self {
        Prompt::from_user(user)
    }
}

impl From<String> for Prompt {
    fn from(user: String) -> Self {
        Prompt::from_user(user)
    }
}

/// Typed result of a completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text; empty on failure.
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    /// Actual cost of this call in USD; 0 for local inference.
    pub cost_usd: f64,
    /// Model identifier that produced (or refused) the response.
    pub model: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl Completion {
    /// A failed completion carrying an error string and zero cost.
    pub fn failure(model: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
            cost_usd: 0.0,
            model: model.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Routing directives supplied by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouteFlags {
    /// Try the local model first and keep its answer; never escalate.
    #[serde(default)]
    pub prefer_local: bool,
    /// Skip the local model entirely.
    #[serde(default)]
    pub force_remote: bool,
    /// Caller already injected search results; do not detect search need.
    #[serde(default)]
    pub skip_web_search: bool,
    /// Allow the local model's chain-of-thought mode.
    #[serde(default = "default_use_reasoning")]
    pub use_reasoning: bool,
}

fn default_use_reasoning() -> bool {
    true
}

impl Default for RouteFlags {
    fn default() -> Self {
        Self {
            prefer_local: false,
            force_remote: false,
            skip_web_search: false,
            use_reasoning: true,
        }
    }
}
