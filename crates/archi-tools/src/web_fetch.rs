//! Webpage fetch with readable-text extraction.
//!
//! Fetches a URL and reduces the HTML to plain text the planner can read:
//! script and style blocks removed, tags stripped, common entities
//! decoded, whitespace collapsed, and the result truncated to a character
//! budget.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use tracing::debug;

use archi_core::tools::{Tool, ToolError};

/// Cap on extracted text returned to the caller.
const MAX_TEXT_CHARS: usize = 5000;
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Fetch a URL and return readable text content.
pub struct FetchWebpageTool {
    http: reqwest::Client,
}

impl FetchWebpageTool {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for FetchWebpageTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchWebpageTool {
    fn name(&self) -> &str {
        "fetch_webpage"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its readable text content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "The URL to fetch"},
                "max_chars": {"type": "integer", "description": "Optional character limit"}
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: url".into()))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidArgs(
                "url must start with http:// or https://".into(),
            ));
        }
        let max_chars = args
            .get("max_chars")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(MAX_TEXT_CHARS);

        debug!(url = %url, "fetching webpage");
        let response = self
            .http
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml,*/*")
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("fetch failed: {e}")))?;
        let status = response.status().as_u16();
        let html = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("body read failed: {e}")))?;

        let text = extract_readable_text(&html, max_chars);
        Ok(json!({
            "url": url,
            "status": status,
            "text": text,
        }))
    }
}

/// Reduce HTML to readable plain text, bounded by `max_chars`.
pub fn extract_readable_text(html: &str, max_chars: usize) -> String {
    static SCRIPT: OnceLock<Regex> = OnceLock::new();
    static STYLE: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    static SPACE: OnceLock<Regex> = OnceLock::new();

    let script = SCRIPT.get_or_init(|| {
        Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("static regex")
    });
    let style =
        STYLE.get_or_init(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("static regex"));
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]+>").expect("static regex"));
    let space = SPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"));

    let text = script.replace_all(html, "");
    let text = style.replace_all(&text, "");
    let text = tag.replace_all(&text, " ");
    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    let text = space.replace_all(&text, " ");
    let text = text.trim();

    if text.len() <= max_chars {
        return text.to_string();
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
