//! Web search against a configurable search API endpoint.
//!
//! Sends `GET <endpoint>?q=<query>&limit=<n>` and returns the parsed
//! results. When no endpoint is configured the tool answers with a
//! descriptive unconfigured message instead of erroring, so plans can
//! adapt rather than die.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use archi_core::tools::{Tool, ToolError};

/// Search tool backed by a SearxNG-style JSON endpoint.
pub struct WebSearchTool {
    http: reqwest::Client,
    endpoint: Option<String>,
}

impl WebSearchTool {
    /// `endpoint = None` leaves the tool in unconfigured mode.
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns result titles, URLs, and snippets."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The search query"},
                "num_results": {"type": "integer", "description": "Maximum results (default 5)"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: query".into()))?;
        let num_results = args
            .get("num_results")
            .and_then(Value::as_u64)
            .unwrap_or(5);

        let Some(ref endpoint) = self.endpoint else {
            return Ok(json!({
                "query": query,
                "results": [],
                "message": "web search not configured; set tools.web_search.endpoint",
            }));
        };

        debug!(query = %query, num_results, "executing web search");
        let response = self
            .http
            .get(endpoint)
            .query(&[
                ("q", query.to_string()),
                ("limit", num_results.to_string()),
                ("format", "json".to_string()),
            ])
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("search request failed: {e}")))?;

        if response.status().as_u16() >= 400 {
            return Err(ToolError::ExecutionFailed(format!(
                "search API returned status {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("unparseable search response: {e}")))?;
        let results = simplify_results(&body, num_results as usize);

        Ok(json!({"query": query, "results": results}))
    }
}

/// Pull `{title, url, snippet}` triples out of a SearxNG-style response.
fn simplify_results(body: &Value, limit: usize) -> Vec<Value> {
    let Some(items) = body.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .take(limit)
        .map(|item| {
            json!({
                "title": item.get("title").and_then(Value::as_str).unwrap_or(""),
                "url": item.get("url").and_then(Value::as_str).unwrap_or(""),
                "snippet": item.get("content")
                    .or_else(|| item.get("snippet"))
                    .and_then(Value::as_str)
                    .unwrap_or(""),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_endpoint_reports_gracefully() {
        let tool = WebSearchTool::new(None);
        let result = tool.execute(json!({"query": "rust"})).await.unwrap();
        assert_eq!(result["query"], "rust");
        assert!(result["message"].as_str().unwrap().contains("not configured"));
    }

    #[tokio::test]
    async fn missing_query_rejected() {
        let tool = WebSearchTool::new(None);
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }

    #[test]
    fn simplify_extracts_expected_fields() {
        let body = json!({
            "results": [
                {"title": "Rust", "url": "https://rust-lang.org", "content": "A language"},
                {"title": "Crates", "url": "https://crates.io", "snippet": "Registry"},
                {"title": "Extra", "url": "https://example.com", "content": "dropped by limit"}
            ]
        });
        let results = simplify_results(&body, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["title"], "Rust");
        assert_eq!(results[0]["snippet"], "A language");
        assert_eq!(results[1]["snippet"], "Registry");
    }

    #[test]
    fn simplify_handles_missing_results_key() {
        assert!(simplify_results(&json!({"other": 1}), 5).is_empty());
    }
}
