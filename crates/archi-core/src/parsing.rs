//! Deterministic parsing of LLM output.
//!
//! Models return JSON wrapped in prose, markdown fences, or reasoning
//! scratchpads. This module centralizes the cleanup so every parse and
//! persistence boundary applies the same rules:
//!
//! 1. Strip `<think>...</think>` scratchpad blocks.
//! 2. Try the text as bare JSON.
//! 3. Try the contents of the first fenced code block.
//! 4. Try the first balanced `{...}` / `[...]` span.
//! 5. For arrays only, optionally fall back to a numbered/bulleted prose
//!    list (string items).

use serde_json::Value;

/// Remove `<think>...</think>` blocks that reasoning models emit.
///
/// An unterminated `<think>` swallows the rest of the text (the model
/// never left its scratchpad). Stray closing tags are dropped.
pub fn strip_reasoning_blocks(text: &str) -> String {
    if !text.contains("<think>") {
        return text.replace("</think>", "").trim().to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end_rel) => rest = &rest[start + end_rel + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.replace("</think>", "").trim().to_string()
}

/// Extract a JSON object from model output.
///
/// Returns `None` when no parseable object is found.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let cleaned = strip_reasoning_blocks(text);
    extract_json(&cleaned, '{', '}').filter(Value::is_object)
}

/// Extract a JSON array from model output.
///
/// With `allow_prose_fallback`, a numbered (`1. x`) or bulleted (`- x`)
/// list is parsed into a string array when no JSON is found. Returns an
/// empty vec when nothing matches (prose responses are not an error).
pub fn extract_json_array(text: &str, allow_prose_fallback: bool) -> Vec<Value> {
    let cleaned = strip_reasoning_blocks(text);
    if cleaned.is_empty() {
        return Vec::new();
    }

    if let Some(Value::Array(items)) = extract_json(&cleaned, '[', ']') {
        return items;
    }

    if allow_prose_fallback {
        return parse_prose_list(&cleaned)
            .into_iter()
            .map(Value::String)
            .collect();
    }
    Vec::new()
}

/// Shared extraction ladder: bare parse, fenced block, balanced span.
fn extract_json(text: &str, open: char, close: char) -> Option<Value> {
    // 1. Bare JSON.
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if starts_with_delim(&value, open) {
            return Some(value);
        }
    }

    // 2. First fenced code block.
    if let Some(inner) = fenced_block(text) {
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            if starts_with_delim(&value, open) {
                return Some(value);
            }
        }
    }

    // 3. First balanced span.
    if let Some(span) = balanced_span(text, open, close) {
        if let Ok(value) = serde_json::from_str::<Value>(span) {
            return Some(value);
        }
    }

    None
}

fn starts_with_delim(value: &Value, open: char) -> bool {
    match open {
        '{' => value.is_object(),
        '[' => value.is_array(),
        _ => false,
    }
}

/// Contents of the first ``` or ```json fenced block, if any.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag up to the first newline.
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// The first balanced `open..close` span, respecting string literals.
fn balanced_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        let c = b as char;
        if escape_next {
            escape_next = false;
            continue;
        }
        if in_string {
            match c {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse `1. item` / `2) item` / `- item` / `* item` lines into strings.
fn parse_prose_list(text: &str) -> Vec<String> {
    let mut numbered = Vec::new();
    let mut bulleted = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(item) = strip_number_prefix(trimmed) {
            numbered.push(item.to_string());
        } else if let Some(item) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
        {
            bulleted.push(item.trim().to_string());
        }
    }

    if !numbered.is_empty() { numbered } else { bulleted }
}

/// Strip a leading `<digits>.` or `<digits>)` marker.
fn strip_number_prefix(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix('.')
        .or_else(|| rest.strip_prefix(')'))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── Reasoning block stripping ───────────────────────────────────

    #[test]
    fn strips_think_blocks() {
        let text = "<think>hmm, let me reason</think>{\"action\": \"done\"}";
        assert_eq!(strip_reasoning_blocks(text), "{\"action\": \"done\"}");
    }

    #[test]
    fn strips_multiple_think_blocks() {
        let text = "<think>a</think>first<think>b</think> second";
        assert_eq!(strip_reasoning_blocks(text), "first second");
    }

    #[test]
    fn unterminated_think_swallows_tail() {
        let text = "answer<think>never closed reasoning";
        assert_eq!(strip_reasoning_blocks(text), "answer");
    }

    #[test]
    fn stray_closing_tag_removed() {
        let text = "</think>the answer";
        assert_eq!(strip_reasoning_blocks(text), "the answer");
    }

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(strip_reasoning_blocks("  hello  "), "hello");
    }

    // ── Object extraction ───────────────────────────────────────────

    #[test]
    fn bare_object_parses() {
        let value = extract_json_object(r#"{"action": "think", "arguments": {}}"#).unwrap();
        assert_eq!(value["action"], "think");
    }

    #[test]
    fn fenced_object_parses() {
        let text = "Here is the plan:\n```json\n{\"action\": \"done\"}\n```\nThanks!";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["action"], "done");
    }

    #[test]
    fn fenced_without_language_tag() {
        let text = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json_object(text).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn embedded_object_found_by_balance() {
        let text = "I will now do this: {\"action\": \"web_search\", \"arguments\": {\"query\": \"rust {braces}\"}} as requested";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["action"], "web_search");
        assert_eq!(value["arguments"]["query"], "rust {braces}");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_balance() {
        let text = r#"{"msg": "a } brace and a \" quote", "n": 1}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn object_after_think_block() {
        let text = "<think>I should finish</think>\n{\"action\": \"done\", \"arguments\": {\"summary\": \"ok\"}}";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["action"], "done");
    }

    #[test]
    fn no_object_returns_none() {
        assert!(extract_json_object("just prose, no json here").is_none());
        assert!(extract_json_object("").is_none());
        assert!(extract_json_object("[1, 2, 3]").is_none());
    }

    #[test]
    fn unbalanced_object_returns_none() {
        assert!(extract_json_object(r#"{"action": "done""#).is_none());
    }

    // ── Array extraction ────────────────────────────────────────────

    #[test]
    fn bare_array_parses() {
        let items = extract_json_array(r#"[{"description": "a"}, {"description": "b"}]"#, false);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn fenced_array_parses() {
        let text = "Tasks:\n```json\n[{\"description\": \"only\"}]\n```";
        let items = extract_json_array(text, false);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["description"], "only");
    }

    #[test]
    fn embedded_array_found_by_balance() {
        let text = "The tasks are [\"one\", \"two\"] as listed.";
        let items = extract_json_array(text, false);
        assert_eq!(items, vec![json!("one"), json!("two")]);
    }

    #[test]
    fn prose_fallback_numbered() {
        let text = "Suggested next steps:\n1. Research the topic\n2. Write the draft\n3) Review it";
        let items = extract_json_array(text, true);
        assert_eq!(
            items,
            vec![
                json!("Research the topic"),
                json!("Write the draft"),
                json!("Review it")
            ]
        );
    }

    #[test]
    fn prose_fallback_bulleted() {
        let text = "- alpha\n* beta";
        let items = extract_json_array(text, true);
        assert_eq!(items, vec![json!("alpha"), json!("beta")]);
    }

    #[test]
    fn prose_fallback_disabled_returns_empty() {
        let text = "1. would be an item";
        assert!(extract_json_array(text, false).is_empty());
    }

    #[test]
    fn pure_prose_returns_empty_not_error() {
        assert!(extract_json_array("I cannot produce a list.", true).is_empty());
    }

    #[test]
    fn array_inside_think_is_ignored() {
        let text = "<think>[\"not\", \"this\"]</think>[\"this\", \"one\"]";
        let items = extract_json_array(text, false);
        assert_eq!(items, vec![json!("this"), json!("one")]);
    }
}
