//! Python snippet runner.
//!
//! Executes short python snippets via `python3 -c` with a hard timeout
//! and captured output. Used by plans to test ideas and crunch data; the
//! snippet inherits no stdin and runs in the project working directory.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use archi_core::tools::{Tool, ToolError};

const RUN_TIMEOUT_SECS: u64 = 30;
/// Cap on captured stdout/stderr returned to the caller.
const OUTPUT_CHAR_LIMIT: usize = 8000;

/// Run a python snippet and capture its output.
pub struct RunPythonTool {
    timeout: Duration,
}

impl RunPythonTool {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(RUN_TIMEOUT_SECS),
        }
    }

    /// Override the timeout (tests).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for RunPythonTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for RunPythonTool {
    fn name(&self) -> &str {
        "run_python"
    }

    fn description(&self) -> &str {
        "Run a short python snippet and return its stdout/stderr."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "Python source to execute"}
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let code = args
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: code".into()))?;

        debug!(code_chars = code.len(), "running python snippet");
        let child = tokio::process::Command::new("python3")
            .arg("-c")
            .arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed(format!("python3 not runnable: {e}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| ToolError::ExecutionFailed(format!("wait failed: {e}")))?;

        Ok(json!({
            "success": output.status.success(),
            "exit_code": output.status.code(),
            "stdout": clamp(&String::from_utf8_lossy(&output.stdout)),
            "stderr": clamp(&String::from_utf8_lossy(&output.stderr)),
        }))
    }
}

fn clamp(text: &str) -> String {
    if text.len() <= OUTPUT_CHAR_LIMIT {
        return text.to_string();
    }
    let mut end = OUTPUT_CHAR_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let tool = RunPythonTool::new();
        let result = tool
            .execute(json!({"code": "print(2 + 2)"}))
            .await
            .unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["stdout"].as_str().unwrap().trim(), "4");
    }

    #[tokio::test]
    async fn nonzero_exit_reported_not_raised() {
        let tool = RunPythonTool::new();
        let result = tool
            .execute(json!({"code": "import sys; sys.exit(3)"}))
            .await
            .unwrap();
        assert_eq!(result["success"], false);
        assert_eq!(result["exit_code"], 3);
    }

    #[tokio::test]
    async fn stderr_captured_on_exception() {
        let tool = RunPythonTool::new();
        let result = tool
            .execute(json!({"code": "raise ValueError('boom')"}))
            .await
            .unwrap();
        assert_eq!(result["success"], false);
        assert!(result["stderr"].as_str().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn runaway_snippet_times_out() {
        let tool = RunPythonTool::new().with_timeout(Duration::from_millis(300));
        let err = tool
            .execute(json!({"code": "import time; time.sleep(30)"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_code_rejected() {
        let tool = RunPythonTool::new();
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }
}
