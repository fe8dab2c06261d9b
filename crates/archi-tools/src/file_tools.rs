//! File tools for structured trigger actions.
//!
//! Reads and listings resolve inside the project root; writes resolve
//! inside the workspace root. Path escapes surface as
//! [`ToolError::InvalidPath`] before any filesystem access.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use archi_core::paths::resolve_within;
use archi_core::tools::{Tool, ToolError};

/// Cap on content returned from `read_file`.
const READ_CHAR_LIMIT: usize = 16_000;

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArgs(format!("missing required field: {key}")))
}

fn path_schema(extra: &[(&str, &str)]) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert(
        "path".into(),
        json!({"type": "string", "description": "File path relative to the allowed root"}),
    );
    for (name, description) in extra {
        properties.insert(
            (*name).into(),
            json!({"type": "string", "description": description}),
        );
    }
    json!({"type": "object", "properties": properties, "required": ["path"]})
}

// ── read_file ───────────────────────────────────────────────────────────

/// Read any file within the project root.
pub struct ReadFileTool {
    project_root: PathBuf,
}

impl ReadFileTool {
    pub fn new(project_root: PathBuf) -> Self {
        Self { project_root }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the project. Returns its content as text."
    }

    fn parameters(&self) -> Value {
        path_schema(&[])
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let path = required_str(&args, "path")?;
        let full = resolve_within(&self.project_root, path.trim_start_matches('/'))
            .map_err(|e| ToolError::InvalidPath(e.to_string()))?;
        debug!(path = %full.display(), "reading file");

        let content = std::fs::read_to_string(&full)
            .map_err(|e| ToolError::ExecutionFailed(format!("read failed: {e}")))?;
        let truncated = content.len() > READ_CHAR_LIMIT;
        let content = if truncated {
            let mut end = READ_CHAR_LIMIT;
            while !content.is_char_boundary(end) {
                end -= 1;
            }
            content[..end].to_string()
        } else {
            content
        };

        Ok(json!({
            "path": path,
            "content": content,
            "truncated": truncated,
        }))
    }
}

// ── list_files ──────────────────────────────────────────────────────────

/// List a directory within the project root.
pub struct ListFilesTool {
    project_root: PathBuf,
}

impl ListFilesTool {
    pub fn new(project_root: PathBuf) -> Self {
        Self { project_root }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the entries of a project directory."
    }

    fn parameters(&self) -> Value {
        path_schema(&[])
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let full = resolve_within(&self.project_root, path.trim_start_matches('/'))
            .map_err(|e| ToolError::InvalidPath(e.to_string()))?;

        let entries = std::fs::read_dir(&full)
            .map_err(|e| ToolError::ExecutionFailed(format!("list failed: {e}")))?;
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        names.sort();

        Ok(json!({"path": path, "entries": names}))
    }
}

// ── create_file / append_file ───────────────────────────────────────────

/// Write a new file (or replace one) inside the workspace.
pub struct CreateFileTool {
    workspace_root: PathBuf,
}

impl CreateFileTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file in the workspace."
    }

    fn parameters(&self) -> Value {
        path_schema(&[("content", "Text content to write")])
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let path = required_str(&args, "path")?;
        let content = args.get("content").and_then(Value::as_str).unwrap_or("");
        let full = workspace_path(&self.workspace_root, path)?;

        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ToolError::ExecutionFailed(format!("mkdir failed: {e}")))?;
        }
        std::fs::write(&full, content)
            .map_err(|e| ToolError::ExecutionFailed(format!("write failed: {e}")))?;

        Ok(json!({"path": path, "bytes_written": content.len()}))
    }
}

/// Append to a workspace file, creating it if needed.
pub struct AppendFileTool {
    workspace_root: PathBuf,
}

impl AppendFileTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for AppendFileTool {
    fn name(&self) -> &str {
        "append_file"
    }

    fn description(&self) -> &str {
        "Append text to a workspace file, creating it if it does not exist."
    }

    fn parameters(&self) -> Value {
        path_schema(&[("content", "Text content to append")])
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        use std::io::Write;

        let path = required_str(&args, "path")?;
        let content = args.get("content").and_then(Value::as_str).unwrap_or("");
        let full = workspace_path(&self.workspace_root, path)?;

        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ToolError::ExecutionFailed(format!("mkdir failed: {e}")))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .map_err(|e| ToolError::ExecutionFailed(format!("open failed: {e}")))?;
        file.write_all(content.as_bytes())
            .map_err(|e| ToolError::ExecutionFailed(format!("append failed: {e}")))?;

        Ok(json!({"path": path, "bytes_appended": content.len()}))
    }
}

fn workspace_path(workspace_root: &std::path::Path, raw: &str) -> Result<PathBuf, ToolError> {
    let relative = raw.trim_start_matches('/').trim_start_matches("workspace/");
    resolve_within(workspace_root, relative).map_err(|e| ToolError::InvalidPath(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dirs {
        _root: tempfile::TempDir,
        project: PathBuf,
        workspace: PathBuf,
    }

    fn dirs() -> Dirs {
        let root = tempfile::tempdir().unwrap();
        let project = root.path().to_path_buf();
        let workspace = project.join("workspace");
        std::fs::create_dir_all(&workspace).unwrap();
        Dirs {
            _root: root,
            project,
            workspace,
        }
    }

    #[tokio::test]
    async fn create_then_read_roundtrip() {
        let d = dirs();
        let create = CreateFileTool::new(d.workspace.clone());
        let read = ReadFileTool::new(d.project.clone());

        create
            .execute(json!({"path": "notes/today.md", "content": "remember the milk"}))
            .await
            .unwrap();

        let result = read
            .execute(json!({"path": "workspace/notes/today.md"}))
            .await
            .unwrap();
        assert_eq!(result["content"], "remember the milk");
        assert_eq!(result["truncated"], false);
    }

    #[tokio::test]
    async fn append_accumulates() {
        let d = dirs();
        let append = AppendFileTool::new(d.workspace.clone());
        append
            .execute(json!({"path": "log.txt", "content": "one\n"}))
            .await
            .unwrap();
        append
            .execute(json!({"path": "log.txt", "content": "two\n"}))
            .await
            .unwrap();

        let content = std::fs::read_to_string(d.workspace.join("log.txt")).unwrap();
        assert_eq!(content, "one\ntwo\n");
    }

    #[tokio::test]
    async fn workspace_prefix_is_accepted() {
        let d = dirs();
        let create = CreateFileTool::new(d.workspace.clone());
        create
            .execute(json!({"path": "workspace/report.md", "content": "x"}))
            .await
            .unwrap();
        assert!(d.workspace.join("report.md").exists());
    }

    #[tokio::test]
    async fn write_escape_is_rejected() {
        let d = dirs();
        let create = CreateFileTool::new(d.workspace.clone());
        let err = create
            .execute(json!({"path": "../outside.txt", "content": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidPath(_)));
        assert!(!d.project.join("outside.txt").exists());
    }

    #[tokio::test]
    async fn read_escape_is_rejected() {
        let d = dirs();
        let read = ReadFileTool::new(d.project.clone());
        let err = read
            .execute(json!({"path": "../../etc/passwd"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn list_marks_directories() {
        let d = dirs();
        std::fs::write(d.project.join("file.txt"), "x").unwrap();

        let list = ListFilesTool::new(d.project.clone());
        let result = list.execute(json!({"path": "."})).await.unwrap();
        let entries: Vec<String> = result["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert!(entries.contains(&"file.txt".to_string()));
        assert!(entries.contains(&"workspace/".to_string()));
    }

    #[tokio::test]
    async fn missing_path_argument_errors() {
        let d = dirs();
        let read = ReadFileTool::new(d.project.clone());
        let err = read.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }
}
