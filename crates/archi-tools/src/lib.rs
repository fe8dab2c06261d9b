//! # archi-tools
//!
//! Tool implementations registered into the core [`ToolRegistry`]:
//! workspace/project file operations for trigger actions, web fetch with
//! readable-text extraction, endpoint-backed web search, and a python
//! snippet runner.
//!
//! The plan executor has its own built-in file action family (with
//! source-write safety); the registry variants here serve structured
//! trigger actions arriving through the agent loop and interaction
//! sources.

pub mod file_tools;
pub mod python_tool;
pub mod web_fetch;
pub mod web_search;

use std::path::PathBuf;
use std::sync::Arc;

use archi_core::tools::ToolRegistry;

pub use file_tools::{AppendFileTool, CreateFileTool, ListFilesTool, ReadFileTool};
pub use python_tool::RunPythonTool;
pub use web_fetch::FetchWebpageTool;
pub use web_search::WebSearchTool;

/// Build a registry with the default tool set.
///
/// `search_endpoint` is the optional search API base URL; without it the
/// `web_search` tool reports itself unconfigured instead of failing.
pub fn default_registry(
    project_root: PathBuf,
    search_endpoint: Option<String>,
) -> ToolRegistry {
    let workspace_root = project_root.join("workspace");
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ReadFileTool::new(project_root.clone())));
    registry.register(Arc::new(ListFilesTool::new(project_root)));
    registry.register(Arc::new(CreateFileTool::new(workspace_root.clone())));
    registry.register(Arc::new(AppendFileTool::new(workspace_root)));
    registry.register(Arc::new(FetchWebpageTool::new()));
    registry.register(Arc::new(WebSearchTool::new(search_endpoint)));
    registry.register(Arc::new(RunPythonTool::new()));
    registry
}
