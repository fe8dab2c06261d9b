//! Plan executor: multi-step autonomous task execution.
//!
//! Instead of the single-shot "ask model, get answer" pattern, the
//! executor runs a bounded reasoning loop:
//!
//! 1. Ask the planner for the next action as a structured JSON object.
//! 2. Dispatch it -- built-in file/control actions or the tool registry.
//! 3. Record the result and persist execution state.
//! 4. Loop until `done`, the step limit, or a hard-fatal result.
//!
//! Execution state persists after every step, so a crash resumes at the
//! next unexecuted step rather than re-running history. After completion
//! an optional verification pass re-reads created files and has the
//! planner judge them.
//!
//! Safety perimeter: workspace actions resolve inside the workspace root,
//! project reads inside the project root, and protected paths are never
//! written regardless of other authorization. Workspace writes and
//! source-modification writes are separate action families; neither path
//! resolver implies the other.

pub mod source;
pub mod state;

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use archi_llm::{CompletionProvider, CompletionRequest};
use archi_types::Task;
use archi_types::config::ExecutorConfig;

use crate::parsing::{extract_json_object, strip_reasoning_blocks};
use crate::paths::resolve_within;
use crate::tools::ToolRegistry;

use source::{
    backup_file, check_protected, git_checkpoint, git_rollback, restore_backup, syntax_check,
};
use state::{PlanState, StepRecord};

const PLAN_MAX_TOKENS: u32 = 1000;
const VERIFY_MAX_TOKENS: u32 = 400;
/// Abort after this many consecutive unparseable planner responses.
const MAX_PARSE_FAILURES: u32 = 3;
/// Cap on file content returned to the planner.
const READ_CHAR_LIMIT: usize = 8000;

/// Emitted after every executed step for UI surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub task_id: String,
    pub step: usize,
    pub max_steps: usize,
    pub status: String,
}

/// Final result of one task execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskOutcome {
    pub completed: bool,
    pub steps_executed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files_created: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True when user activity interrupted the run at a step boundary.
    /// The task keeps its persisted state and resumes in a later cycle.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,
}

impl TaskOutcome {
    /// Result payload stored on the task.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({"completed": self.completed}))
    }
}

/// Multi-step reasoning loop bound to a workspace and project root.
pub struct PlanExecutor {
    config: ExecutorConfig,
    project_root: PathBuf,
    workspace_root: PathBuf,
    data_dir: PathBuf,
    verify_outputs: bool,
}

impl PlanExecutor {
    pub fn new(config: ExecutorConfig, project_root: PathBuf, data_dir: PathBuf) -> Self {
        let workspace_root = project_root.join("workspace");
        Self {
            config,
            project_root,
            workspace_root,
            data_dir,
            verify_outputs: false,
        }
    }

    /// Enable the post-completion verification pass.
    pub fn with_verification(mut self) -> Self {
        self.verify_outputs = true;
        self
    }

    /// Execute one task to completion (or failure).
    pub async fn execute(
        &self,
        task: &Task,
        goal_description: &str,
        planner: &dyn CompletionProvider,
        tools: &ToolRegistry,
        progress: Option<&mpsc::UnboundedSender<ProgressEvent>>,
        cancel: Option<&CancellationToken>,
    ) -> TaskOutcome {
        let max_steps = self.step_limit(&task.description);
        let mut plan = PlanState::load_or_new(
            &self.data_dir,
            &task.task_id,
            self.config.state_max_age_hours,
        );
        let mut outcome = TaskOutcome {
            files_created: files_from_history(&plan),
            ..Default::default()
        };
        let mut parse_failures = 0u32;

        info!(
            task_id = %task.task_id,
            description = %task.description,
            resume_step = plan.current_step,
            max_steps,
            "executing task"
        );

        while plan.current_step < max_steps {
            // Interruption is observed between steps only; a step that has
            // started always completes and persists.
            if let Some(cancel) = cancel
                && cancel.is_cancelled()
            {
                info!(task_id = %task.task_id, "execution interrupted at step boundary");
                outcome.interrupted = true;
                break;
            }

            let prompt = self.planning_prompt(task, goal_description, tools, &plan, max_steps);
            let request = CompletionRequest::new(prompt).with_max_tokens(PLAN_MAX_TOKENS);

            let response = match planner.complete(&request).await {
                Ok(response) if response.success => response,
                Ok(response) => {
                    outcome.error =
                        Some(response.error.unwrap_or_else(|| "planner failed".into()));
                    break;
                }
                Err(e) => {
                    outcome.error = Some(format!("planner error: {e}"));
                    break;
                }
            };

            let text = strip_reasoning_blocks(&response.text);
            let Some(parsed) = extract_json_object(&text) else {
                parse_failures += 1;
                warn!(
                    task_id = %task.task_id,
                    parse_failures,
                    "unparseable planner response"
                );
                plan.push_step(
                    &self.data_dir,
                    StepRecord {
                        action: "unparseable".into(),
                        arguments: json!({}),
                        result_summary: truncate(&text, 200),
                        success: false,
                    },
                );
                self.emit(progress, task, &plan, max_steps, "unparseable");
                if parse_failures >= MAX_PARSE_FAILURES {
                    outcome.error = Some("planner kept returning unparseable output".into());
                    break;
                }
                continue;
            };
            parse_failures = 0;

            let action = parsed
                .get("action")
                .and_then(Value::as_str)
                .unwrap_or("think")
                .to_string();
            let args = parsed.get("arguments").cloned().unwrap_or_else(|| json!({}));
            let reasoning = parsed.get("reasoning").and_then(Value::as_str);
            debug!(task_id = %task.task_id, action = %action, "dispatching step");

            if action == "done" {
                outcome.completed = true;
                outcome.summary = args
                    .get("summary")
                    .and_then(Value::as_str)
                    .or(reasoning)
                    .map(str::to_string)
                    .or_else(|| Some("task completed".into()));
                plan.push_step(
                    &self.data_dir,
                    StepRecord {
                        action,
                        arguments: args,
                        result_summary: outcome.summary.clone().unwrap_or_default(),
                        success: true,
                    },
                );
                self.emit(progress, task, &plan, max_steps, "done");
                break;
            }

            let result = self.dispatch(&action, &args, reasoning, tools).await;
            let success = result.get("success").and_then(Value::as_bool).unwrap_or(false);
            if success && matches!(action.as_str(), "create_file" | "append_file" | "write_source")
                && let Some(path) = args.get("path").and_then(Value::as_str)
                && !outcome.files_created.iter().any(|p| p == path)
            {
                outcome.files_created.push(path.to_string());
            }

            plan.push_step(
                &self.data_dir,
                StepRecord {
                    action: action.clone(),
                    arguments: args,
                    result_summary: truncate(&result.to_string(), 300),
                    success,
                },
            );
            self.emit(progress, task, &plan, max_steps, &action);

            if result.get("fatal").and_then(Value::as_bool).unwrap_or(false) {
                outcome.error = Some(
                    result
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("fatal action error")
                        .to_string(),
                );
                break;
            }
        }

        outcome.steps_executed = plan.current_step;
        if !outcome.completed && !outcome.interrupted && outcome.error.is_none() {
            outcome.error = Some(format!("step limit reached ({max_steps}) without completion"));
        }

        if outcome.completed {
            if self.verify_outputs && !outcome.files_created.is_empty() {
                outcome.verification = self.verify_files(task, &outcome.files_created, planner).await;
            }
            plan.discard(&self.data_dir);
        }

        info!(
            task_id = %task.task_id,
            completed = outcome.completed,
            steps = outcome.steps_executed,
            "task execution finished"
        );
        outcome
    }

    fn step_limit(&self, description: &str) -> usize {
        let lower = description.to_lowercase();
        let source_work = ["source", "refactor", "codebase", "self-improvement"]
            .iter()
            .any(|kw| lower.contains(kw));
        if source_work {
            self.config.source_max_steps
        } else {
            self.config.max_steps
        }
    }

    fn emit(
        &self,
        progress: Option<&mpsc::UnboundedSender<ProgressEvent>>,
        task: &Task,
        plan: &PlanState,
        max_steps: usize,
        status: &str,
    ) {
        if let Some(tx) = progress {
            let _ = tx.send(ProgressEvent {
                task_id: task.task_id.clone(),
                step: plan.current_step,
                max_steps,
                status: status.to_string(),
            });
        }
    }

    // ── Action dispatch ─────────────────────────────────────────────

    async fn dispatch(
        &self,
        action: &str,
        args: &Value,
        reasoning: Option<&str>,
        tools: &ToolRegistry,
    ) -> Value {
        match action {
            "think" => json!({
                "success": true,
                "note": args.get("thought").and_then(Value::as_str)
                    .or(reasoning)
                    .unwrap_or("(no reasoning recorded)"),
            }),
            "create_file" => self.workspace_write(args, false),
            "append_file" => self.workspace_write(args, true),
            "read_file" => self.project_read(args),
            "list_files" => self.project_list(args),
            "write_source" => self.write_source(args).await,
            other => tools.execute(other, args.clone()).await,
        }
    }

    /// Workspace file family: paths resolve inside `workspace/` only.
    fn workspace_write(&self, args: &Value, append: bool) -> Value {
        let Some(raw_path) = args.get("path").and_then(Value::as_str) else {
            return json!({"success": false, "error": "missing 'path' argument"});
        };
        let content = args.get("content").and_then(Value::as_str).unwrap_or("");

        let relative = raw_path
            .trim_start_matches('/')
            .trim_start_matches("workspace/");
        let full = match resolve_within(&self.workspace_root, relative) {
            Ok(full) => full,
            Err(e) => return json!({"success": false, "error": e.to_string()}),
        };

        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if append {
                use std::io::Write;
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&full)?;
                file.write_all(content.as_bytes())
            } else {
                std::fs::write(&full, content)
            }
        })();

        match result {
            Ok(()) => json!({
                "success": true,
                "path": raw_path,
                "bytes_written": content.len(),
            }),
            Err(e) => json!({"success": false, "error": e.to_string()}),
        }
    }

    /// Project read family: any file under the project root.
    fn project_read(&self, args: &Value) -> Value {
        let Some(raw_path) = args.get("path").and_then(Value::as_str) else {
            return json!({"success": false, "error": "missing 'path' argument"});
        };
        let full = match resolve_within(&self.project_root, raw_path.trim_start_matches('/')) {
            Ok(full) => full,
            Err(e) => return json!({"success": false, "error": e.to_string()}),
        };
        match std::fs::read_to_string(&full) {
            Ok(content) => json!({
                "success": true,
                "path": raw_path,
                "content": truncate(&content, READ_CHAR_LIMIT),
            }),
            Err(e) => json!({"success": false, "error": e.to_string()}),
        }
    }

    fn project_list(&self, args: &Value) -> Value {
        let raw_path = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let full = match resolve_within(&self.project_root, raw_path.trim_start_matches('/')) {
            Ok(full) => full,
            Err(e) => return json!({"success": false, "error": e.to_string()}),
        };
        match std::fs::read_dir(&full) {
            Ok(entries) => {
                let mut names: Vec<String> = entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect();
                names.sort();
                json!({"success": true, "path": raw_path, "entries": names})
            }
            Err(e) => json!({"success": false, "error": e.to_string()}),
        }
    }

    /// Source-modification family: backup, checkpoint, write, validate,
    /// roll back on validation failure.
    async fn write_source(&self, args: &Value) -> Value {
        let Some(raw_path) = args.get("path").and_then(Value::as_str) else {
            return json!({"success": false, "error": "missing 'path' argument"});
        };
        let Some(content) = args.get("content").and_then(Value::as_str) else {
            return json!({"success": false, "error": "missing 'content' argument"});
        };

        if let Err(e) = check_protected(raw_path) {
            return json!({"success": false, "error": e.to_string()});
        }
        let full = match resolve_within(&self.project_root, raw_path.trim_start_matches('/')) {
            Ok(full) => full,
            Err(e) => return json!({"success": false, "error": e.to_string()}),
        };

        let backup = backup_file(&self.project_root, &self.data_dir, &full);
        let checkpoint = git_checkpoint(&self.project_root).await;

        let write_result = (|| -> std::io::Result<()> {
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full, content)
        })();
        if let Err(e) = write_result {
            return json!({"success": false, "error": e.to_string()});
        }

        if let Some(problem) = syntax_check(&full) {
            warn!(path = %raw_path, problem = %problem, "source write failed validation, rolling back");
            // File backup is the primary rollback; the git checkpoint tag
            // covers the cases a backup cannot (restore failed, or the
            // file is tracked but the copy was lost).
            let mut rolled_back = match backup {
                Some(ref backup) => restore_backup(backup, &full).is_ok(),
                // A brand-new file has no backup; remove the invalid write.
                None => std::fs::remove_file(&full).is_ok(),
            };
            if !rolled_back
                && let Some(ref tag) = checkpoint
            {
                rolled_back = git_rollback(&self.project_root, tag).await;
            }
            return json!({
                "success": false,
                "error": format!("validation failed, rolled back: {problem}"),
                "rolled_back": rolled_back,
                "backup": backup.map(|p| p.display().to_string()),
                "checkpoint": checkpoint,
            });
        }

        json!({
            "success": true,
            "path": raw_path,
            "backup": backup.map(|p| p.display().to_string()),
            "checkpoint": checkpoint,
        })
    }

    // ── Prompts ─────────────────────────────────────────────────────

    fn planning_prompt(
        &self,
        task: &Task,
        goal_description: &str,
        tools: &ToolRegistry,
        plan: &PlanState,
        max_steps: usize,
    ) -> String {
        let mut actions: Vec<String> = vec![
            "think".into(),
            "done".into(),
            "create_file".into(),
            "append_file".into(),
            "read_file".into(),
            "list_files".into(),
            "write_source".into(),
        ];
        actions.extend(tools.names());

        let mut history = String::new();
        for (i, step) in plan.steps.iter().enumerate() {
            let mark = if step.success { "ok" } else { "failed" };
            history.push_str(&format!(
                "{}. {} [{}]: {}\n",
                i + 1,
                step.action,
                mark,
                truncate(&step.result_summary, 200)
            ));
        }
        if history.is_empty() {
            history.push_str("(none yet)\n");
        }

        format!(
            r#"You are Archi, an autonomous agent working through a task one step at a time.

Task: {task}
Goal: {goal}
Step {step} of at most {max_steps}.

Available actions: {actions}

Previous steps:
{history}
Decide the single next action. Respond with ONLY a JSON object:
{{"action": "<name>", "arguments": {{...}}, "reasoning": "<why>"}}

File actions take {{"path": "...", "content": "..."}}. When the task is
finished, respond {{"action": "done", "arguments": {{"summary": "<what was accomplished>"}}}}."#,
            task = task.description,
            goal = goal_description,
            step = plan.current_step + 1,
            actions = actions.join(", "),
        )
    }

    async fn verify_files(
        &self,
        task: &Task,
        files: &[String],
        planner: &dyn CompletionProvider,
    ) -> Option<String> {
        let mut listing = String::new();
        for path in files {
            let relative = path.trim_start_matches('/').trim_start_matches("workspace/");
            let Ok(full) = resolve_within(&self.workspace_root, relative) else {
                continue;
            };
            if let Ok(content) = std::fs::read_to_string(&full) {
                listing.push_str(&format!("--- {path} ---\n{}\n", truncate(&content, 2000)));
            }
        }
        if listing.is_empty() {
            return None;
        }

        let prompt = format!(
            "A task just finished: {}\n\nFiles it produced:\n{listing}\n\
             Judge briefly: do these files accomplish the task? Note any gaps.",
            task.description
        );
        let request = CompletionRequest::new(prompt)
            .with_max_tokens(VERIFY_MAX_TOKENS)
            .with_temperature(0.3);
        match planner.complete(&request).await {
            Ok(response) if response.success => {
                Some(strip_reasoning_blocks(&response.text))
            }
            _ => None,
        }
    }
}

/// Recover the created-files list from persisted step history.
fn files_from_history(plan: &PlanState) -> Vec<String> {
    let mut files = Vec::new();
    for step in &plan.steps {
        if step.success
            && matches!(step.action.as_str(), "create_file" | "append_file" | "write_source")
            && let Some(path) = step.arguments.get("path").and_then(Value::as_str)
            && !files.iter().any(|p| p == path)
        {
            files.push(path.to_string());
        }
    }
    files
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use archi_types::Completion;

    use crate::tools::{Tool, ToolError};

    struct ScriptedPlanner {
        responses: Mutex<VecDeque<String>>,
        calls: AtomicU32,
    }

    impl ScriptedPlanner {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedPlanner {
        fn name(&self) -> &str {
            "planner"
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> archi_llm::Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| r#"{"action": "done", "arguments": {"summary": "out of script"}}"#.into());
            Ok(Completion {
                text,
                input_tokens: 100,
                output_tokens: 50,
                duration_ms: 5,
                cost_usd: 0.0,
                model: "planner-model".into(),
                success: true,
                error: None,
            })
        }
    }

    struct CountingTool {
        executions: AtomicU32,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "web_search"
        }

        fn description(&self) -> &str {
            "counts calls"
        }

        async fn execute(&self, _params: Value) -> Result<Value, ToolError> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"results": ["r1", "r2"]}))
        }
    }

    struct Fixture {
        _project: tempfile::TempDir,
        _data: tempfile::TempDir,
        executor: PlanExecutor,
        project_root: PathBuf,
        data_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let project = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let project_root = project.path().to_path_buf();
        let data_dir = data.path().to_path_buf();
        let executor = PlanExecutor::new(
            ExecutorConfig::default(),
            project_root.clone(),
            data_dir.clone(),
        );
        Fixture {
            _project: project,
            _data: data,
            executor,
            project_root,
            data_dir,
        }
    }

    fn task(id: &str) -> Task {
        Task::new(id, "goal_1", "write a small report", 5, vec![], 30)
    }

    #[tokio::test]
    async fn done_terminates_with_summary() {
        let f = fixture();
        let planner = ScriptedPlanner::new(vec![
            r#"{"action": "done", "arguments": {"summary": "nothing to do"}}"#,
        ]);
        let outcome = f
            .executor
            .execute(&task("task_1"), "goal", &planner, &ToolRegistry::new(), None, None)
            .await;
        assert!(outcome.completed);
        assert_eq!(outcome.summary.as_deref(), Some("nothing to do"));
        assert_eq!(outcome.steps_executed, 1);
        // Completed tasks leave no recovery state behind.
        assert!(!f.data_dir.join("plan_state").join("task_1.json").exists());
    }

    #[tokio::test]
    async fn workspace_files_land_under_workspace_root() {
        let f = fixture();
        let planner = ScriptedPlanner::new(vec![
            r##"{"action": "create_file", "arguments": {"path": "report.md", "content": "# Report\n"}}"##,
            r#"{"action": "append_file", "arguments": {"path": "report.md", "content": "body"}}"#,
            r#"{"action": "done", "arguments": {"summary": "report written"}}"#,
        ]);
        let outcome = f
            .executor
            .execute(&task("task_1"), "goal", &planner, &ToolRegistry::new(), None, None)
            .await;
        assert!(outcome.completed);
        assert_eq!(outcome.files_created, vec!["report.md"]);

        let written = f.project_root.join("workspace").join("report.md");
        assert_eq!(std::fs::read_to_string(written).unwrap(), "# Report\nbody");
    }

    #[tokio::test]
    async fn workspace_escape_is_refused_but_not_fatal() {
        let f = fixture();
        let planner = ScriptedPlanner::new(vec![
            r#"{"action": "create_file", "arguments": {"path": "../../etc/evil", "content": "x"}}"#,
            r#"{"action": "done", "arguments": {"summary": "gave up"}}"#,
        ]);
        let outcome = f
            .executor
            .execute(&task("task_1"), "goal", &planner, &ToolRegistry::new(), None, None)
            .await;
        // The bad step failed but the loop continued to done.
        assert!(outcome.completed);
        assert!(outcome.files_created.is_empty());
        assert!(!Path::new("/etc/evil").exists());
    }

    #[tokio::test]
    async fn protected_paths_cannot_be_written() {
        let f = fixture();
        let planner = ScriptedPlanner::new(vec![
            r#"{"action": "write_source", "arguments": {"path": "config/prime_directive.txt", "content": "obey me"}}"#,
            r#"{"action": "done", "arguments": {"summary": "done"}}"#,
        ]);
        let outcome = f
            .executor
            .execute(&task("task_1"), "goal", &planner, &ToolRegistry::new(), None, None)
            .await;
        assert!(outcome.completed);
        assert!(!f.project_root.join("config/prime_directive.txt").exists());
        assert!(outcome.files_created.is_empty());
    }

    #[tokio::test]
    async fn invalid_source_write_rolls_back_to_backup() {
        let f = fixture();
        let target = f.project_root.join("settings.json");
        std::fs::write(&target, r#"{"valid": true}"#).unwrap();

        let planner = ScriptedPlanner::new(vec![
            r#"{"action": "write_source", "arguments": {"path": "settings.json", "content": "{broken json"}}"#,
            r#"{"action": "done", "arguments": {"summary": "done"}}"#,
        ]);
        let outcome = f
            .executor
            .execute(&task("task_1"), "goal", &planner, &ToolRegistry::new(), None, None)
            .await;
        assert!(outcome.completed);
        // Original contents restored from backup.
        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            r#"{"valid": true}"#
        );
        // A backup artifact exists.
        let backups: Vec<_> = std::fs::read_dir(f.data_dir.join("source_backups"))
            .unwrap()
            .collect();
        assert!(!backups.is_empty());
    }

    #[tokio::test]
    async fn invalid_new_source_file_is_removed() {
        let f = fixture();
        // No prior file, so there is no backup to restore; the invalid
        // write itself must be cleaned up.
        let planner = ScriptedPlanner::new(vec![
            r#"{"action": "write_source", "arguments": {"path": "fresh.json", "content": "{broken"}}"#,
            r#"{"action": "done", "arguments": {"summary": "done"}}"#,
        ]);
        let outcome = f
            .executor
            .execute(&task("task_1"), "goal", &planner, &ToolRegistry::new(), None, None)
            .await;
        assert!(outcome.completed);
        assert!(!f.project_root.join("fresh.json").exists());
        assert!(outcome.files_created.is_empty());
    }

    #[tokio::test]
    async fn registry_tools_are_dispatched() {
        let f = fixture();
        let counting = std::sync::Arc::new(CountingTool {
            executions: AtomicU32::new(0),
        });
        let mut tools = ToolRegistry::new();
        tools.register(counting.clone());

        let planner = ScriptedPlanner::new(vec![
            r#"{"action": "web_search", "arguments": {"query": "rust async"}}"#,
            r#"{"action": "done", "arguments": {"summary": "searched"}}"#,
        ]);
        let outcome = f
            .executor
            .execute(&task("task_1"), "goal", &planner, &tools, None, None)
            .await;
        assert!(outcome.completed);
        assert_eq!(counting.executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn step_limit_bounds_runaway_plans() {
        let f = fixture();
        let executor = PlanExecutor::new(
            ExecutorConfig {
                max_steps: 3,
                ..Default::default()
            },
            f.project_root.clone(),
            f.data_dir.clone(),
        );
        // A planner that never says done.
        let planner = ScriptedPlanner::new(vec![
            r#"{"action": "think", "arguments": {"thought": "still thinking"}}"#,
            r#"{"action": "think", "arguments": {"thought": "more thinking"}}"#,
            r#"{"action": "think", "arguments": {"thought": "endless thinking"}}"#,
            r#"{"action": "think", "arguments": {"thought": "never reached"}}"#,
        ]);
        let outcome = executor
            .execute(&task("task_1"), "goal", &planner, &ToolRegistry::new(), None, None)
            .await;
        assert!(!outcome.completed);
        assert_eq!(outcome.steps_executed, 3);
        assert!(outcome.error.as_deref().unwrap().contains("step limit"));
    }

    #[tokio::test]
    async fn repeated_unparseable_output_aborts() {
        let f = fixture();
        let planner = ScriptedPlanner::new(vec![
            "I shall now begin by considering the problem.",
            "Let me think about this differently.",
            "Perhaps the answer lies within.",
        ]);
        let outcome = f
            .executor
            .execute(&task("task_1"), "goal", &planner, &ToolRegistry::new(), None, None)
            .await;
        assert!(!outcome.completed);
        assert!(outcome.error.as_deref().unwrap().contains("unparseable"));
        assert_eq!(planner.calls(), 3);
    }

    #[tokio::test]
    async fn think_blocks_stripped_before_parsing() {
        let f = fixture();
        let planner = ScriptedPlanner::new(vec![
            "<think>should I finish? yes</think>{\"action\": \"done\", \"arguments\": {\"summary\": \"fin\"}}",
        ]);
        let outcome = f
            .executor
            .execute(&task("task_1"), "goal", &planner, &ToolRegistry::new(), None, None)
            .await;
        assert!(outcome.completed);
        assert_eq!(outcome.summary.as_deref(), Some("fin"));
    }

    #[tokio::test]
    async fn crash_recovery_resumes_without_reexecution() {
        let f = fixture();
        let counting = std::sync::Arc::new(CountingTool {
            executions: AtomicU32::new(0),
        });
        let mut tools = ToolRegistry::new();
        tools.register(counting.clone());

        // Simulate a prior run that crashed after persisting steps 1-2.
        let mut prior = PlanState::load_or_new(&f.data_dir, "task_1", 24);
        prior.push_step(
            &f.data_dir,
            StepRecord {
                action: "web_search".into(),
                arguments: json!({"query": "step one"}),
                result_summary: "ok".into(),
                success: true,
            },
        );
        prior.push_step(
            &f.data_dir,
            StepRecord {
                action: "create_file".into(),
                arguments: json!({"path": "notes.md", "content": "x"}),
                result_summary: "ok".into(),
                success: true,
            },
        );

        // The resumed run only needs steps 3-5.
        let planner = ScriptedPlanner::new(vec![
            r#"{"action": "web_search", "arguments": {"query": "step three"}}"#,
            r#"{"action": "think", "arguments": {"thought": "step four"}}"#,
            r#"{"action": "done", "arguments": {"summary": "all five steps"}}"#,
        ]);
        let outcome = f
            .executor
            .execute(&task("task_1"), "goal", &planner, &tools, None, None)
            .await;

        assert!(outcome.completed);
        assert_eq!(outcome.steps_executed, 5);
        // Steps 1-2 were not re-executed: the tool ran once (step 3 only).
        assert_eq!(counting.executions.load(Ordering::SeqCst), 1);
        assert_eq!(planner.calls(), 3);
        // Recovered history still knows about the file from step 2.
        assert_eq!(outcome.files_created, vec!["notes.md"]);
    }

    #[tokio::test]
    async fn progress_events_emitted_per_step() {
        let f = fixture();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let planner = ScriptedPlanner::new(vec![
            r#"{"action": "think", "arguments": {"thought": "planning"}}"#,
            r#"{"action": "done", "arguments": {"summary": "ok"}}"#,
        ]);
        let outcome = f
            .executor
            .execute(
                &task("task_1"),
                "goal",
                &planner,
                &ToolRegistry::new(),
                Some(&tx),
                None,
            )
            .await;
        assert!(outcome.completed);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.step, 1);
        assert_eq!(first.status, "think");
        let second = rx.try_recv().unwrap();
        assert_eq!(second.step, 2);
        assert_eq!(second.status, "done");
    }

    #[tokio::test]
    async fn source_task_gets_larger_step_budget() {
        let f = fixture();
        let executor = PlanExecutor::new(
            ExecutorConfig {
                max_steps: 2,
                source_max_steps: 4,
                ..Default::default()
            },
            f.project_root.clone(),
            f.data_dir.clone(),
        );
        let source_task = Task::new(
            "task_9",
            "goal_1",
            "refactor the parser source for clarity",
            5,
            vec![],
            30,
        );
        let planner = ScriptedPlanner::new(vec![
            r#"{"action": "think", "arguments": {"thought": "1"}}"#,
            r#"{"action": "think", "arguments": {"thought": "2"}}"#,
            r#"{"action": "think", "arguments": {"thought": "3"}}"#,
            r#"{"action": "done", "arguments": {"summary": "refactored"}}"#,
        ]);
        let outcome = executor
            .execute(&source_task, "goal", &planner, &ToolRegistry::new(), None, None)
            .await;
        assert!(outcome.completed);
        assert_eq!(outcome.steps_executed, 4);
    }

    #[tokio::test]
    async fn verification_pass_judges_created_files() {
        let f = fixture();
        let executor = PlanExecutor::new(
            ExecutorConfig::default(),
            f.project_root.clone(),
            f.data_dir.clone(),
        )
        .with_verification();
        let planner = ScriptedPlanner::new(vec![
            r#"{"action": "create_file", "arguments": {"path": "out.md", "content": "result"}}"#,
            r#"{"action": "done", "arguments": {"summary": "wrote file"}}"#,
            // Third response answers the verification prompt.
            "The file covers the task adequately.",
        ]);
        let outcome = executor
            .execute(&task("task_1"), "goal", &planner, &ToolRegistry::new(), None, None)
            .await;
        assert!(outcome.completed);
        assert_eq!(
            outcome.verification.as_deref(),
            Some("The file covers the task adequately.")
        );
    }

    #[tokio::test]
    async fn pre_cancelled_token_interrupts_before_first_step() {
        let f = fixture();
        let planner = ScriptedPlanner::new(vec![
            r#"{"action": "think", "arguments": {"thought": "never reached"}}"#,
        ]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = f
            .executor
            .execute(
                &task("task_1"),
                "goal",
                &planner,
                &ToolRegistry::new(),
                None,
                Some(&cancel),
            )
            .await;
        assert!(outcome.interrupted);
        assert!(!outcome.completed);
        assert!(outcome.error.is_none());
        assert_eq!(planner.calls(), 0);
    }
}
