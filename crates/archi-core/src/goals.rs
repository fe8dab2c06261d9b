//! Goal store: persistent priority queue of goals with task DAGs.
//!
//! Goals are created from user intent, decomposed into tasks by a planner
//! (a completion provider prompted for structured JSON), and dispatched
//! one ready task at a time. The whole store serializes atomically to
//! `goals_state.json`; a corrupt snapshot is logged and the store starts
//! empty.
//!
//! Prerequisite references produced by the planner may be integers, digit
//! strings, or `task_N` names. They are canonicalized to task identifiers
//! during decomposition and may only point backward in decomposition
//! order; forward and self references are dropped silently.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::RwLock;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use archi_llm::{CompletionProvider, CompletionRequest};
use archi_types::{ArchiError, Goal, Result, Task, TaskStatus};

use crate::parsing::extract_json_array;

const STATE_VERSION: u32 = 1;

/// Words ignored when comparing goal descriptions for duplicates.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "to", "for", "in", "of", "on", "with", "is", "by",
];

/// Serialized snapshot (`goals_state.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreState {
    version: u32,
    next_goal_id: u64,
    next_task_id: u64,
    goals: Vec<Goal>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            next_goal_id: 1,
            next_task_id: 1,
            goals: Vec::new(),
        }
    }
}

/// Aggregate counts for telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub total_goals: usize,
    pub active_goals: usize,
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub in_progress_tasks: usize,
    pub completed_tasks: usize,
}

/// Persistent store of goals and their task DAGs.
pub struct GoalStore {
    state: RwLock<StoreState>,
    data_dir: PathBuf,
}

impl GoalStore {
    /// Open (or create) the store under `data_dir`.
    pub fn new(data_dir: PathBuf) -> Self {
        let store = Self {
            state: RwLock::new(StoreState::default()),
            data_dir,
        };
        store.load_state();
        info!("goal store initialized");
        store
    }

    // ── Goal creation and decomposition ─────────────────────────────

    /// Create a new undecomposed goal. Priority is 1-10, 10 highest.
    pub fn create_goal(&self, description: &str, user_intent: &str, priority: u8) -> Goal {
        let goal = {
            let mut state = self.state.write().expect("goal store lock poisoned");
            let goal_id = format!("goal_{}", state.next_goal_id);
            state.next_goal_id += 1;
            let goal = Goal::new(goal_id, description, user_intent, priority.clamp(1, 10));
            state.goals.push(goal.clone());
            goal
        };
        info!(goal_id = %goal.goal_id, description, "created goal");
        self.save_state();
        goal
    }

    /// Decompose a goal into tasks using the supplied planner.
    ///
    /// The planner is asked for a JSON array of task objects; prerequisite
    /// references are resolved against earlier tasks in the same response.
    /// A cyclic result is rejected and leaves the goal undecomposed.
    pub async fn decompose_goal(
        &self,
        goal_id: &str,
        planner: &dyn CompletionProvider,
    ) -> Result<Vec<Task>> {
        let (description, user_intent) = {
            let state = self.state.read().expect("goal store lock poisoned");
            let goal = state
                .goals
                .iter()
                .find(|g| g.goal_id == goal_id)
                .ok_or_else(|| ArchiError::GoalNotFound(goal_id.to_string()))?;
            if goal.is_decomposed {
                warn!(goal_id, "goal already decomposed");
                return Ok(goal.tasks.clone());
            }
            (goal.description.clone(), goal.user_intent.clone())
        };

        info!(goal_id, description = %description, "decomposing goal");
        let prompt = decomposition_prompt(&description, &user_intent);
        let request = CompletionRequest::new(prompt)
            .with_max_tokens(1000)
            .with_temperature(0.7);
        let response = planner
            .complete(&request)
            .await
            .map_err(|e| ArchiError::Provider {
                message: e.to_string(),
            })?;

        if !response.success || response.text.trim().is_empty() {
            return Err(ArchiError::Decomposition {
                reason: response
                    .error
                    .unwrap_or_else(|| "planner returned empty response".into()),
            });
        }

        let items = extract_json_array(&response.text, false);
        if items.is_empty() {
            return Err(ArchiError::Decomposition {
                reason: "planner response contained no task array".into(),
            });
        }

        let tasks = {
            let mut state = self.state.write().expect("goal store lock poisoned");
            let mut tasks = Vec::new();
            let mut index_to_id: HashMap<usize, String> = HashMap::new();

            for (idx, item) in items.iter().enumerate() {
                let Some(obj) = item.as_object() else {
                    continue;
                };
                let task_id = format!("task_{}", state.next_task_id);
                state.next_task_id += 1;
                index_to_id.insert(idx, task_id.clone());

                let dependencies = resolve_dependencies(
                    obj.get("dependencies").and_then(Value::as_array),
                    idx,
                    &index_to_id,
                );

                let task = Task::new(
                    task_id.clone(),
                    goal_id,
                    obj.get("description")
                        .and_then(Value::as_str)
                        .unwrap_or("Unnamed task"),
                    obj.get("priority").and_then(Value::as_u64).unwrap_or(5) as u8,
                    dependencies,
                    obj.get("estimated_duration_minutes")
                        .and_then(Value::as_u64)
                        .unwrap_or(30) as u32,
                );
                debug!(task_id = %task_id, description = %task.description, "created task");
                tasks.push(task);
            }

            // Backward-only references cannot form a cycle; this guards the
            // store against a planner response that slipped past resolution.
            if has_cycle(&tasks) {
                return Err(ArchiError::CycleDetected {
                    goal_id: goal_id.to_string(),
                });
            }

            let goal = state
                .goals
                .iter_mut()
                .find(|g| g.goal_id == goal_id)
                .ok_or_else(|| ArchiError::GoalNotFound(goal_id.to_string()))?;
            goal.tasks = tasks.clone();
            goal.is_decomposed = true;
            info!(goal_id, task_count = tasks.len(), "goal decomposed");
            tasks
        };

        self.save_state();
        Ok(tasks)
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// The highest-priority ready task across all non-complete goals.
    ///
    /// Ordering is lexicographic on `(task.priority, goal.priority)`,
    /// descending; ties go to the earlier-created goal.
    pub fn get_next_task(&self) -> Option<Task> {
        let state = self.state.read().expect("goal store lock poisoned");
        let mut best: Option<(u8, u8, Task)> = None;

        for goal in &state.goals {
            if goal.is_complete() {
                continue;
            }
            for task in goal.ready_tasks() {
                let key = (task.priority, goal.priority);
                let better = match &best {
                    Some((tp, gp, _)) => key > (*tp, *gp),
                    None => true,
                };
                if better {
                    best = Some((task.priority, goal.priority, task.clone()));
                }
            }
        }
        best.map(|(_, _, task)| task)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Mark a task in-progress and stamp its start time.
    pub fn start_task(&self, task_id: &str) -> Result<()> {
        self.with_task(task_id, |task| {
            task.status = TaskStatus::InProgress;
            task.started_at = Some(chrono::Utc::now());
            info!(task_id, "started task");
            false
        })
    }

    /// Mark a task completed and refresh the parent goal's progress.
    pub fn complete_task(&self, task_id: &str, result: Option<Value>) -> Result<()> {
        self.with_task(task_id, move |task| {
            task.status = TaskStatus::Completed;
            task.completed_at = Some(chrono::Utc::now());
            task.result = result;
            true
        })
    }

    /// Mark a task failed. Failed tasks are not retried until reset.
    pub fn fail_task(&self, task_id: &str, error: &str) -> Result<()> {
        let error = error.to_string();
        self.with_task(task_id, move |task| {
            task.status = TaskStatus::Failed;
            task.error = Some(error.clone());
            warn!(task_id = %task.task_id, error = %error, "task failed");
            true
        })
    }

    /// Reset a failed task to pending so a later dream cycle retries it.
    pub fn reset_task(&self, task_id: &str) -> Result<()> {
        self.with_task(task_id, |task| {
            task.status = TaskStatus::Pending;
            task.started_at = None;
            task.completed_at = None;
            task.error = None;
            info!(task_id = %task.task_id, "task reset to pending");
            false
        })
    }

    /// Apply `mutate` to the named task; a `true` return recomputes the
    /// parent goal's completion percentage. Persists on success.
    fn with_task(&self, task_id: &str, mutate: impl FnOnce(&mut Task) -> bool) -> Result<()> {
        {
            let mut state = self.state.write().expect("goal store lock poisoned");
            let mut found = false;
            for goal in &mut state.goals {
                if let Some(pos) = goal.tasks.iter().position(|t| t.task_id == task_id) {
                    if mutate(&mut goal.tasks[pos]) {
                        goal.update_progress();
                        info!(
                            goal_id = %goal.goal_id,
                            completion_percentage = goal.completion_percentage,
                            "goal progress updated"
                        );
                    }
                    found = true;
                    break;
                }
            }
            if !found {
                return Err(ArchiError::TaskNotFound(task_id.to_string()));
            }
        }
        self.save_state();
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Snapshot of one goal.
    pub fn get_goal(&self, goal_id: &str) -> Option<Goal> {
        let state = self.state.read().expect("goal store lock poisoned");
        state.goals.iter().find(|g| g.goal_id == goal_id).cloned()
    }

    /// Snapshot of every goal.
    pub fn goals(&self) -> Vec<Goal> {
        self.state
            .read()
            .expect("goal store lock poisoned")
            .goals
            .clone()
    }

    /// Aggregate counts across the store.
    pub fn status(&self) -> StoreStatus {
        let state = self.state.read().expect("goal store lock poisoned");
        let count = |status: TaskStatus| {
            state
                .goals
                .iter()
                .flat_map(|g| &g.tasks)
                .filter(|t| t.status == status)
                .count()
        };
        StoreStatus {
            total_goals: state.goals.len(),
            active_goals: state.goals.iter().filter(|g| !g.is_complete()).count(),
            total_tasks: state.goals.iter().map(|g| g.tasks.len()).sum(),
            pending_tasks: count(TaskStatus::Pending),
            in_progress_tasks: count(TaskStatus::InProgress),
            completed_tasks: count(TaskStatus::Completed),
        }
    }

    // ── Duplicate pruning ───────────────────────────────────────────

    /// Remove near-duplicate undecomposed goals, keeping the oldest.
    ///
    /// Two descriptions are duplicates when one contains the other, or
    /// when their stop-word-filtered Jaccard overlap exceeds 0.6.
    /// Decomposed or completed goals are never pruned. Returns the number
    /// of goals removed.
    pub fn prune_duplicates(&self) -> usize {
        let removed = {
            let mut state = self.state.write().expect("goal store lock poisoned");

            let mut ordered = state.goals.clone();
            ordered.sort_by_key(|g| g.created_at);

            let mut kept: Vec<(String, String)> = Vec::new(); // (normalized desc, goal_id)
            let mut to_remove: HashSet<String> = HashSet::new();

            for goal in &ordered {
                let desc = goal.description.to_lowercase().trim().to_string();
                let words = content_words(&desc);

                let is_dup = kept.iter().any(|(kept_desc, _)| {
                    if desc.contains(kept_desc.as_str()) || kept_desc.contains(desc.as_str()) {
                        return true;
                    }
                    let kept_words = content_words(kept_desc);
                    jaccard(&words, &kept_words) > 0.6
                });

                if is_dup && !goal.is_decomposed && !goal.is_complete() {
                    to_remove.insert(goal.goal_id.clone());
                } else {
                    kept.push((desc, goal.goal_id.clone()));
                }
            }

            state.goals.retain(|g| !to_remove.contains(&g.goal_id));
            to_remove.len()
        };

        if removed > 0 {
            self.save_state();
            info!(removed, "pruned duplicate goals");
        }
        removed
    }

    // ── Persistence ─────────────────────────────────────────────────

    /// Atomically write the full store snapshot to `goals_state.json`.
    ///
    /// Failures are logged and never raised.
    pub fn save_state(&self) {
        let snapshot = self.state.read().expect("goal store lock poisoned").clone();
        let path = self.data_dir.join("goals_state.json");

        let result = (|| -> std::io::Result<()> {
            std::fs::create_dir_all(&self.data_dir)?;
            let json = serde_json::to_string_pretty(&snapshot).map_err(std::io::Error::other)?;
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, json)?;
            std::fs::rename(&tmp, &path)
        })();

        match result {
            Ok(()) => debug!(path = %path.display(), "saved goal state"),
            Err(e) => error!(path = %path.display(), error = %e, "failed to save goal state"),
        }
    }

    /// Load `goals_state.json` if present; corrupt files start empty.
    fn load_state(&self) {
        let path = self.data_dir.join("goals_state.json");
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no existing goals state found");
                return;
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to read goals state");
                return;
            }
        };
        match serde_json::from_str::<StoreState>(&text) {
            Ok(loaded) => {
                let count = loaded.goals.len();
                *self.state.write().expect("goal store lock poisoned") = loaded;
                info!(goals = count, "loaded goals from disk");
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "corrupt goals state, starting empty");
            }
        }
    }
}

/// Resolve raw planner dependency references into task identifiers.
///
/// Accepted forms, all required to point strictly backward (`< idx`):
/// integers, digit strings, and `task_N` names (1-based within the
/// response). Anything else is dropped.
fn resolve_dependencies(
    raw: Option<&Vec<Value>>,
    idx: usize,
    index_to_id: &HashMap<usize, String>,
) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    raw.iter()
        .filter_map(|dep| {
            let dep_idx = match dep {
                Value::Number(n) => n.as_u64().map(|n| n as usize),
                Value::String(s) => {
                    if let Ok(n) = s.parse::<usize>() {
                        Some(n)
                    } else {
                        s.strip_prefix("task_")
                            .and_then(|n| n.parse::<usize>().ok())
                            .and_then(|n| n.checked_sub(1))
                    }
                }
                _ => None,
            }?;
            if dep_idx >= idx {
                debug!(dep_idx, idx, "dropping forward/self dependency reference");
                return None;
            }
            index_to_id.get(&dep_idx).cloned()
        })
        .collect()
}

/// True when the task list's prerequisite edges contain a cycle.
fn has_cycle(tasks: &[Task]) -> bool {
    let mut graph = DiGraph::<(), ()>::new();
    let mut nodes = HashMap::new();
    for task in tasks {
        nodes.insert(task.task_id.as_str(), graph.add_node(()));
    }
    for task in tasks {
        let Some(&to) = nodes.get(task.task_id.as_str()) else {
            continue;
        };
        for dep in &task.dependencies {
            if let Some(&from) = nodes.get(dep.as_str()) {
                graph.add_edge(from, to, ());
            }
        }
    }
    is_cyclic_directed(&graph)
}

fn content_words(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.to_string())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let overlap = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        overlap as f64 / union as f64
    }
}

fn decomposition_prompt(description: &str, user_intent: &str) -> String {
    format!(
        r#"Break down this goal into specific, actionable tasks.

Goal: {description}
User Intent: {user_intent}

Create a task list with:
1. Clear, specific task descriptions
2. Estimated duration in minutes
3. Dependencies (use indices 0, 1, 2 for tasks that must complete first - 0 is first task)
4. Priority (1-10)

Return ONLY a JSON array of tasks:
[
  {{
    "description": "Task description",
    "estimated_duration_minutes": 30,
    "dependencies": [],
    "priority": 5
  }}
]

Be specific and actionable. Each task should be something that can be completed in one work session."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use archi_types::Completion;

    struct ScriptedPlanner {
        text: String,
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
            Ok(Completion {
                text: self.text.clone(),
                input_tokens: 50,
                output_tokens: 100,
                duration_ms: 10,
                cost_usd: 0.0,
                model: "planner-model".into(),
                success: true,
                error: None,
            })
        }
    }

    fn store() -> (tempfile::TempDir, GoalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = GoalStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    // ── Creation and decomposition ──────────────────────────────────

    #[test]
    fn create_goal_assigns_sequential_ids() {
        let (_dir, store) = store();
        let g1 = store.create_goal("first", "", 5);
        let g2 = store.create_goal("second", "", 5);
        assert_eq!(g1.goal_id, "goal_1");
        assert_eq!(g2.goal_id, "goal_2");
        assert!(!g1.is_decomposed);
    }

    #[tokio::test]
    async fn decompose_resolves_mixed_dependency_references() {
        let (_dir, store) = store();
        let goal = store.create_goal("write a research report", "curiosity", 6);

        // Mixed reference styles: int, digit string, task_N. The last
        // entry also carries a forward reference (3) and a self reference,
        // both of which must be dropped.
        let planner = ScriptedPlanner {
            text: r#"[
                {"description": "research", "dependencies": [], "priority": 5},
                {"description": "outline", "dependencies": [0], "priority": 5},
                {"description": "draft", "dependencies": ["1"], "priority": 6},
                {"description": "review", "dependencies": ["task_3", 3, 5], "priority": 7}
            ]"#
            .into(),
        };

        let tasks = store.decompose_goal(&goal.goal_id, &planner).await.unwrap();
        assert_eq!(tasks.len(), 4);
        assert!(tasks[0].dependencies.is_empty());
        assert_eq!(tasks[1].dependencies, vec![tasks[0].task_id.clone()]);
        assert_eq!(tasks[2].dependencies, vec![tasks[1].task_id.clone()]);
        // "task_3" is 1-based -> index 2 (backward, kept); 3 and 5 dropped.
        assert_eq!(tasks[3].dependencies, vec![tasks[2].task_id.clone()]);

        let stored = store.get_goal(&goal.goal_id).unwrap();
        assert!(stored.is_decomposed);
    }

    #[tokio::test]
    async fn decompose_accepts_fenced_json() {
        let (_dir, store) = store();
        let goal = store.create_goal("learn sourdough", "", 5);
        let planner = ScriptedPlanner {
            text: "Here you go:\n```json\n[{\"description\": \"buy flour\", \"priority\": 4}]\n```"
                .into(),
        };
        let tasks = store.decompose_goal(&goal.goal_id, &planner).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].description, "buy flour");
        assert_eq!(tasks[0].priority, 4);
        assert_eq!(tasks[0].estimated_duration_minutes, 30);
    }

    #[tokio::test]
    async fn decompose_prose_response_is_rejected() {
        let (_dir, store) = store();
        let goal = store.create_goal("vague goal", "", 5);
        let planner = ScriptedPlanner {
            text: "I think you should start by researching the topic.".into(),
        };
        let result = store.decompose_goal(&goal.goal_id, &planner).await;
        assert!(matches!(result, Err(ArchiError::Decomposition { .. })));
        assert!(!store.get_goal(&goal.goal_id).unwrap().is_decomposed);
    }

    #[tokio::test]
    async fn decompose_unknown_goal_errors() {
        let (_dir, store) = store();
        let planner = ScriptedPlanner { text: "[]".into() };
        let result = store.decompose_goal("goal_99", &planner).await;
        assert!(matches!(result, Err(ArchiError::GoalNotFound(_))));
    }

    #[tokio::test]
    async fn decompose_twice_returns_existing_tasks() {
        let (_dir, store) = store();
        let goal = store.create_goal("stable goal", "", 5);
        let planner = ScriptedPlanner {
            text: r#"[{"description": "only task"}]"#.into(),
        };
        let first = store.decompose_goal(&goal.goal_id, &planner).await.unwrap();
        let second = store.decompose_goal(&goal.goal_id, &planner).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].task_id, second[0].task_id);
    }

    #[test]
    fn cycle_detection_on_task_lists() {
        let mut t1 = Task::new("task_1", "g", "a", 5, vec!["task_2".into()], 30);
        let t2 = Task::new("task_2", "g", "b", 5, vec!["task_1".into()], 30);
        assert!(has_cycle(&[t1.clone(), t2]));

        t1.dependencies.clear();
        let t2 = Task::new("task_2", "g", "b", 5, vec!["task_1".into()], 30);
        assert!(!has_cycle(&[t1, t2]));
    }

    // ── Dispatch ordering ───────────────────────────────────────────

    #[tokio::test]
    async fn dispatch_respects_priority_and_prerequisites() {
        let (_dir, store) = store();
        let goal = store.create_goal("ordered work", "", 5);
        let planner = ScriptedPlanner {
            text: r#"[
                {"description": "T1", "dependencies": [], "priority": 5},
                {"description": "T2", "dependencies": [0], "priority": 8},
                {"description": "T3", "dependencies": [], "priority": 7}
            ]"#
            .into(),
        };
        store.decompose_goal(&goal.goal_id, &planner).await.unwrap();

        // T2 has the highest priority but is blocked on T1; among ready
        // tasks T3 (7) beats T1 (5).
        let next = store.get_next_task().unwrap();
        assert_eq!(next.description, "T3");
        store.start_task(&next.task_id).unwrap();
        store.complete_task(&next.task_id, None).unwrap();

        let next = store.get_next_task().unwrap();
        assert_eq!(next.description, "T1");
        store.start_task(&next.task_id).unwrap();
        store.complete_task(&next.task_id, None).unwrap();

        let next = store.get_next_task().unwrap();
        assert_eq!(next.description, "T2");
        store.start_task(&next.task_id).unwrap();
        store.complete_task(&next.task_id, None).unwrap();

        assert!(store.get_next_task().is_none());
        assert!(store.get_goal(&goal.goal_id).unwrap().is_complete());
    }

    #[tokio::test]
    async fn goal_priority_breaks_task_priority_ties() {
        let (_dir, store) = store();
        let low = store.create_goal("low priority goal", "", 3);
        let high = store.create_goal("high priority goal", "", 9);
        let planner = ScriptedPlanner {
            text: r#"[{"description": "work", "priority": 5}]"#.into(),
        };
        store.decompose_goal(&low.goal_id, &planner).await.unwrap();
        store.decompose_goal(&high.goal_id, &planner).await.unwrap();

        let next = store.get_next_task().unwrap();
        assert_eq!(next.goal_id, high.goal_id);
    }

    #[tokio::test]
    async fn all_blocked_or_done_returns_none() {
        let (_dir, store) = store();
        let goal = store.create_goal("blocked goal", "", 5);
        let planner = ScriptedPlanner {
            text: r#"[
                {"description": "root", "dependencies": [], "priority": 5},
                {"description": "leaf", "dependencies": [0], "priority": 5}
            ]"#
            .into(),
        };
        let tasks = store.decompose_goal(&goal.goal_id, &planner).await.unwrap();
        store.fail_task(&tasks[0].task_id, "tool broke").unwrap();

        // Root failed, leaf's prerequisite will never satisfy.
        assert!(store.get_next_task().is_none());
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    #[tokio::test]
    async fn completion_raises_goal_percentage() {
        let (_dir, store) = store();
        let goal = store.create_goal("two tasks", "", 5);
        let planner = ScriptedPlanner {
            text: r#"[{"description": "a"}, {"description": "b"}]"#.into(),
        };
        let tasks = store.decompose_goal(&goal.goal_id, &planner).await.unwrap();

        let before = store.get_goal(&goal.goal_id).unwrap().completion_percentage;
        store.start_task(&tasks[0].task_id).unwrap();
        store
            .complete_task(&tasks[0].task_id, Some(serde_json::json!({"ok": true})))
            .unwrap();
        let after = store.get_goal(&goal.goal_id).unwrap().completion_percentage;
        assert!(after > before);
        assert_eq!(after, 50.0);
    }

    #[tokio::test]
    async fn failed_task_can_be_reset() {
        let (_dir, store) = store();
        let goal = store.create_goal("retryable", "", 5);
        let planner = ScriptedPlanner {
            text: r#"[{"description": "flaky"}]"#.into(),
        };
        let tasks = store.decompose_goal(&goal.goal_id, &planner).await.unwrap();

        store.start_task(&tasks[0].task_id).unwrap();
        store.fail_task(&tasks[0].task_id, "boom").unwrap();
        assert!(store.get_next_task().is_none());

        store.reset_task(&tasks[0].task_id).unwrap();
        let next = store.get_next_task().unwrap();
        assert_eq!(next.task_id, tasks[0].task_id);
        assert!(next.error.is_none());
    }

    #[test]
    fn lifecycle_on_unknown_task_errors() {
        let (_dir, store) = store();
        assert!(matches!(
            store.start_task("task_404"),
            Err(ArchiError::TaskNotFound(_))
        ));
    }

    // ── Pruning ─────────────────────────────────────────────────────

    #[test]
    fn prune_removes_substring_duplicates_keeping_oldest() {
        let (_dir, store) = store();
        let original = store.create_goal("research rust async runtimes", "", 5);
        store.create_goal("research rust async", "", 5);

        let removed = store.prune_duplicates();
        assert_eq!(removed, 1);
        let goals = store.goals();
        assert_eq!(goals.len(), 1);
        assert_eq!(goals[0].goal_id, original.goal_id);
    }

    #[test]
    fn prune_removes_high_word_overlap() {
        let (_dir, store) = store();
        store.create_goal("summarize weekly market movements from the news", "", 5);
        store.create_goal("summarize weekly market movements from news", "", 5);
        assert_eq!(store.prune_duplicates(), 1);
    }

    #[test]
    fn prune_keeps_distinct_goals() {
        let (_dir, store) = store();
        store.create_goal("learn woodworking joinery", "", 5);
        store.create_goal("plan a trip to Portugal", "", 5);
        assert_eq!(store.prune_duplicates(), 0);
        assert_eq!(store.goals().len(), 2);
    }

    #[tokio::test]
    async fn prune_never_touches_decomposed_goals() {
        let (_dir, store) = store();
        store.create_goal("track the garden beds", "", 5);
        let dup = store.create_goal("track the garden beds", "", 5);
        let planner = ScriptedPlanner {
            text: r#"[{"description": "water"}]"#.into(),
        };
        store.decompose_goal(&dup.goal_id, &planner).await.unwrap();

        assert_eq!(store.prune_duplicates(), 0);
        assert_eq!(store.goals().len(), 2);
    }

    // ── Persistence ─────────────────────────────────────────────────

    #[tokio::test]
    async fn save_and_load_roundtrip_preserves_structure() {
        let dir = tempfile::tempdir().unwrap();
        let original_tasks;
        {
            let store = GoalStore::new(dir.path().to_path_buf());
            let goal = store.create_goal("durable goal", "persistence", 7);
            let planner = ScriptedPlanner {
                text: r#"[
                    {"description": "a", "priority": 5},
                    {"description": "b", "dependencies": [0], "priority": 6}
                ]"#
                .into(),
            };
            original_tasks = store.decompose_goal(&goal.goal_id, &planner).await.unwrap();
            store.start_task(&original_tasks[0].task_id).unwrap();
            store.complete_task(&original_tasks[0].task_id, None).unwrap();
        }
        {
            let store = GoalStore::new(dir.path().to_path_buf());
            let goals = store.goals();
            assert_eq!(goals.len(), 1);
            let goal = &goals[0];
            assert_eq!(goal.priority, 7);
            assert_eq!(goal.tasks.len(), 2);
            assert_eq!(goal.tasks[0].status, TaskStatus::Completed);
            assert_eq!(goal.tasks[1].status, TaskStatus::Pending);
            assert_eq!(
                goal.tasks[1].dependencies,
                vec![original_tasks[0].task_id.clone()]
            );
            // ID counters resume where they left off.
            let next = store.create_goal("another", "", 5);
            assert_eq!(next.goal_id, "goal_2");
        }
    }

    #[test]
    fn corrupt_state_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("goals_state.json"), "{definitely not json").unwrap();
        let store = GoalStore::new(dir.path().to_path_buf());
        assert!(store.goals().is_empty());
    }

    #[test]
    fn status_counts() {
        let (_dir, store) = store();
        store.create_goal("g1", "", 5);
        let status = store.status();
        assert_eq!(status.total_goals, 1);
        assert_eq!(status.active_goals, 1);
        assert_eq!(status.total_tasks, 0);
    }
}
