//! The goal/task model.
//!
//! A [`Goal`] is a durable user intent decomposed into a list of [`Task`]s
//! whose prerequisite edges form a DAG within the goal. Tasks are owned by
//! their goal and serialized inline, so the whole store round-trips through
//! a single JSON document.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
///
/// Transitions are monotonic except `pending <-> blocked` and the
/// `in_progress -> failed` path (a failed task may be reset explicitly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

/// A single actionable task within a goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier (`task_<n>`).
    pub task_id: String,
    /// Identifier of the owning goal.
    pub goal_id: String,
    /// What needs doing, in the planner's words.
    pub description: String,
    /// 1-10, 10 highest.
    pub priority: u8,
    /// Task identifiers that must complete before this task is ready.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Planner's duration estimate.
    #[serde(default = "Task::default_duration")]
    pub estimated_duration_minutes: u32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Result payload recorded on completion.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Error string recorded on failure.
    #[serde(default)]
    pub error: Option<String>,
}

impl Task {
    fn default_duration() -> u32 {
        30
    }

    /// Create a fresh pending task.
    pub fn new(
        task_id: impl Into<String>,
        goal_id: impl Into<String>,
        description: impl Into<String>,
        priority: u8,
        dependencies: Vec<String>,
        estimated_duration_minutes: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            goal_id: goal_id.into(),
            description: description.into(),
            priority,
            dependencies,
            estimated_duration_minutes,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// True when every prerequisite is in `completed_ids`.
    pub fn can_start(&self, completed_ids: &HashSet<&str>) -> bool {
        self.dependencies
            .iter()
            .all(|dep| completed_ids.contains(dep.as_str()))
    }
}

/// A high-level goal decomposed into tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    /// Stable identifier (`goal_<n>`).
    pub goal_id: String,
    /// What needs to be achieved.
    pub description: String,
    /// Why the user wants it.
    #[serde(default)]
    pub user_intent: String,
    /// 1-10, 10 highest.
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Set once the planner has produced a task list.
    #[serde(default)]
    pub is_decomposed: bool,
    /// Completed tasks / total tasks, in percent. 0 for an empty task list.
    #[serde(default)]
    pub completion_percentage: f64,
}

impl Goal {
    /// Create a fresh, undecomposed goal.
    pub fn new(
        goal_id: impl Into<String>,
        description: impl Into<String>,
        user_intent: impl Into<String>,
        priority: u8,
    ) -> Self {
        Self {
            goal_id: goal_id.into(),
            description: description.into(),
            user_intent: user_intent.into(),
            priority,
            created_at: Utc::now(),
            tasks: Vec::new(),
            is_decomposed: false,
            completion_percentage: 0.0,
        }
    }

    /// Tasks that are pending with all prerequisites completed.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        let completed: HashSet<&str> = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.task_id.as_str())
            .collect();

        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && t.can_start(&completed))
            .collect()
    }

    /// Recompute `completion_percentage` from task states.
    pub fn update_progress(&mut self) {
        if self.tasks.is_empty() {
            self.completion_percentage = 0.0;
            return;
        }
        let completed = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        self.completion_percentage = (completed as f64 / self.tasks.len() as f64) * 100.0;
    }

    /// A goal is complete iff it has at least one task and every task
    /// completed. An undecomposed (empty) goal is never complete.
    pub fn is_complete(&self) -> bool {
        !self.tasks.is_empty()
            && self
                .tasks
                .iter()
                .all(|t| t.status == TaskStatus::Completed)
    }
}
