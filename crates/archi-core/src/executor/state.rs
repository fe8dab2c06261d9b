//! Crash-recovery state for plan execution.
//!
//! After every step the executor writes `plan_state/<task_id>.json`. If
//! the process dies mid-task, the next run resumes from the step after the
//! last persisted one instead of re-executing history. State older than a
//! configured age is stale (the world has moved on) and is discarded.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// One executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub action: String,
    pub arguments: Value,
    pub result_summary: String,
    pub success: bool,
}

/// Per-task execution state, persisted after each step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanState {
    pub task_id: String,
    pub steps: Vec<StepRecord>,
    /// Index of the next step to execute (== `steps.len()` between steps).
    pub current_step: usize,
    pub started_at: DateTime<Utc>,
}

impl PlanState {
    fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            steps: Vec::new(),
            current_step: 0,
            started_at: Utc::now(),
        }
    }

    fn path(data_dir: &Path, task_id: &str) -> PathBuf {
        data_dir.join("plan_state").join(format!("{task_id}.json"))
    }

    /// Load recent state for `task_id`, or start fresh.
    ///
    /// Stale state (older than `max_age_hours`) and corrupt files are
    /// discarded with a log line.
    pub fn load_or_new(data_dir: &Path, task_id: &str, max_age_hours: u64) -> Self {
        let path = Self::path(data_dir, task_id);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => return Self::new(task_id),
        };

        let state: PlanState = match serde_json::from_str(&text) {
            Ok(state) => state,
            Err(e) => {
                warn!(task_id, error = %e, "corrupt plan state discarded");
                let _ = std::fs::remove_file(&path);
                return Self::new(task_id);
            }
        };

        let age_hours = Utc::now()
            .signed_duration_since(state.started_at)
            .num_hours();
        if age_hours >= max_age_hours as i64 {
            info!(task_id, age_hours, "stale plan state discarded");
            let _ = std::fs::remove_file(&path);
            return Self::new(task_id);
        }

        info!(
            task_id,
            resumed_at_step = state.current_step,
            "resuming plan execution from persisted state"
        );
        state
    }

    /// Record a completed step and persist.
    pub fn push_step(&mut self, data_dir: &Path, step: StepRecord) {
        self.steps.push(step);
        self.current_step = self.steps.len();
        self.persist(data_dir);
    }

    /// Write the state file (atomic). Failures are logged, not raised.
    pub fn persist(&self, data_dir: &Path) {
        let path = Self::path(data_dir, &self.task_id);
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, json)?;
            std::fs::rename(&tmp, &path)
        })();
        match result {
            Ok(()) => debug!(task_id = %self.task_id, step = self.current_step, "plan state persisted"),
            Err(e) => warn!(task_id = %self.task_id, error = %e, "plan state persist failed"),
        }
    }

    /// Delete the state file after successful completion.
    pub fn discard(&self, data_dir: &Path) {
        let _ = std::fs::remove_file(Self::path(data_dir, &self.task_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fresh_state_when_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = PlanState::load_or_new(dir.path(), "task_1", 24);
        assert_eq!(state.current_step, 0);
        assert!(state.steps.is_empty());
    }

    #[test]
    fn push_step_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = PlanState::load_or_new(dir.path(), "task_1", 24);
        state.push_step(
            dir.path(),
            StepRecord {
                action: "web_search".into(),
                arguments: json!({"query": "rust"}),
                result_summary: "3 results".into(),
                success: true,
            },
        );
        state.push_step(
            dir.path(),
            StepRecord {
                action: "think".into(),
                arguments: json!({}),
                result_summary: "noted".into(),
                success: true,
            },
        );

        let reloaded = PlanState::load_or_new(dir.path(), "task_1", 24);
        assert_eq!(reloaded.current_step, 2);
        assert_eq!(reloaded.steps.len(), 2);
        assert_eq!(reloaded.steps[0].action, "web_search");
    }

    #[test]
    fn stale_state_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = PlanState::load_or_new(dir.path(), "task_1", 24);
        state.started_at = Utc::now() - chrono::Duration::hours(30);
        state.push_step(
            dir.path(),
            StepRecord {
                action: "think".into(),
                arguments: json!({}),
                result_summary: "old".into(),
                success: true,
            },
        );

        let reloaded = PlanState::load_or_new(dir.path(), "task_1", 24);
        assert_eq!(reloaded.current_step, 0);
        assert!(!PlanState::path(dir.path(), "task_1").exists());
    }

    #[test]
    fn corrupt_state_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = PlanState::path(dir.path(), "task_1");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "}{ garbage").unwrap();

        let state = PlanState::load_or_new(dir.path(), "task_1", 24);
        assert_eq!(state.current_step, 0);
        assert!(!path.exists());
    }

    #[test]
    fn discard_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = PlanState::load_or_new(dir.path(), "task_1", 24);
        state.push_step(
            dir.path(),
            StepRecord {
                action: "think".into(),
                arguments: json!({}),
                result_summary: "x".into(),
                success: true,
            },
        );
        assert!(PlanState::path(dir.path(), "task_1").exists());
        state.discard(dir.path());
        assert!(!PlanState::path(dir.path(), "task_1").exists());
    }
}
