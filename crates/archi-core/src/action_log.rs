//! Append-only JSONL log of dispatched actions.
//!
//! Every trigger the agent loop handles -- heartbeats, tool dispatches,
//! safety denials, lifecycle markers -- lands here as one JSON line. The
//! log is for post-hoc inspection; write failures are logged and never
//! surface to the loop.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

/// One logged action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action_type: String,
    pub parameters: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub cost_usd: f64,
    /// `success`, `failure`, `denied`, `started`, `stopped`, ...
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionRecord {
    pub fn new(action_type: impl Into<String>, parameters: Value, result: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action_type: action_type.into(),
            parameters,
            model_used: None,
            confidence: None,
            cost_usd: 0.0,
            result: result.into(),
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_used = Some(model.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Appends [`ActionRecord`]s to `action_log.jsonl`.
pub struct ActionLogger {
    writer: Mutex<Option<BufWriter<File>>>,
    path: PathBuf,
}

impl ActionLogger {
    /// Open (creating if needed) the log under `data_dir`.
    pub fn new(data_dir: &std::path::Path) -> Self {
        let path = data_dir.join("action_log.jsonl");
        let writer = open_append(&path);
        if writer.is_none() {
            error!(path = %path.display(), "action log unavailable, records will be dropped");
        }
        Self {
            writer: Mutex::new(writer),
            path,
        }
    }

    /// Append one record. Failures are logged, not raised.
    pub fn log(&self, record: ActionRecord) {
        let mut guard = self.writer.lock().expect("action logger lock poisoned");
        let Some(writer) = guard.as_mut() else {
            return;
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "unserializable action record dropped");
                return;
            }
        };
        if let Err(e) = writeln!(writer, "{line}") {
            error!(path = %self.path.display(), error = %e, "action log write failed");
        }
    }

    /// Flush and close the log. Further records are dropped.
    pub fn close(&self) {
        let mut guard = self.writer.lock().expect("action logger lock poisoned");
        if let Some(mut writer) = guard.take() {
            let _ = writer.flush();
            info!(path = %self.path.display(), "action log closed");
        }
    }
}

impl Drop for ActionLogger {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_append(path: &std::path::Path) -> Option<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok()?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(BufWriter::new)
        .ok()
}
