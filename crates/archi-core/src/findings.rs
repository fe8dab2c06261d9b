//! Interesting-findings queue: surface noteworthy dream discoveries.
//!
//! When a dream cycle finishes a research task that produced output, the
//! result is queued here so an interaction source can mention it in the
//! next conversation or a periodic report. Constraints: bounded pending
//! queue (no messaging spam), auto-expiry of stale findings, and a
//! cooldown between chat deliveries.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Max undelivered findings held at once; older ones are dropped first.
const MAX_PENDING: usize = 10;
/// Undelivered findings older than this are expired on load.
const EXPIRE_DAYS: i64 = 7;
/// Minimum gap between chat deliveries.
const DELIVERY_COOLDOWN: Duration = Duration::from_secs(4 * 3600);

/// One noteworthy discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    /// Task that produced it.
    pub task_id: String,
    /// Short conversational summary, ready to show the user.
    pub summary: String,
    /// Workspace files backing the finding.
    #[serde(default)]
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub delivered: bool,
}

/// Bounded, persistent queue of findings awaiting delivery.
pub struct FindingsQueue {
    state: Mutex<QueueState>,
    path: PathBuf,
    delivery_cooldown: Duration,
}

struct QueueState {
    findings: Vec<Finding>,
    last_chat_delivery: Option<Instant>,
}

impl FindingsQueue {
    /// Open (or create) the queue under `data_dir`, expiring stale
    /// entries on load.
    pub fn new(data_dir: &std::path::Path) -> Self {
        let path = data_dir.join("interesting_findings_queue.json");
        let mut findings: Vec<Finding> = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(error = %e, "corrupt findings queue, starting empty");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };

        let cutoff = Utc::now() - chrono::Duration::days(EXPIRE_DAYS);
        let before = findings.len();
        findings.retain(|f| f.delivered || f.created_at > cutoff);
        if findings.len() < before {
            info!(expired = before - findings.len(), "expired stale findings");
        }

        let queue = Self {
            state: Mutex::new(QueueState {
                findings,
                last_chat_delivery: None,
            }),
            path,
            delivery_cooldown: DELIVERY_COOLDOWN,
        };
        queue.save();
        info!(pending = queue.pending_count(), "findings queue initialized");
        queue
    }

    /// Override the delivery cooldown (tests, eager setups).
    pub fn with_delivery_cooldown(mut self, cooldown: Duration) -> Self {
        self.delivery_cooldown = cooldown;
        self
    }

    /// Queue a new finding. When the pending count exceeds the bound,
    /// the oldest undelivered entry is dropped.
    pub fn enqueue(
        &self,
        task_id: impl Into<String>,
        summary: impl Into<String>,
        files: Vec<String>,
    ) -> Finding {
        let finding = Finding {
            id: Uuid::new_v4(),
            task_id: task_id.into(),
            summary: summary.into(),
            files,
            created_at: Utc::now(),
            delivered: false,
        };
        {
            let mut state = self.state.lock().expect("findings queue lock poisoned");
            state.findings.push(finding.clone());

            let pending: Vec<usize> = state
                .findings
                .iter()
                .enumerate()
                .filter(|(_, f)| !f.delivered)
                .map(|(i, _)| i)
                .collect();
            if pending.len() > MAX_PENDING {
                let drop_index = pending[0];
                let dropped = state.findings.remove(drop_index);
                info!(summary = %dropped.summary, "findings queue full, dropped oldest");
            }
        }
        self.save();
        info!(task_id = %finding.task_id, "queued finding");
        finding
    }

    /// Number of undelivered findings.
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .expect("findings queue lock poisoned")
            .findings
            .iter()
            .filter(|f| !f.delivered)
            .count()
    }

    /// Oldest undelivered finding, without touching delivery state.
    pub fn peek(&self) -> Option<Finding> {
        self.state
            .lock()
            .expect("findings queue lock poisoned")
            .findings
            .iter()
            .find(|f| !f.delivered)
            .cloned()
    }

    /// Next finding for chat delivery, respecting the cooldown. Marks it
    /// delivered and stamps the cooldown clock.
    pub fn take_for_chat(&self) -> Option<Finding> {
        let finding = {
            let mut state = self.state.lock().expect("findings queue lock poisoned");
            if let Some(last) = state.last_chat_delivery
                && last.elapsed() < self.delivery_cooldown
            {
                return None;
            }
            let finding = state.findings.iter_mut().find(|f| !f.delivered)?;
            finding.delivered = true;
            let finding = finding.clone();
            state.last_chat_delivery = Some(Instant::now());
            finding
        };
        self.save();
        info!(task_id = %finding.task_id, "delivered finding to chat");
        Some(finding)
    }

    /// All findings, oldest first.
    pub fn all(&self) -> Vec<Finding> {
        self.state
            .lock()
            .expect("findings queue lock poisoned")
            .findings
            .clone()
    }

    fn save(&self) {
        let snapshot = self
            .state
            .lock()
            .expect("findings queue lock poisoned")
            .findings
            .clone();
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(&snapshot).map_err(std::io::Error::other)?;
            let tmp = self.path.with_extension("json.tmp");
            std::fs::write(&tmp, json)?;
            std::fs::rename(&tmp, &self.path)
        })();
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "could not save findings queue");
        }
    }
}
