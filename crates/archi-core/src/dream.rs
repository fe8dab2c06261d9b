//! Dream cycle: proactive background processing during idle periods.
//!
//! A long-lived monitor polls the idle timer; once the user has been away
//! long enough, a dream cycle drains a bounded batch of ready tasks from
//! the goal store and runs each through the plan executor. User activity
//! interrupts gracefully: the in-flight step completes and persists, the
//! in-flight task is returned to pending for a later cycle, and no further
//! tasks start.
//!
//! Dream tasks execute serially; no two dream tasks ever run concurrently.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use archi_llm::CompletionProvider;
use archi_types::config::DreamConfig;

use crate::executor::PlanExecutor;
use crate::findings::FindingsQueue;
use crate::goals::GoalStore;
use crate::tools::ToolRegistry;

/// Cap on retained cycle history.
const HISTORY_LIMIT: usize = 100;

/// Metadata for one completed dream cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DreamRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub tasks_processed: usize,
    pub interrupted: bool,
}

/// Current dream-cycle status for telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct DreamStatus {
    pub is_dreaming: bool,
    pub is_idle: bool,
    pub idle_secs: f64,
    pub total_dreams: usize,
}

/// Everything a dream cycle needs to execute tasks autonomously.
#[derive(Clone)]
struct AutonomousRig {
    goal_store: Arc<GoalStore>,
    planner: Arc<dyn CompletionProvider>,
    executor: Arc<PlanExecutor>,
    tools: Arc<ToolRegistry>,
}

/// Idle-triggered background worker.
pub struct DreamCycle {
    config: DreamConfig,
    last_activity: Mutex<Instant>,
    dreaming: AtomicBool,
    /// Interrupt for the cycle currently running. Tokens are single-use,
    /// so each cycle installs a fresh one.
    interrupt: Mutex<CancellationToken>,
    history: Mutex<VecDeque<DreamRecord>>,
    rig: Mutex<Option<AutonomousRig>>,
    findings: Mutex<Option<Arc<FindingsQueue>>>,
}

impl DreamCycle {
    pub fn new(config: DreamConfig) -> Self {
        info!(
            idle_threshold_secs = config.idle_threshold_secs,
            check_interval_secs = config.check_interval_secs,
            "dream cycle initialized"
        );
        Self {
            config,
            last_activity: Mutex::new(Instant::now()),
            dreaming: AtomicBool::new(false),
            interrupt: Mutex::new(CancellationToken::new()),
            history: Mutex::new(VecDeque::new()),
            rig: Mutex::new(None),
            findings: Mutex::new(None),
        }
    }

    /// Record user activity: resets the idle timer and interrupts any
    /// running dream.
    pub fn mark_activity(&self) {
        *self.last_activity.lock().expect("dream cycle lock poisoned") = Instant::now();
        if self.dreaming.load(Ordering::SeqCst) {
            info!("user activity detected, interrupting dream cycle");
            self.interrupt
                .lock()
                .expect("dream cycle lock poisoned")
                .cancel();
        }
    }

    /// True when the host has been idle past the threshold.
    pub fn is_idle(&self) -> bool {
        self.idle_secs() >= self.config.idle_threshold_secs as f64
    }

    fn idle_secs(&self) -> f64 {
        self.last_activity
            .lock()
            .expect("dream cycle lock poisoned")
            .elapsed()
            .as_secs_f64()
    }

    pub fn is_dreaming(&self) -> bool {
        self.dreaming.load(Ordering::SeqCst)
    }

    /// Wire up autonomous task execution.
    pub fn enable_autonomous_mode(
        &self,
        goal_store: Arc<GoalStore>,
        planner: Arc<dyn CompletionProvider>,
        executor: Arc<PlanExecutor>,
        tools: Arc<ToolRegistry>,
    ) {
        *self.rig.lock().expect("dream cycle lock poisoned") = Some(AutonomousRig {
            goal_store,
            planner,
            executor,
            tools,
        });
        info!("autonomous execution mode enabled");
    }

    /// Attach a findings queue: completed dream tasks that produced files
    /// get a finding queued for later delivery.
    pub fn attach_findings(&self, findings: Arc<FindingsQueue>) {
        *self.findings.lock().expect("dream cycle lock poisoned") = Some(findings);
    }

    /// Spawn the background monitor. Cancelling `shutdown` stops it.
    pub fn start_monitoring(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let cycle = Arc::clone(self);
        info!("dream cycle monitoring started");
        tokio::spawn(async move {
            // The first tick fires immediately, so idleness is checked as
            // soon as the monitor starts.
            let mut ticker =
                tokio::time::interval(Duration::from_secs(cycle.config.check_interval_secs.max(1)));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("dream cycle monitoring stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if cycle.is_idle() && !cycle.is_dreaming() {
                            info!("idle detected, starting dream cycle");
                            cycle.run_dream_cycle().await;
                        }
                    }
                }
            }
        })
    }

    /// Execute one dream cycle: up to `max_tasks_per_cycle` ready tasks.
    pub async fn run_dream_cycle(&self) {
        if self.dreaming.swap(true, Ordering::SeqCst) {
            warn!("dream cycle already running");
            return;
        }

        // Install a fresh interrupt token for this cycle.
        let interrupt = {
            let mut guard = self.interrupt.lock().expect("dream cycle lock poisoned");
            *guard = CancellationToken::new();
            guard.clone()
        };

        let started_at = Utc::now();
        let started = Instant::now();
        let mut tasks_processed = 0;

        let rig = self.rig.lock().expect("dream cycle lock poisoned").clone();
        if let Some(rig) = rig {
            while tasks_processed < self.config.max_tasks_per_cycle {
                if interrupt.is_cancelled() {
                    break;
                }
                let Some(task) = rig.goal_store.get_next_task() else {
                    info!("no ready tasks to execute");
                    break;
                };

                info!(
                    task_id = %task.task_id,
                    description = %task.description,
                    "dream executing task"
                );
                if let Err(e) = rig.goal_store.start_task(&task.task_id) {
                    error!(task_id = %task.task_id, error = %e, "could not start task");
                    break;
                }

                let goal_description = rig
                    .goal_store
                    .get_goal(&task.goal_id)
                    .map(|g| g.description)
                    .unwrap_or_default();

                let outcome = rig
                    .executor
                    .execute(
                        &task,
                        &goal_description,
                        &*rig.planner,
                        &rig.tools,
                        None,
                        Some(&interrupt),
                    )
                    .await;

                let result = if outcome.interrupted {
                    // Step state is persisted; hand the task back so a later
                    // cycle resumes it.
                    rig.goal_store.reset_task(&task.task_id)
                } else if outcome.completed {
                    tasks_processed += 1;
                    if !outcome.files_created.is_empty()
                        && let Some(findings) =
                            self.findings.lock().expect("dream cycle lock poisoned").clone()
                    {
                        let summary = outcome
                            .summary
                            .clone()
                            .unwrap_or_else(|| task.description.clone());
                        findings.enqueue(&task.task_id, summary, outcome.files_created.clone());
                    }
                    rig.goal_store
                        .complete_task(&task.task_id, Some(outcome.to_value()))
                } else {
                    tasks_processed += 1;
                    rig.goal_store.fail_task(
                        &task.task_id,
                        outcome.error.as_deref().unwrap_or("execution failed"),
                    )
                };
                if let Err(e) = result {
                    error!(task_id = %task.task_id, error = %e, "task bookkeeping failed");
                }
                if outcome.interrupted {
                    break;
                }
            }
        } else {
            info!("autonomous mode not enabled, dream cycle is a no-op");
        }

        let record = DreamRecord {
            id: Uuid::new_v4(),
            started_at,
            duration_secs: started.elapsed().as_secs_f64(),
            tasks_processed,
            interrupted: interrupt.is_cancelled(),
        };
        info!(
            duration_secs = record.duration_secs,
            tasks_processed = record.tasks_processed,
            interrupted = record.interrupted,
            "dream cycle finished"
        );
        {
            let mut history = self.history.lock().expect("dream cycle lock poisoned");
            if history.len() >= HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(record);
        }
        self.dreaming.store(false, Ordering::SeqCst);
    }

    /// Completed-cycle history, oldest first.
    pub fn history(&self) -> Vec<DreamRecord> {
        self.history
            .lock()
            .expect("dream cycle lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Current status snapshot.
    pub fn status(&self) -> DreamStatus {
        DreamStatus {
            is_dreaming: self.is_dreaming(),
            is_idle: self.is_idle(),
            idle_secs: self.idle_secs(),
            total_dreams: self
                .history
                .lock()
                .expect("dream cycle lock poisoned")
                .len(),
        }
    }
}
