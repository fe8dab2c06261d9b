//! The agent loop: top-level tick coordinator.
//!
//! Each tick checks the emergency stop, samples host health (throttling
//! sleep 5x when the machine is busy or hot), evaluates triggers, and
//! sleeps for whatever the adaptive scheduler says -- chunked into <= 1 s
//! slices so shutdown is observed promptly.
//!
//! Triggers are either the mandatory heartbeat (every ~60 s) or structured
//! actions injected from outside. Structured actions pass through the
//! safety controller before dispatching to the tool registry; every
//! outcome lands in the action log. Task execution never happens in a
//! tick -- idle ticks only discover the next ready task and note it; dream
//! cycles do the executing.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::action_log::{ActionLogger, ActionRecord};
use crate::budget::BudgetLedger;
use crate::dream::DreamCycle;
use crate::goals::GoalStore;
use crate::heartbeat::AdaptiveScheduler;
use crate::monitor::SystemMonitor;
use crate::safety::{SafetyController, TriggerAction};
use crate::tools::ToolRegistry;

/// Sleep multiplier applied while the host is over its health thresholds.
const THROTTLE_MULTIPLIER: f64 = 5.0;
/// Default interval between mandatory heartbeat triggers.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Checks for the `EMERGENCY_STOP` sentinel file at the project root.
pub struct EmergencyStop {
    stop_file: PathBuf,
}

impl EmergencyStop {
    pub fn new(project_root: &std::path::Path) -> Self {
        Self {
            stop_file: project_root.join("EMERGENCY_STOP"),
        }
    }

    /// True when the sentinel exists; the agent must exit.
    pub fn check(&self) -> bool {
        if self.stop_file.is_file() {
            warn!(path = %self.stop_file.display(), "EMERGENCY STOP TRIGGERED");
            return true;
        }
        false
    }
}

/// One trigger to process in a tick.
enum Trigger {
    Heartbeat,
    Action(TriggerAction),
}

/// Shared services the loop coordinates.
pub struct AgentDeps {
    pub monitor: Arc<SystemMonitor>,
    pub scheduler: Arc<AdaptiveScheduler>,
    pub safety: Arc<SafetyController>,
    pub tools: Arc<ToolRegistry>,
    pub action_log: Arc<ActionLogger>,
    pub goal_store: Arc<GoalStore>,
    pub ledger: Arc<BudgetLedger>,
    pub dream: Arc<DreamCycle>,
}

/// Top-level coordinator driving ticks until shutdown or emergency stop.
pub struct AgentLoop {
    emergency_stop: EmergencyStop,
    deps: AgentDeps,
    heartbeat_interval: Duration,
    last_heartbeat: Mutex<Option<Instant>>,
    injected: Mutex<VecDeque<TriggerAction>>,
    last_discovered_task: Mutex<Option<String>>,
}

impl AgentLoop {
    pub fn new(project_root: &std::path::Path, deps: AgentDeps) -> Self {
        Self {
            emergency_stop: EmergencyStop::new(project_root),
            deps,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            last_heartbeat: Mutex::new(None),
            injected: Mutex::new(VecDeque::new()),
            last_discovered_task: Mutex::new(None),
        }
    }

    /// Override the heartbeat cadence (tests, fast setups).
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Queue a structured action for the next tick.
    pub fn inject_action(&self, action: TriggerAction) {
        self.injected
            .lock()
            .expect("agent loop lock poisoned")
            .push_back(action);
    }

    /// Run ticks until `shutdown` is cancelled or the emergency stop
    /// appears. Performs startup recovery first and a full flush on exit.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("agent loop starting");
        self.startup_recovery();
        self.deps.action_log.log(ActionRecord::new(
            "system_start",
            json!({}),
            "started",
        ));

        let dream_monitor = self.deps.dream.start_monitoring(shutdown.child_token());

        let mut iteration: u64 = 0;
        while !shutdown.is_cancelled() {
            iteration += 1;

            if self.emergency_stop.check() {
                warn!("exiting due to emergency stop");
                break;
            }

            let throttle = if self.deps.monitor.should_throttle() {
                warn!("host over threshold, throttling tick cadence");
                THROTTLE_MULTIPLIER
            } else {
                1.0
            };

            let triggers = self.collect_triggers();
            if triggers.is_empty() {
                self.discover_idle_work();
            } else {
                self.deps.scheduler.record_system_event();
                for trigger in triggers {
                    self.handle_trigger(trigger, iteration).await;
                }
            }

            let sleep = self.deps.scheduler.get_sleep_duration().mul_f64(throttle);
            if !sleep_observing(sleep, &shutdown).await {
                info!("shutdown requested during sleep");
                break;
            }
        }

        // Graceful shutdown: stop background work, flush everything.
        shutdown.cancel();
        let _ = dream_monitor.await;
        self.deps.ledger.flush();
        self.deps.goal_store.save_state();
        self.deps.action_log.log(ActionRecord::new(
            "system_stop",
            json!({"iteration": iteration}),
            "stopped",
        ));
        self.deps.action_log.close();
        info!(iteration, "agent loop stopped");
    }

    fn startup_recovery(&self) {
        let pruned = self.deps.goal_store.prune_duplicates();
        if pruned > 0 {
            info!(pruned, "startup recovery: pruned duplicate goals");
        }
        let status = self.deps.goal_store.status();
        if status.active_goals > 0 {
            info!(
                active_goals = status.active_goals,
                pending_tasks = status.pending_tasks,
                "startup recovery: goals loaded"
            );
        }
    }

    /// Mandatory heartbeat plus any injected structured actions.
    fn collect_triggers(&self) -> Vec<Trigger> {
        let mut triggers = Vec::new();

        {
            let mut last = self.last_heartbeat.lock().expect("agent loop lock poisoned");
            let due = match *last {
                Some(at) => at.elapsed() >= self.heartbeat_interval,
                None => true,
            };
            if due {
                *last = Some(Instant::now());
                triggers.push(Trigger::Heartbeat);
            }
        }

        let mut injected = self.injected.lock().expect("agent loop lock poisoned");
        triggers.extend(injected.drain(..).map(Trigger::Action));
        triggers
    }

    async fn handle_trigger(&self, trigger: Trigger, iteration: u64) {
        match trigger {
            Trigger::Heartbeat => {
                self.deps.action_log.log(
                    ActionRecord::new("heartbeat", json!({"iteration": iteration}), "success")
                        .with_model("system")
                        .with_confidence(1.0),
                );
            }
            Trigger::Action(mut action) => {
                let started = Instant::now();
                let authorized = self.deps.safety.authorize(&mut action);

                if authorized {
                    self.deps.scheduler.record_user_interaction();
                    let result = self
                        .deps
                        .tools
                        .execute(&action.action_type, action.parameters.clone())
                        .await;
                    let success = result
                        .get("success")
                        .and_then(serde_json::Value::as_bool)
                        .unwrap_or(false);

                    let mut record = ActionRecord::new(
                        action.action_type.clone(),
                        action.parameters.clone(),
                        if success { "success" } else { "failure" },
                    )
                    .with_confidence(action.confidence)
                    .with_duration(started.elapsed().as_millis() as u64);
                    if let Some(error) = result.get("error").and_then(serde_json::Value::as_str) {
                        record = record.with_error(error);
                    }
                    self.deps.action_log.log(record);
                } else {
                    self.deps.action_log.log(
                        ActionRecord::new(
                            action.action_type.clone(),
                            action.parameters.clone(),
                            "denied",
                        )
                        .with_model("safety_controller")
                        .with_confidence(action.confidence)
                        .with_duration(started.elapsed().as_millis() as u64),
                    );
                }
            }
        }
    }

    /// Idle tick: note the next ready task once; dream cycles execute it.
    fn discover_idle_work(&self) {
        let Some(task) = self.deps.goal_store.get_next_task() else {
            return;
        };
        let mut last = self
            .last_discovered_task
            .lock()
            .expect("agent loop lock poisoned");
        if last.as_deref() == Some(task.task_id.as_str()) {
            return;
        }
        info!(
            task_id = %task.task_id,
            description = %task.description,
            "idle: next task queued, dream cycle will execute after idle threshold"
        );
        *last = Some(task.task_id.clone());
        self.deps.action_log.log(ActionRecord::new(
            "goal_discovered",
            json!({
                "task_id": task.task_id,
                "goal_id": task.goal_id,
                "description": task.description.chars().take(200).collect::<String>(),
            }),
            "noted",
        ));
    }
}

/// Sleep in <= 1 s chunks; returns `false` when `shutdown` fired.
async fn sleep_observing(total: Duration, shutdown: &CancellationToken) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        let chunk = remaining.min(Duration::from_secs(1));
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = tokio::time::sleep(chunk) => {}
        }
        remaining = remaining.saturating_sub(chunk);
    }
    true
}
