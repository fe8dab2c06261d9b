//! Adaptive heartbeat: the three-tier activity scheduler.
//!
//! Tick intervals adapt to user activity: command mode (fast checks for a
//! couple of minutes after an interaction), monitoring mode (relaxed), and
//! deep sleep (long intervals once the host has been idle a while). A
//! configurable night window overrides the interval entirely -- unless the
//! user is active, because command mode always wins over night mode.
//!
//! Mode transitions are deterministic functions of (now, last interaction,
//! last event, configuration); no hidden state.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Timelike;
use tracing::{debug, info};

use archi_types::config::{HeartbeatConfig, TimeWindow};

/// Absolute floor on any returned sleep interval.
const MIN_SLEEP_SECS: f64 = 0.1;

/// The three tick-interval regimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    Command,
    Monitoring,
    DeepSleep,
}

struct SchedulerState {
    last_interaction: Instant,
    last_event: Instant,
    mode: SchedulerMode,
}

/// Three-tier adaptive sleep scheduler.
pub struct AdaptiveScheduler {
    state: Mutex<SchedulerState>,
    command_cooldown: f64,
    command_duration: f64,
    monitoring_cooldown: f64,
    idle_threshold: f64,
    deep_cooldown: f64,
    max_cooldown: f64,
    time_awareness_enabled: bool,
    night: TimeWindow,
    work_hours: TimeWindow,
    evening: TimeWindow,
}

impl AdaptiveScheduler {
    /// Build from the `heartbeat.yaml` section, filling unset tiers with
    /// the standard 10s / 60s / 600s cadence.
    pub fn new(config: &HeartbeatConfig) -> Self {
        let sleep = &config.adaptive_sleep;
        let scheduler = Self {
            state: Mutex::new(SchedulerState {
                last_interaction: Instant::now(),
                last_event: Instant::now(),
                mode: SchedulerMode::Monitoring,
            }),
            command_cooldown: sleep.command_mode.cooldown.unwrap_or(10.0),
            command_duration: sleep.command_mode.duration.unwrap_or(120.0),
            monitoring_cooldown: sleep.monitoring_mode.cooldown.unwrap_or(60.0),
            idle_threshold: sleep.monitoring_mode.idle_threshold.unwrap_or(600.0),
            deep_cooldown: sleep.deep_sleep_mode.cooldown.unwrap_or(600.0),
            max_cooldown: sleep.deep_sleep_mode.max_cooldown.unwrap_or(1800.0),
            time_awareness_enabled: config.time_awareness.enabled,
            night: config.time_awareness.night_mode.clone(),
            work_hours: config.time_awareness.work_hours.clone(),
            evening: config.time_awareness.evening.clone(),
        };
        info!(
            command_cooldown = scheduler.command_cooldown,
            monitoring_cooldown = scheduler.monitoring_cooldown,
            deep_cooldown = scheduler.deep_cooldown,
            "adaptive scheduler initialized"
        );
        scheduler
    }

    /// Record a user interaction: enter command mode immediately.
    pub fn record_user_interaction(&self) {
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        state.last_interaction = Instant::now();
        state.mode = SchedulerMode::Command;
        info!(
            cooldown_secs = self.command_cooldown,
            duration_secs = self.command_duration,
            "entered command mode"
        );
    }

    /// Record a system event (trigger fired, file changed); used for the
    /// demotion decision into deep sleep.
    pub fn record_system_event(&self) {
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        state.last_event = Instant::now();
    }

    /// Current regime.
    pub fn mode(&self) -> SchedulerMode {
        self.state.lock().expect("scheduler lock poisoned").mode
    }

    /// The next tick interval.
    pub fn get_sleep_duration(&self) -> Duration {
        let hour = chrono::Local::now().hour();
        self.sleep_for_hour(hour)
    }

    /// Interval computation with the wall-clock hour injected (testable).
    fn sleep_for_hour(&self, hour: u32) -> Duration {
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        let time_since_command = state.last_interaction.elapsed().as_secs_f64();
        let time_since_event = state.last_event.elapsed().as_secs_f64();
        let time_idle = time_since_command.min(time_since_event);

        // Recent user activity always gets fast checks, even at night.
        if time_since_command < self.command_duration {
            state.mode = SchedulerMode::Command;
            debug!(secs = self.command_cooldown, "sleep (command mode)");
            return secs(self.command_cooldown);
        }

        // Night override: fixed long cooldown when the user is away.
        if self.is_night(hour) {
            if state.mode == SchedulerMode::Command {
                state.mode = SchedulerMode::Monitoring;
                info!(
                    cooldown_secs = self.night_cooldown(),
                    "exited command mode into night mode"
                );
            }
            return secs(self.night_cooldown());
        }

        if state.mode == SchedulerMode::Command {
            state.mode = SchedulerMode::Monitoring;
            info!(
                cooldown_secs = self.monitoring_cooldown,
                "exited command mode into monitoring"
            );
        }

        let base = if time_idle >= self.idle_threshold {
            if state.mode != SchedulerMode::DeepSleep {
                state.mode = SchedulerMode::DeepSleep;
                info!(cooldown_secs = self.deep_cooldown, "entered deep sleep mode");
            }
            self.deep_cooldown.min(self.max_cooldown)
        } else {
            if state.mode == SchedulerMode::DeepSleep {
                state.mode = SchedulerMode::Monitoring;
            }
            self.monitoring_cooldown
        };

        let sleep = base * self.time_of_day_multiplier(hour);
        debug!(secs = sleep, mode = ?state.mode, idle_secs = time_idle, "sleep");
        secs(sleep)
    }

    // ── Time awareness ──────────────────────────────────────────────

    fn is_night(&self, hour: u32) -> bool {
        if !self.time_awareness_enabled {
            return false;
        }
        let (Some(start), Some(end)) = (self.night.start_hour, self.night.end_hour) else {
            return false;
        };
        if start > end {
            // Window wraps midnight, e.g. 23-6.
            hour >= start || hour < end
        } else {
            start <= hour && hour < end
        }
    }

    fn night_cooldown(&self) -> f64 {
        self.night.cooldown.unwrap_or(1800.0)
    }

    fn time_of_day_multiplier(&self, hour: u32) -> f64 {
        if !self.time_awareness_enabled {
            return 1.0;
        }
        if let (Some(start), Some(end)) = (self.work_hours.start_hour, self.work_hours.end_hour)
            && start <= hour
            && hour < end
        {
            return self.work_hours.multiplier.unwrap_or(1.0);
        }
        if let (Some(start), Some(end)) = (self.evening.start_hour, self.evening.end_hour)
            && start <= hour
            && hour < end
        {
            return self.evening.multiplier.unwrap_or(1.5);
        }
        1.0
    }

    /// Test hook: age the recorded timestamps by the given amounts.
    #[cfg(test)]
    fn rewind(&self, interaction: Duration, event: Duration) {
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        state.last_interaction = Instant::now() - interaction;
        state.last_event = Instant::now() - event;
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(MIN_SLEEP_SECS))
}
