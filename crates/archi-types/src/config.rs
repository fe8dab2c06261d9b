//! Configuration schema and loading.
//!
//! Archi reads two YAML files from its config directory:
//!
//! - `rules.yaml` -- monitoring thresholds, budget limits, dream/executor
//!   knobs, safety risk levels, service ports, browser timeouts.
//! - `heartbeat.yaml` -- adaptive sleep tiers and time-of-day awareness.
//!
//! Every field carries a serde default. A missing file, a missing section,
//! or an unparseable key is logged and replaced by its default -- config
//! problems are never fatal at this level.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

fn default_true() -> bool {
    true
}

// ── Monitoring ──────────────────────────────────────────────────────────

/// Host health thresholds (percent) and the budget warning fraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// CPU usage percent above which the loop throttles.
    #[serde(default = "MonitoringConfig::default_cpu")]
    pub cpu_threshold: f32,
    /// Memory usage percent above which an alert is raised.
    #[serde(default = "MonitoringConfig::default_memory")]
    pub memory_threshold: f32,
    /// Temperature (Celsius) above which the loop throttles.
    #[serde(default = "MonitoringConfig::default_temp")]
    pub temp_threshold: f32,
    /// Disk usage percent above which an alert is raised.
    #[serde(default = "MonitoringConfig::default_disk")]
    pub disk_threshold: f32,
    /// Percent of the daily budget at which the router stops escalating
    /// simple queries to the remote provider.
    #[serde(default = "MonitoringConfig::default_budget_warning")]
    pub budget_warning_pct: f32,
}

impl MonitoringConfig {
    fn default_cpu() -> f32 {
        80.0
    }
    fn default_memory() -> f32 {
        90.0
    }
    fn default_temp() -> f32 {
        80.0
    }
    fn default_disk() -> f32 {
        90.0
    }
    fn default_budget_warning() -> f32 {
        80.0
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: Self::default_cpu(),
            memory_threshold: Self::default_memory(),
            temp_threshold: Self::default_temp(),
            disk_threshold: Self::default_disk(),
            budget_warning_pct: Self::default_budget_warning(),
        }
    }
}

// ── Budget ──────────────────────────────────────────────────────────────

/// Hard spend limits for paid providers, in USD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Daily hard stop. Remote calls are refused past this.
    #[serde(default = "BudgetConfig::default_daily")]
    pub daily_limit_usd: f64,
    /// Monthly hard stop.
    #[serde(default = "BudgetConfig::default_monthly")]
    pub monthly_limit_usd: f64,
}

impl BudgetConfig {
    fn default_daily() -> f64 {
        5.0
    }
    fn default_monthly() -> f64 {
        100.0
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit_usd: Self::default_daily(),
            monthly_limit_usd: Self::default_monthly(),
        }
    }
}

// ── Heartbeat (adaptive sleep) ──────────────────────────────────────────

/// One sleep tier of the adaptive scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SleepTier {
    /// Seconds to sleep between ticks while in this tier.
    #[serde(default)]
    pub cooldown: Option<f64>,
    /// Command tier only: how long after a user interaction the tier holds.
    #[serde(default)]
    pub duration: Option<f64>,
    /// Monitoring tier only: idle seconds before demotion to deep sleep.
    #[serde(default)]
    pub idle_threshold: Option<f64>,
    /// Deep-sleep tier only: upper bound on the cooldown.
    #[serde(default)]
    pub max_cooldown: Option<f64>,
}

/// A clock-hour window with either a fixed cooldown or a multiplier.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimeWindow {
    #[serde(default)]
    pub start_hour: Option<u32>,
    #[serde(default)]
    pub end_hour: Option<u32>,
    /// Fixed cooldown override in seconds (night mode).
    #[serde(default)]
    pub cooldown: Option<f64>,
    /// Sleep multiplier (work hours / evening).
    #[serde(default)]
    pub multiplier: Option<f64>,
}

/// Time-of-day awareness: night override plus daytime multipliers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeAwareness {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub night_mode: TimeWindow,
    #[serde(default)]
    pub work_hours: TimeWindow,
    #[serde(default)]
    pub evening: TimeWindow,
}

impl Default for TimeAwareness {
    fn default() -> Self {
        Self {
            enabled: true,
            night_mode: TimeWindow::default(),
            work_hours: TimeWindow::default(),
            evening: TimeWindow::default(),
        }
    }
}

/// The `adaptive_sleep` + `time_awareness` sections of `heartbeat.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub adaptive_sleep: AdaptiveSleep,
    #[serde(default)]
    pub time_awareness: TimeAwareness,
}

/// The three sleep tiers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdaptiveSleep {
    #[serde(default)]
    pub command_mode: SleepTier,
    #[serde(default)]
    pub monitoring_mode: SleepTier,
    #[serde(default)]
    pub deep_sleep_mode: SleepTier,
}

// ── Dream cycle ─────────────────────────────────────────────────────────

/// Idle-triggered background execution knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DreamConfig {
    /// Idle seconds before a dream cycle may start.
    #[serde(default = "DreamConfig::default_idle_threshold")]
    pub idle_threshold_secs: u64,
    /// How often the monitor polls for idleness.
    #[serde(default = "DreamConfig::default_check_interval")]
    pub check_interval_secs: u64,
    /// Maximum tasks executed per dream cycle.
    #[serde(default = "DreamConfig::default_max_tasks")]
    pub max_tasks_per_cycle: usize,
}

impl DreamConfig {
    fn default_idle_threshold() -> u64 {
        300
    }
    fn default_check_interval() -> u64 {
        30
    }
    fn default_max_tasks() -> usize {
        3
    }
}

impl Default for DreamConfig {
    fn default() -> Self {
        Self {
            idle_threshold_secs: Self::default_idle_threshold(),
            check_interval_secs: Self::default_check_interval(),
            max_tasks_per_cycle: Self::default_max_tasks(),
        }
    }
}

// ── Plan executor ───────────────────────────────────────────────────────

/// Reasoning-loop bounds and crash-recovery staleness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Step limit for general tasks.
    #[serde(default = "ExecutorConfig::default_max_steps")]
    pub max_steps: usize,
    /// Step limit for source-modification tasks.
    #[serde(default = "ExecutorConfig::default_source_max_steps")]
    pub source_max_steps: usize,
    /// Persisted execution state older than this is discarded on resume.
    #[serde(default = "ExecutorConfig::default_state_max_age_hours")]
    pub state_max_age_hours: u64,
}

impl ExecutorConfig {
    fn default_max_steps() -> usize {
        20
    }
    fn default_source_max_steps() -> usize {
        40
    }
    fn default_state_max_age_hours() -> u64 {
        24
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_steps: Self::default_max_steps(),
            source_max_steps: Self::default_source_max_steps(),
            state_max_age_hours: Self::default_state_max_age_hours(),
        }
    }
}

// ── Response cache ──────────────────────────────────────────────────────

/// TTL and size bound for the completion cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "CacheConfig::default_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "CacheConfig::default_max_entries")]
    pub max_entries: usize,
    /// When true, entries are also written to disk and survive restarts.
    #[serde(default)]
    pub durable: bool,
}

impl CacheConfig {
    fn default_ttl() -> u64 {
        3600
    }
    fn default_max_entries() -> usize {
        256
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: Self::default_ttl(),
            max_entries: Self::default_max_entries(),
            durable: false,
        }
    }
}

// ── Safety risk levels ──────────────────────────────────────────────────

/// One risk level: the actions it covers, the confidence floor, and what
/// the controller requires before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RiskLevel {
    /// Action names governed by this level.
    #[serde(default)]
    pub actions: Vec<String>,
    /// Minimum action confidence; below this the action is denied.
    #[serde(default)]
    pub threshold: f32,
    /// One of: autonomous, notify_and_log, human_approval, manual_execute_only.
    #[serde(default)]
    pub requirement: String,
}

// ── Service ports / browser ─────────────────────────────────────────────

/// Ports for the optional web surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsConfig {
    #[serde(default = "PortsConfig::default_dashboard")]
    pub dashboard: u16,
    #[serde(default = "PortsConfig::default_web_chat")]
    pub web_chat: u16,
}

impl PortsConfig {
    fn default_dashboard() -> u16 {
        5000
    }
    fn default_web_chat() -> u16 {
        5001
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            dashboard: Self::default_dashboard(),
            web_chat: Self::default_web_chat(),
        }
    }
}

/// Timeouts for browser-automation tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "BrowserConfig::default_timeout")]
    pub default_timeout_ms: u64,
    #[serde(default = "BrowserConfig::default_navigation")]
    pub navigation_timeout_ms: u64,
}

impl BrowserConfig {
    fn default_timeout() -> u64 {
        5000
    }
    fn default_navigation() -> u64 {
        30_000
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: Self::default_timeout(),
            navigation_timeout_ms: Self::default_navigation(),
        }
    }
}

// ── Root config ─────────────────────────────────────────────────────────

/// Root configuration, merged from `rules.yaml` and `heartbeat.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub dream: DreamConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Risk level name -> level definition, from `rules.yaml`.
    #[serde(default)]
    pub risk_levels: HashMap<String, RiskLevel>,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    /// Loaded separately from `heartbeat.yaml`.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

impl Config {
    /// Load configuration from `<config_dir>/rules.yaml` and
    /// `<config_dir>/heartbeat.yaml`.
    ///
    /// Missing or malformed files are logged and defaulted; this never
    /// returns an error.
    pub fn load(config_dir: &Path) -> Self {
        let mut config: Config = load_yaml(&config_dir.join("rules.yaml")).unwrap_or_default();
        if let Some(heartbeat) = load_yaml(&config_dir.join("heartbeat.yaml")) {
            config.heartbeat = heartbeat;
        }
        config
    }

    /// Resolve the data directory beside the config directory.
    ///
    /// `<project_root>/config` -> `<project_root>/data`.
    pub fn data_dir(config_dir: &Path) -> PathBuf {
        config_dir
            .parent()
            .map(|p| p.join("data"))
            .unwrap_or_else(|| PathBuf::from("data"))
    }
}

/// Load and deserialize a YAML file, logging (not raising) on failure.
fn load_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config file not loaded, using defaults");
            return None;
        }
    };
    match serde_yaml::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config file unparseable, using defaults");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.monitoring.cpu_threshold, 80.0);
        assert_eq!(config.monitoring.budget_warning_pct, 80.0);
        assert_eq!(config.budget.daily_limit_usd, 5.0);
        assert_eq!(config.budget.monthly_limit_usd, 100.0);
        assert_eq!(config.dream.idle_threshold_secs, 300);
        assert_eq!(config.dream.max_tasks_per_cycle, 3);
        assert_eq!(config.executor.max_steps, 20);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.ports.dashboard, 5000);
        assert_eq!(config.browser.navigation_timeout_ms, 30_000);
    }

    #[test]
    fn load_missing_dir_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/config"));
        assert_eq!(config.budget.daily_limit_usd, 5.0);
        assert!(config.risk_levels.is_empty());
    }

    #[test]
    fn load_partial_rules_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("rules.yaml"),
            "budget:\n  daily_limit_usd: 0.01\nmonitoring:\n  cpu_threshold: 50\n",
        )
        .unwrap();

        let config = Config::load(dir.path());
        assert_eq!(config.budget.daily_limit_usd, 0.01);
        // Unset keys in a present section still default.
        assert_eq!(config.budget.monthly_limit_usd, 100.0);
        assert_eq!(config.monitoring.cpu_threshold, 50.0);
        assert_eq!(config.monitoring.memory_threshold, 90.0);
    }

    #[test]
    fn load_heartbeat_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("heartbeat.yaml"),
            concat!(
                "adaptive_sleep:\n",
                "  command_mode:\n",
                "    cooldown: 5.0\n",
                "    duration: 60\n",
                "time_awareness:\n",
                "  night_mode:\n",
                "    start_hour: 23\n",
                "    end_hour: 6\n",
                "    cooldown: 1800\n",
            ),
        )
        .unwrap();

        let config = Config::load(dir.path());
        assert_eq!(config.heartbeat.adaptive_sleep.command_mode.cooldown, Some(5.0));
        assert_eq!(config.heartbeat.adaptive_sleep.command_mode.duration, Some(60.0));
        assert_eq!(config.heartbeat.time_awareness.night_mode.start_hour, Some(23));
        assert_eq!(config.heartbeat.time_awareness.night_mode.cooldown, Some(1800.0));
    }

    #[test]
    fn malformed_yaml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rules.yaml"), ": not valid yaml {{{{").unwrap();

        let config = Config::load(dir.path());
        assert_eq!(config.budget.daily_limit_usd, 5.0);
    }

    #[test]
    fn risk_levels_parse() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("rules.yaml"),
            concat!(
                "risk_levels:\n",
                "  low:\n",
                "    actions: [read_file, list_files]\n",
                "    threshold: 0.3\n",
                "    requirement: autonomous\n",
                "  high:\n",
                "    actions: [write_source]\n",
                "    threshold: 0.9\n",
                "    requirement: human_approval\n",
            ),
        )
        .unwrap();

        let config = Config::load(dir.path());
        assert_eq!(config.risk_levels.len(), 2);
        let low = &config.risk_levels["low"];
        assert_eq!(low.actions, vec!["read_file", "list_files"]);
        assert_eq!(low.requirement, "autonomous");
    }

    #[test]
    fn data_dir_beside_config() {
        let data = Config::data_dir(Path::new("/opt/archi/config"));
        assert_eq!(data, PathBuf::from("/opt/archi/data"));
    }

    #[test]
    fn config_serde_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.budget.daily_limit_usd, config.budget.daily_limit_usd);
        assert_eq!(parsed.executor.max_steps, config.executor.max_steps);
    }
}
