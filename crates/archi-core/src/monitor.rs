//! Host health monitoring: CPU, memory, disk, and temperature sampling.
//!
//! `should_throttle()` feeds the agent loop's sleep multiplier so a hot or
//! busy machine gets left alone. Temperature sensors are frequently absent
//! (most VMs, many laptops under Windows); a missing sensor is not an
//! alert.

use std::sync::Mutex;

use serde::Serialize;
use sysinfo::{Components, Disks, System};
use tracing::warn;

/// Current system health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Global CPU usage percent.
    pub cpu: f32,
    /// Memory usage percent.
    pub memory: f32,
    /// Highest disk usage percent across mounted disks.
    pub disk: f32,
    /// Hottest component temperature in Celsius, when sensors exist.
    pub temperature: Option<f32>,
    /// Threshold breaches: `high_cpu`, `high_memory`, `high_temperature`,
    /// `low_disk_space`.
    pub alerts: Vec<String>,
}

/// Samples host health against configured thresholds.
pub struct SystemMonitor {
    system: Mutex<System>,
    cpu_threshold: f32,
    memory_threshold: f32,
    temp_threshold: f32,
    disk_threshold: f32,
}

impl SystemMonitor {
    pub fn new(
        cpu_threshold: f32,
        memory_threshold: f32,
        temp_threshold: f32,
        disk_threshold: f32,
    ) -> Self {
        Self {
            system: Mutex::new(System::new()),
            cpu_threshold,
            memory_threshold,
            temp_threshold,
            disk_threshold,
        }
    }

    /// Sample CPU, memory, disk, and temperature; populate alerts for any
    /// value over its threshold.
    pub fn check_health(&self) -> HealthStatus {
        let mut alerts = Vec::new();

        let (cpu, memory) = {
            let mut system = self.system.lock().expect("system monitor lock poisoned");
            system.refresh_cpu_usage();
            system.refresh_memory();
            let cpu = system.global_cpu_usage();
            let memory = if system.total_memory() > 0 {
                system.used_memory() as f32 / system.total_memory() as f32 * 100.0
            } else {
                0.0
            };
            (cpu, memory)
        };

        if cpu > self.cpu_threshold {
            alerts.push("high_cpu".to_string());
            warn!(cpu, "high CPU");
        }
        if memory > self.memory_threshold {
            alerts.push("high_memory".to_string());
            warn!(memory, "high memory");
        }

        let temperature = max_component_temperature();
        if let Some(temp) = temperature
            && temp > self.temp_threshold
        {
            alerts.push("high_temperature".to_string());
            warn!(temperature = temp, "high temperature");
        }

        let disk = max_disk_usage_percent();
        if disk > self.disk_threshold {
            alerts.push("low_disk_space".to_string());
            warn!(disk, "low disk space");
        }

        HealthStatus {
            cpu,
            memory,
            disk,
            temperature,
            alerts,
        }
    }

    /// True when CPU or temperature is over threshold, so the agent loop
    /// can stretch its sleep.
    pub fn should_throttle(&self) -> bool {
        let health = self.check_health();
        if health.cpu > self.cpu_threshold {
            return true;
        }
        matches!(health.temperature, Some(t) if t > self.temp_threshold)
    }
}

/// Hottest finite component temperature, if any sensors are exposed.
fn max_component_temperature() -> Option<f32> {
    let components = Components::new_with_refreshed_list();
    components
        .iter()
        .map(|c| c.temperature())
        .filter(|t| t.is_finite())
        .fold(None, |max, t| match max {
            Some(m) if m >= t => Some(m),
            _ => Some(t),
        })
}

/// Highest usage percent across mounted disks.
fn max_disk_usage_percent() -> f32 {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|d| d.total_space() > 0)
        .map(|d| {
            let used = d.total_space() - d.available_space();
            used as f32 / d.total_space() as f32 * 100.0
        })
        .fold(0.0, f32::max)
}
