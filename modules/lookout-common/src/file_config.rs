use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// TOML-backed policy settings. Every field has a default; a missing file
/// means "all defaults".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub supervisor: SupervisorSettings,
    pub policy: PolicySettings,
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorSettings {
    pub reconcile_interval_secs: u64,
    /// How long a stopping worker gets before it is force-terminated.
    pub stop_grace_secs: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 60,
            stop_grace_secs: 30,
        }
    }
}

impl SupervisorSettings {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicySettings {
    pub heartbeat_timeout_secs: u64,
    /// Time a fresh worker has to produce its first heartbeat.
    pub startup_grace_secs: u64,
    /// Restarts within `restart_window_secs` that escalate to `error`.
    pub max_restarts: u32,
    pub restart_window_secs: u64,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 300,
            startup_grace_secs: 300,
            max_restarts: 3,
            restart_window_secs: 900,
        }
    }
}

impl PolicySettings {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }

    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSettings {
    pub poll_interval_secs: u64,
    /// Capacity of the push-channel buffer between engine and worker.
    pub push_buffer: usize,
    pub nudge_min_gap_secs: u64,
    pub nudge_hourly_cap: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 45,
            push_buffer: 256,
            nudge_min_gap_secs: 60,
            nudge_hourly_cap: 60,
        }
    }
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn nudge_min_gap(&self) -> Duration {
        Duration::from_secs(self.nudge_min_gap_secs)
    }
}

/// Load and parse a TOML settings file.
pub fn load_settings(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
    parse_settings(&content)
        .with_context(|| format!("Failed to parse settings file: {}", path.display()))
}

pub fn parse_settings(content: &str) -> Result<Settings> {
    Ok(toml::from_str(content)?)
}
