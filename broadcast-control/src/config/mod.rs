//! Orchestrator configuration.
//!
//! Configuration is a plain serde structure with per-field defaults. It can be
//! parsed from JSON or assembled from `BROADCAST_*` environment variables
//! (a `.env` file is honoured through `dotenvy`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Default probe timeout (5 seconds).
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;

/// Default timeout for calls into the media server and schedule store.
const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;

/// Default tick for the cue scheduler and update queue.
const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

/// How long finished cues stay queryable before the scheduler drops them.
pub const DEFAULT_EVENT_RETENTION_MS: u64 = 3_600_000;

/// Retention for the failover log and update history.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Default broadcast channel capacity for orchestrator events.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default log directory for the daemon.
const DEFAULT_LOG_DIR: &str = "logs";

/// Health monitor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Probe fallback sources on every rule tick so failover sees fresh health.
    #[serde(default = "default_true")]
    pub probe_fallbacks: bool,
    #[serde(default = "default_log_capacity")]
    pub event_log_capacity: usize,
}

impl MonitorConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_fallbacks: default_true(),
            event_log_capacity: default_log_capacity(),
        }
    }
}

/// Cue scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Executed, failed and cancelled cues older than this are purged.
    #[serde(default = "default_event_retention_ms")]
    pub event_retention_ms: u64,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn event_retention(&self) -> Duration {
        Duration::from_millis(self.event_retention_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            event_retention_ms: default_event_retention_ms(),
        }
    }
}

/// Update queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateQueueConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_log_capacity")]
    pub history_capacity: usize,
}

impl UpdateQueueConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for UpdateQueueConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            history_capacity: default_log_capacity(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub updates: UpdateQueueConfig,
    /// Upper bound for every media control and schedule store call.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// Optional tracing filter directive applied on startup.
    #[serde(default)]
    pub log_filter: Option<String>,
}

fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_event_retention_ms() -> u64 {
    DEFAULT_EVENT_RETENTION_MS
}

fn default_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_log_dir() -> String {
    DEFAULT_LOG_DIR.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            scheduler: SchedulerConfig::default(),
            updates: UpdateQueueConfig::default(),
            call_timeout_ms: default_call_timeout_ms(),
            event_capacity: default_event_capacity(),
            log_dir: default_log_dir(),
            log_filter: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded environment file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, starting from defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var::<u64>(&lookup, "BROADCAST_PROBE_TIMEOUT_MS")? {
            config.monitor.probe_timeout_ms = v;
        }
        if let Some(v) = parse_var::<bool>(&lookup, "BROADCAST_PROBE_FALLBACKS")? {
            config.monitor.probe_fallbacks = v;
        }
        if let Some(v) = parse_var::<usize>(&lookup, "BROADCAST_FAILOVER_LOG_CAPACITY")? {
            config.monitor.event_log_capacity = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "BROADCAST_SCHEDULER_TICK_MS")? {
            config.scheduler.tick_interval_ms = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "BROADCAST_EVENT_RETENTION_MS")? {
            config.scheduler.event_retention_ms = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "BROADCAST_UPDATE_TICK_MS")? {
            config.updates.tick_interval_ms = v;
        }
        if let Some(v) = parse_var::<usize>(&lookup, "BROADCAST_UPDATE_HISTORY_CAPACITY")? {
            config.updates.history_capacity = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "BROADCAST_CALL_TIMEOUT_MS")? {
            config.call_timeout_ms = v;
        }
        if let Some(v) = parse_var::<usize>(&lookup, "BROADCAST_EVENT_CAPACITY")? {
            config.event_capacity = v;
        }
        if let Some(v) = lookup("BROADCAST_LOG_DIR") {
            config.log_dir = v;
        }
        if let Some(v) = lookup("BROADCAST_LOG_FILTER") {
            config.log_filter = Some(v);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.monitor.probe_timeout_ms == 0 {
            return Err(Error::config("probe timeout must be greater than zero"));
        }
        if self.call_timeout_ms == 0 {
            return Err(Error::config("call timeout must be greater than zero"));
        }
        if self.scheduler.tick_interval_ms == 0 || self.updates.tick_interval_ms == 0 {
            return Err(Error::config("tick intervals must be greater than zero"));
        }
        if self.monitor.event_log_capacity == 0 || self.updates.history_capacity == 0 {
            return Err(Error::config("log capacities must be greater than zero"));
        }
        if self.event_capacity == 0 {
            return Err(Error::config("event capacity must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::config(format!("invalid value for {}: {} ({})", key, raw, e))),
        None => Ok(None),
    }
}
