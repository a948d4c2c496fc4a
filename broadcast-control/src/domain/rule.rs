//! Failover rule entity.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a channel is protected: which source is primary, which sources back
/// it up (in priority order), and how aggressively it is probed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverRule {
    pub id: String,
    pub channel_id: String,
    pub primary_source_id: String,
    /// Fallbacks in priority order; the first healthy one wins.
    #[serde(default)]
    pub fallback_source_ids: Vec<String>,
    pub health_check_interval_ms: u64,
    /// Consecutive failed probes before the primary is declared unhealthy.
    pub max_errors: u32,
    /// Settle delay applied before redirecting to a fallback.
    #[serde(default)]
    pub switch_delay_ms: u64,
    #[serde(default)]
    pub auto_recovery: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl FailoverRule {
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        primary_source_id: impl Into<String>,
        fallback_source_ids: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
            primary_source_id: primary_source_id.into(),
            fallback_source_ids,
            health_check_interval_ms: 5_000,
            max_errors: 3,
            switch_delay_ms: 0,
            auto_recovery: false,
            enabled: true,
        }
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn switch_delay(&self) -> Duration {
        Duration::from_millis(self.switch_delay_ms)
    }

    /// Whether `source_id` is referenced by this rule, as primary or fallback.
    pub fn references(&self, source_id: &str) -> bool {
        self.primary_source_id == source_id
            || self.fallback_source_ids.iter().any(|id| id == source_id)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.id.trim().is_empty() {
            return Err(crate::Error::validation("rule id must not be empty"));
        }
        if self.channel_id.trim().is_empty() {
            return Err(crate::Error::validation(format!(
                "rule {} has an empty channel id",
                self.id
            )));
        }
        if self.health_check_interval_ms == 0 {
            return Err(crate::Error::validation(format!(
                "rule {} must have a non-zero health check interval",
                self.id
            )));
        }
        if self.max_errors == 0 {
            return Err(crate::Error::validation(format!(
                "rule {} must tolerate at least one error",
                self.id
            )));
        }
        if self
            .fallback_source_ids
            .iter()
            .any(|id| id == &self.primary_source_id)
        {
            return Err(crate::Error::validation(format!(
                "rule {} lists its primary source as a fallback",
                self.id
            )));
        }
        Ok(())
    }
}
