//! Stream registry.
//!
//! In-memory catalog of source definitions, their live health, and the
//! failover rules that reference them. Definitions are managed through the
//! public API; health fields are written only by the health monitor through
//! the crate-private `record_probe_*` methods. Every read returns a copy.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::domain::{FailoverRule, HealthStatus, StreamSource};
use crate::{Error, Result};

/// Health of a source before and after a probe was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProbeRecord {
    pub previous: HealthStatus,
    pub current: HealthStatus,
    pub error_count: u32,
}

impl ProbeRecord {
    pub fn became_healthy(&self) -> bool {
        self.previous == HealthStatus::Unhealthy && self.current == HealthStatus::Healthy
    }

    pub fn became_unhealthy(&self) -> bool {
        self.previous != HealthStatus::Unhealthy && self.current == HealthStatus::Unhealthy
    }
}

#[derive(Debug, Default)]
pub struct StreamRegistry {
    sources: DashMap<String, StreamSource>,
    rules: DashMap<String, FailoverRule>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Sources ==========

    pub fn add_source(&self, source: StreamSource) -> Result<()> {
        source.validate()?;
        if self.sources.contains_key(&source.id) {
            return Err(Error::validation(format!(
                "source {} already exists",
                source.id
            )));
        }
        info!(source_id = %source.id, source_type = %source.source_type, "Source added");
        self.sources.insert(source.id.clone(), source);
        Ok(())
    }

    /// Remove a source. Rules keep their references; a missing fallback is
    /// simply skipped during selection.
    pub fn remove_source(&self, id: &str) -> Result<StreamSource> {
        let (_, source) = self
            .sources
            .remove(id)
            .ok_or_else(|| Error::not_found("StreamSource", id))?;
        info!(source_id = %id, "Source removed");
        Ok(source)
    }

    pub fn get_source(&self, id: &str) -> Option<StreamSource> {
        self.sources.get(id).map(|entry| entry.clone())
    }

    pub fn contains_source(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    /// All sources, ordered by priority then id.
    pub fn sources(&self) -> Vec<StreamSource> {
        let mut sources: Vec<StreamSource> =
            self.sources.iter().map(|entry| entry.clone()).collect();
        sources.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        sources
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    // ========== Rules ==========

    pub fn add_rule(&self, rule: FailoverRule) -> Result<()> {
        self.check_rule(&rule)?;
        if self.rules.contains_key(&rule.id) {
            return Err(Error::validation(format!("rule {} already exists", rule.id)));
        }
        info!(rule_id = %rule.id, channel_id = %rule.channel_id, "Failover rule added");
        self.rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    /// Replace an existing rule, returning the previous definition.
    pub fn update_rule(&self, rule: FailoverRule) -> Result<FailoverRule> {
        self.check_rule(&rule)?;
        let mut entry = self
            .rules
            .get_mut(&rule.id)
            .ok_or_else(|| Error::not_found("FailoverRule", rule.id.clone()))?;
        let previous = std::mem::replace(entry.value_mut(), rule);
        debug!(rule_id = %previous.id, "Failover rule updated");
        Ok(previous)
    }

    pub fn remove_rule(&self, id: &str) -> Result<FailoverRule> {
        let (_, rule) = self
            .rules
            .remove(id)
            .ok_or_else(|| Error::not_found("FailoverRule", id))?;
        info!(rule_id = %id, "Failover rule removed");
        Ok(rule)
    }

    pub fn get_rule(&self, id: &str) -> Option<FailoverRule> {
        self.rules.get(id).map(|entry| entry.clone())
    }

    /// All rules, ordered by id.
    pub fn rules(&self) -> Vec<FailoverRule> {
        let mut rules: Vec<FailoverRule> = self.rules.iter().map(|entry| entry.clone()).collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    pub fn enabled_rules(&self) -> Vec<FailoverRule> {
        self.rules().into_iter().filter(|rule| rule.enabled).collect()
    }

    /// Rules whose primary is `source_id`.
    pub fn rules_with_primary(&self, source_id: &str) -> Vec<FailoverRule> {
        self.rules()
            .into_iter()
            .filter(|rule| rule.primary_source_id == source_id)
            .collect()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    fn check_rule(&self, rule: &FailoverRule) -> Result<()> {
        rule.validate()?;
        if !self.contains_source(&rule.primary_source_id) {
            return Err(Error::not_found(
                "StreamSource",
                rule.primary_source_id.clone(),
            ));
        }
        if let Some(missing) = rule
            .fallback_source_ids
            .iter()
            .find(|id| !self.contains_source(id))
        {
            return Err(Error::not_found("StreamSource", missing.clone()));
        }
        Ok(())
    }

    // ========== Health (written by the health monitor only) ==========

    /// Record a successful probe: the error counter resets and the source is healthy.
    pub(crate) fn record_probe_success(
        &self,
        id: &str,
        at: DateTime<Utc>,
        response_time_ms: u64,
    ) -> Option<ProbeRecord> {
        let mut source = self.sources.get_mut(id)?;
        let previous = source.health_status;
        source.error_count = 0;
        source.health_status = HealthStatus::Healthy;
        source.last_check = Some(at);
        source.response_time_ms = Some(response_time_ms);

        Some(ProbeRecord {
            previous,
            current: source.health_status,
            error_count: 0,
        })
    }

    /// Record a failed probe. The source turns unhealthy once the consecutive
    /// error count reaches `max_errors`.
    pub(crate) fn record_probe_failure(
        &self,
        id: &str,
        at: DateTime<Utc>,
        max_errors: u32,
    ) -> Option<ProbeRecord> {
        let mut source = self.sources.get_mut(id)?;
        let previous = source.health_status;
        source.error_count = source.error_count.saturating_add(1);
        source.last_check = Some(at);
        source.response_time_ms = None;
        if source.error_count >= max_errors {
            source.health_status = HealthStatus::Unhealthy;
        }

        Some(ProbeRecord {
            previous,
            current: source.health_status,
            error_count: source.error_count,
        })
    }
}
