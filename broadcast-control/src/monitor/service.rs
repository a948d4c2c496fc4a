//! Health monitor service.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::probe::ProbeStrategies;
use crate::clock::SharedClock;
use crate::config::MonitorConfig;
use crate::domain::{FailoverEvent, FailoverEventKind, FailoverRule, HealthStatus, StreamSource};
use crate::failover::FailoverController;
use crate::registry::StreamRegistry;
use crate::{Error, Result};

/// Snapshot of the monitor for the status surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitoringStatus {
    pub monitoring: bool,
    pub source_count: usize,
    pub rule_count: usize,
    pub enabled_rule_count: usize,
    pub active_loops: usize,
    pub healthy_sources: usize,
    pub unhealthy_sources: usize,
}

/// A running per-rule probe loop.
struct RuleLoop {
    interval: Duration,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Probe-and-react logic shared by every rule loop.
struct RuleChecker {
    registry: Arc<StreamRegistry>,
    controller: Arc<FailoverController>,
    probes: ProbeStrategies,
    clock: SharedClock,
    probe_fallbacks: bool,
}

impl RuleChecker {
    async fn check(&self, rule_id: &str) -> Result<()> {
        let rule = self
            .registry
            .get_rule(rule_id)
            .ok_or_else(|| Error::not_found("FailoverRule", rule_id))?;
        if !rule.enabled {
            return Ok(());
        }

        if self.probe_fallbacks {
            for fallback_id in &rule.fallback_source_ids {
                self.probe_fallback(fallback_id, rule.max_errors).await;
            }
        }

        let Some(primary) = self.registry.get_source(&rule.primary_source_id) else {
            warn!(
                rule_id = %rule.id,
                source_id = %rule.primary_source_id,
                "Primary source is not registered, skipping probe"
            );
            return Ok(());
        };

        match self.probes.probe(&primary).await {
            Ok(response_time) => self.on_probe_success(&rule, &primary, response_time).await,
            Err(e) => self.on_probe_failure(&rule, &primary, &e).await,
        }
        Ok(())
    }

    async fn on_probe_success(
        &self,
        rule: &FailoverRule,
        primary: &StreamSource,
        response_time: Duration,
    ) {
        let response_ms = response_time.as_millis() as u64;
        let Some(record) =
            self.registry
                .record_probe_success(&primary.id, self.clock.now(), response_ms)
        else {
            return;
        };

        if !record.became_healthy() {
            debug!(source_id = %primary.id, response_ms, "Probe succeeded");
            return;
        }

        info!(rule_id = %rule.id, source_id = %primary.id, "Primary source recovered");
        self.controller.record(
            FailoverEvent::new(
                &rule.channel_id,
                FailoverEventKind::ProbeRecovered,
                self.clock.now(),
                format!("{} answered in {}ms", primary.id, response_ms),
            )
            .to_source(Some(primary.id.clone()))
            .with_duration_ms(response_ms),
        );

        if rule.auto_recovery && !self.controller.is_on_primary(rule) {
            self.controller.recover_to_primary(rule).await;
        }
    }

    async fn on_probe_failure(&self, rule: &FailoverRule, primary: &StreamSource, error: &Error) {
        let Some(record) =
            self.registry
                .record_probe_failure(&primary.id, self.clock.now(), rule.max_errors)
        else {
            return;
        };

        warn!(
            rule_id = %rule.id,
            source_id = %primary.id,
            error_count = record.error_count,
            max_errors = rule.max_errors,
            error = %error,
            "Probe failed"
        );
        if record.became_unhealthy() {
            error!(
                rule_id = %rule.id,
                source_id = %primary.id,
                channel_id = %rule.channel_id,
                "Primary source marked unhealthy"
            );
        }
        self.controller.record(
            FailoverEvent::new(
                &rule.channel_id,
                FailoverEventKind::ProbeFailed,
                self.clock.now(),
                format!("({}/{}) {}", record.error_count, rule.max_errors, error),
            )
            .from_source(Some(primary.id.clone())),
        );

        // Once on a fallback, further failures of the primary change nothing.
        if record.error_count >= rule.max_errors && self.controller.is_on_primary(rule) {
            self.controller.switch_to_fallback(rule).await;
        }
    }

    /// Refresh a fallback's health without emitting events.
    async fn probe_fallback(&self, source_id: &str, max_errors: u32) {
        let Some(source) = self.registry.get_source(source_id) else {
            return;
        };
        match self.probes.probe(&source).await {
            Ok(response_time) => {
                self.registry.record_probe_success(
                    source_id,
                    self.clock.now(),
                    response_time.as_millis() as u64,
                );
            }
            Err(e) => {
                debug!(source_id, error = %e, "Fallback probe failed");
                let record =
                    self.registry
                        .record_probe_failure(source_id, self.clock.now(), max_errors);
                if record.is_some_and(|r| r.became_unhealthy()) {
                    info!(source_id, "Fallback source marked unhealthy");
                }
            }
        }
    }
}

/// Owns the per-rule probe loops.
pub struct HealthMonitor {
    checker: Arc<RuleChecker>,
    loops: DashMap<String, RuleLoop>,
    /// Parent token while monitoring is on.
    root: Mutex<Option<CancellationToken>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<StreamRegistry>,
        controller: Arc<FailoverController>,
        probes: ProbeStrategies,
        clock: SharedClock,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            checker: Arc::new(RuleChecker {
                registry,
                controller,
                probes,
                clock,
                probe_fallbacks: config.probe_fallbacks,
            }),
            loops: DashMap::new(),
            root: Mutex::new(None),
        }
    }

    fn registry(&self) -> &StreamRegistry {
        &self.checker.registry
    }

    // ========== Sources ==========

    pub fn add_source(&self, source: StreamSource) -> Result<()> {
        self.registry().add_source(source)
    }

    /// Remove a source and stop every loop probing it as a primary.
    pub fn remove_source(&self, source_id: &str) -> Result<StreamSource> {
        let removed = self.registry().remove_source(source_id)?;
        for rule in self.registry().rules_with_primary(source_id) {
            self.stop_rule_loop(&rule.id);
        }
        Ok(removed)
    }

    pub fn get_sources(&self) -> Vec<StreamSource> {
        self.registry().sources()
    }

    // ========== Rules ==========

    pub fn add_rule(&self, rule: FailoverRule) -> Result<()> {
        let rule_id = rule.id.clone();
        self.registry().add_rule(rule)?;
        self.sync_rule_loop(&rule_id);
        Ok(())
    }

    /// Replace a rule; its loop is started, restarted or stopped to match.
    pub fn update_rule(&self, rule: FailoverRule) -> Result<()> {
        let rule_id = rule.id.clone();
        self.registry().update_rule(rule)?;
        self.sync_rule_loop(&rule_id);
        Ok(())
    }

    pub fn remove_rule(&self, rule_id: &str) -> Result<FailoverRule> {
        self.stop_rule_loop(rule_id);
        let rule = self.registry().remove_rule(rule_id)?;
        let channel_still_protected = self
            .registry()
            .rules()
            .iter()
            .any(|other| other.channel_id == rule.channel_id);
        if !channel_still_protected {
            self.checker.controller.forget_channel(&rule.channel_id);
        }
        Ok(rule)
    }

    pub fn get_rules(&self) -> Vec<FailoverRule> {
        self.registry().rules()
    }

    // ========== Lifecycle ==========

    /// Start a loop for every enabled rule. Returns the number of loops running.
    pub fn start_monitoring(&self) -> usize {
        {
            let mut root = self.root.lock();
            if root.is_some() {
                return self.loops.len();
            }
            *root = Some(CancellationToken::new());
        }

        for rule in self.registry().enabled_rules() {
            self.sync_rule_loop(&rule.id);
        }
        info!(loops = self.loops.len(), "Health monitoring started");
        self.loops.len()
    }

    /// Stop every loop. In-flight checks finish but no new tick starts.
    pub fn stop_monitoring(&self) {
        let Some(root) = self.root.lock().take() else {
            return;
        };
        root.cancel();
        self.loops.clear();
        info!("Health monitoring stopped");
    }

    /// Stop monitoring and wait for in-flight checks to finish.
    pub async fn shutdown(&self, grace: Duration) {
        if let Some(root) = self.root.lock().take() {
            root.cancel();
        }
        let loops: Vec<String> = self.loops.iter().map(|e| e.key().clone()).collect();
        for rule_id in loops {
            if let Some((_, rule_loop)) = self.loops.remove(&rule_id)
                && tokio::time::timeout(grace, rule_loop.handle).await.is_err()
            {
                warn!(rule_id = %rule_id, "Rule loop did not stop in time");
            }
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.root.lock().is_some()
    }

    // ========== Status ==========

    pub fn get_status(&self) -> MonitoringStatus {
        let sources = self.registry().sources();
        let rules = self.registry().rules();
        MonitoringStatus {
            monitoring: self.is_monitoring(),
            source_count: sources.len(),
            rule_count: rules.len(),
            enabled_rule_count: rules.iter().filter(|r| r.enabled).count(),
            active_loops: self.loops.len(),
            healthy_sources: sources
                .iter()
                .filter(|s| s.health_status == HealthStatus::Healthy)
                .count(),
            unhealthy_sources: sources
                .iter()
                .filter(|s| s.health_status == HealthStatus::Unhealthy)
                .count(),
        }
    }

    /// Most recent failover log entries, newest first.
    pub fn get_failover_events(&self, limit: usize) -> Vec<FailoverEvent> {
        self.checker.controller.failover_events(limit)
    }

    /// Run one probe cycle for a rule outside its timer.
    pub async fn check_rule(&self, rule_id: &str) -> Result<()> {
        self.checker.check(rule_id).await
    }

    /// Bring a rule's loop in line with its definition and the monitoring flag.
    fn sync_rule_loop(&self, rule_id: &str) {
        let root = self.root.lock().clone();
        let rule = self.registry().get_rule(rule_id);

        let (Some(root), Some(rule)) = (root, rule) else {
            self.stop_rule_loop(rule_id);
            return;
        };
        if !rule.enabled || !self.registry().contains_source(&rule.primary_source_id) {
            self.stop_rule_loop(rule_id);
            return;
        }

        // Check and replace under the entry so concurrent updates cannot
        // leave an uncancelled loop behind.
        let interval = rule.health_check_interval();
        match self.loops.entry(rule_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get();
                if existing.interval == interval && !existing.handle.is_finished() {
                    return;
                }
                let replaced = occupied.insert(self.spawn_rule_loop(&root, rule_id, interval));
                replaced.token.cancel();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(self.spawn_rule_loop(&root, rule_id, interval));
            }
        }
    }

    fn spawn_rule_loop(
        &self,
        root: &CancellationToken,
        rule_id: &str,
        interval: Duration,
    ) -> RuleLoop {
        let token = root.child_token();
        let handle = tokio::spawn(run_rule_loop(
            self.checker.clone(),
            rule_id.to_string(),
            interval,
            token.clone(),
        ));
        debug!(rule_id, interval_ms = interval.as_millis() as u64, "Rule loop started");
        RuleLoop {
            interval,
            token,
            handle,
        }
    }

    fn stop_rule_loop(&self, rule_id: &str) {
        if let Some((_, rule_loop)) = self.loops.remove(rule_id) {
            rule_loop.token.cancel();
            debug!(rule_id, "Rule loop stopped");
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(root) = self.root.get_mut().take() {
            root.cancel();
        }
    }
}

async fn run_rule_loop(
    checker: Arc<RuleChecker>,
    rule_id: String,
    interval: Duration,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = checker.check(&rule_id).await {
                    warn!(rule_id = %rule_id, error = %e, "Rule check failed, stopping loop");
                    break;
                }
            }
        }
    }
    debug!(rule_id = %rule_id, "Rule loop exited");
}
