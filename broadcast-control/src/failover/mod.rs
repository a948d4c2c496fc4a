//! Failover controller.
//!
//! Picks a healthy fallback in configured priority order and redirects the
//! channel through [`MediaControl`]. Every attempt, successful or not, ends
//! up as an immutable [`FailoverEvent`] in the shared failover log.
//!
//! Redirects are best-effort: a failed or timed-out call leaves the active
//! source untouched and the next monitor tick is the retry path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::domain::{FailoverEvent, FailoverEventKind, FailoverRule, StreamSource};
use crate::events::{BoundedLog, EventBroadcaster, OrchestratorEvent};
use crate::media::{MediaControl, bounded};
use crate::registry::StreamRegistry;
use crate::{Error, Result};

pub struct FailoverController {
    registry: Arc<StreamRegistry>,
    media: Arc<dyn MediaControl>,
    clock: SharedClock,
    log: Arc<BoundedLog<FailoverEvent>>,
    broadcaster: EventBroadcaster,
    call_timeout: Duration,
    /// Source currently feeding each channel, as far as we redirected it.
    active_sources: DashMap<String, String>,
    /// Serializes switches per channel.
    channel_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FailoverController {
    pub fn new(
        registry: Arc<StreamRegistry>,
        media: Arc<dyn MediaControl>,
        clock: SharedClock,
        log: Arc<BoundedLog<FailoverEvent>>,
        broadcaster: EventBroadcaster,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            media,
            clock,
            log,
            broadcaster,
            call_timeout,
            active_sources: DashMap::new(),
            channel_locks: DashMap::new(),
        }
    }

    /// Source the channel was last redirected to.
    pub fn active_source(&self, channel_id: &str) -> Option<String> {
        self.active_sources
            .get(channel_id)
            .map(|entry| entry.value().clone())
    }

    /// Mark `source_id` as the channel's current input without redirecting,
    /// e.g. when the media server was already playing it at startup.
    pub fn set_active_source(&self, channel_id: &str, source_id: &str) {
        self.active_sources
            .insert(channel_id.to_string(), source_id.to_string());
    }

    /// Whether the channel is fed by the rule's primary (or nothing is known yet).
    pub fn is_on_primary(&self, rule: &FailoverRule) -> bool {
        self.active_source(&rule.channel_id)
            .is_none_or(|active| active == rule.primary_source_id)
    }

    /// Most recent failover log entries, newest first.
    pub fn failover_events(&self, limit: usize) -> Vec<FailoverEvent> {
        self.log.recent(limit)
    }

    pub fn channel_events(&self, channel_id: &str, limit: usize) -> Vec<FailoverEvent> {
        self.log
            .recent_matching(limit, |event| event.channel_id == channel_id)
    }

    /// First fallback, in configured order, that exists and is healthy.
    pub fn select_fallback(&self, rule: &FailoverRule) -> Option<StreamSource> {
        rule.fallback_source_ids
            .iter()
            .filter_map(|id| self.registry.get_source(id))
            .find(StreamSource::is_healthy)
    }

    /// Redirect a channel to a specific source on operator request.
    pub async fn switch_to_source(
        &self,
        channel_id: &str,
        source_id: &str,
        reason: &str,
    ) -> Result<FailoverEvent> {
        let lock = self.channel_lock(channel_id);
        let _guard = lock.lock().await;

        let from = self.active_source(channel_id);
        let Some(target) = self.registry.get_source(source_id) else {
            self.record(
                FailoverEvent::new(
                    channel_id,
                    FailoverEventKind::SwitchFailed,
                    self.clock.now(),
                    format!("{}: unknown source {}", reason, source_id),
                )
                .from_source(from),
            );
            return Err(Error::not_found("StreamSource", source_id));
        };

        let event = self
            .redirect(channel_id, from, &target, FailoverEventKind::ManualSwitch, reason)
            .await;
        if event.kind == FailoverEventKind::SwitchFailed {
            return Err(Error::external("redirect_channel", event.reason));
        }
        Ok(event)
    }

    /// Move the rule's channel to its best healthy fallback.
    ///
    /// Appends a `switch_failed` event and leaves the channel alone when no
    /// fallback is healthy or the redirect fails.
    pub async fn switch_to_fallback(&self, rule: &FailoverRule) -> FailoverEvent {
        let lock = self.channel_lock(&rule.channel_id);
        let _guard = lock.lock().await;

        let from = self
            .active_source(&rule.channel_id)
            .or_else(|| Some(rule.primary_source_id.clone()));

        let Some(target) = self.select_fallback(rule) else {
            warn!(
                rule_id = %rule.id,
                channel_id = %rule.channel_id,
                "No healthy fallback available"
            );
            return self.record(
                FailoverEvent::new(
                    &rule.channel_id,
                    FailoverEventKind::SwitchFailed,
                    self.clock.now(),
                    "no healthy fallback source available",
                )
                .from_source(from),
            );
        };

        let delay = rule.switch_delay();
        if !delay.is_zero() {
            debug!(
                rule_id = %rule.id,
                delay_ms = delay.as_millis() as u64,
                "Waiting for switch settle delay"
            );
            tokio::time::sleep(delay).await;
        }

        let reason = format!(
            "primary {} unhealthy after {} consecutive errors",
            rule.primary_source_id, rule.max_errors
        );
        self.redirect(
            &rule.channel_id,
            from,
            &target,
            FailoverEventKind::SwitchedToFallback,
            &reason,
        )
        .await
    }

    /// Move the rule's channel back to its primary.
    pub(crate) async fn recover_to_primary(&self, rule: &FailoverRule) -> FailoverEvent {
        let lock = self.channel_lock(&rule.channel_id);
        let _guard = lock.lock().await;

        let from = self.active_source(&rule.channel_id);
        let Some(primary) = self.registry.get_source(&rule.primary_source_id) else {
            return self.record(
                FailoverEvent::new(
                    &rule.channel_id,
                    FailoverEventKind::SwitchFailed,
                    self.clock.now(),
                    format!("primary {} no longer registered", rule.primary_source_id),
                )
                .from_source(from),
            );
        };

        self.redirect(
            &rule.channel_id,
            from,
            &primary,
            FailoverEventKind::RecoveredToPrimary,
            "primary recovered",
        )
        .await
    }

    /// Append an event to the failover log and publish it.
    pub(crate) fn record(&self, event: FailoverEvent) -> FailoverEvent {
        debug!(event = %event.description(), "Failover event recorded");
        self.log.push(event.clone());
        self.broadcaster
            .publish(OrchestratorEvent::Failover(event.clone()));
        event
    }

    /// Forget a channel's state when it is no longer protected by any rule.
    pub(crate) fn forget_channel(&self, channel_id: &str) {
        self.active_sources.remove(channel_id);
        self.channel_locks.remove(channel_id);
    }

    async fn redirect(
        &self,
        channel_id: &str,
        from: Option<String>,
        target: &StreamSource,
        kind: FailoverEventKind,
        reason: &str,
    ) -> FailoverEvent {
        let started = Instant::now();
        let result = bounded(
            "redirect_channel",
            self.call_timeout,
            self.media.redirect_channel(channel_id, target),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                self.active_sources
                    .insert(channel_id.to_string(), target.id.clone());
                info!(
                    channel_id,
                    from = ?from,
                    to = %target.id,
                    %kind,
                    "Channel switched"
                );
                self.record(
                    FailoverEvent::new(channel_id, kind, self.clock.now(), reason)
                        .from_source(from)
                        .to_source(Some(target.id.clone()))
                        .with_duration_ms(elapsed_ms),
                )
            }
            Err(e) => {
                warn!(
                    channel_id,
                    to = %target.id,
                    %kind,
                    error = %e,
                    "Channel switch failed"
                );
                self.record(
                    FailoverEvent::new(
                        channel_id,
                        FailoverEventKind::SwitchFailed,
                        self.clock.now(),
                        format!("{} to {} failed: {}", kind, target.id, e),
                    )
                    .from_source(from)
                    .to_source(Some(target.id.clone()))
                    .with_duration_ms(elapsed_ms),
                )
            }
        }
    }

    fn channel_lock(&self, channel_id: &str) -> Arc<Mutex<()>> {
        self.channel_locks
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
