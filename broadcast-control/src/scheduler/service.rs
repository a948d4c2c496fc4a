//! Cue scheduler service.
//!
//! Holds program configs and the scheduled events planned from them, and
//! runs a single-flight tick that injects due markers through
//! [`MediaControl`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::marker::MarkerAllocator;
use super::timeline::{execution_order, plan_program};
use crate::clock::{SharedClock, sub_duration};
use crate::config::DEFAULT_EVENT_RETENTION_MS;
use crate::domain::{CueKind, EventStatus, ProgramConfig, ProgramConfigPatch, ScheduledEvent};
use crate::events::{EventBroadcaster, OrchestratorEvent};
use crate::media::{MediaControl, bounded};
use crate::{Error, Result};

/// Snapshot of the scheduler for the status surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub program_count: usize,
    pub total_events: usize,
    pub scheduled: usize,
    pub executed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub next_event_time: Option<DateTime<Utc>>,
    pub next_marker_id: u64,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub executed: usize,
    pub failed: usize,
    /// Another tick was still running.
    pub skipped: bool,
}

pub struct EventScheduler {
    media: Arc<dyn MediaControl>,
    clock: SharedClock,
    markers: Arc<MarkerAllocator>,
    broadcaster: EventBroadcaster,
    call_timeout: Duration,
    tick_interval: Duration,
    /// Finished events older than this are purged after each tick.
    retention: Duration,
    configs: DashMap<String, ProgramConfig>,
    events: DashMap<String, ScheduledEvent>,
    tick_lock: Mutex<()>,
    wake: Notify,
    task: SyncMutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl EventScheduler {
    pub fn new(
        media: Arc<dyn MediaControl>,
        clock: SharedClock,
        markers: Arc<MarkerAllocator>,
        broadcaster: EventBroadcaster,
        call_timeout: Duration,
        tick_interval: Duration,
    ) -> Self {
        Self {
            media,
            clock,
            markers,
            broadcaster,
            call_timeout,
            tick_interval,
            retention: Duration::from_millis(DEFAULT_EVENT_RETENTION_MS),
            configs: DashMap::new(),
            events: DashMap::new(),
            tick_lock: Mutex::new(()),
            wake: Notify::new(),
            task: SyncMutex::new(None),
        }
    }

    /// Keep executed, failed and cancelled events for `retention`.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    // ========== Program configs ==========

    /// Register or replace a program config.
    pub fn set_program_config(&self, config: ProgramConfig) -> Result<()> {
        config.validate()?;
        debug!(
            program_id = %config.program_id,
            ad_breaks = config.ad_breaks.len(),
            "Program config set"
        );
        self.configs.insert(config.program_id.clone(), config);
        Ok(())
    }

    /// Apply a partial update. Events already scheduled keep their times.
    pub fn update_program_config(
        &self,
        program_id: &str,
        patch: &ProgramConfigPatch,
    ) -> Result<ProgramConfig> {
        let mut entry = self
            .configs
            .get_mut(program_id)
            .ok_or_else(|| Error::not_found("ProgramConfig", program_id))?;
        let patched = patch.apply_to(entry.value());
        patched.validate()?;
        *entry.value_mut() = patched.clone();
        Ok(patched)
    }

    pub fn remove_program_config(&self, program_id: &str) -> Result<ProgramConfig> {
        self.configs
            .remove(program_id)
            .map(|(_, config)| config)
            .ok_or_else(|| Error::not_found("ProgramConfig", program_id))
    }

    pub fn get_program_config(&self, program_id: &str) -> Option<ProgramConfig> {
        self.configs.get(program_id).map(|entry| entry.clone())
    }

    pub fn get_program_configs(&self) -> Vec<ProgramConfig> {
        let mut configs: Vec<ProgramConfig> =
            self.configs.iter().map(|entry| entry.clone()).collect();
        configs.sort_by(|a, b| a.program_id.cmp(&b.program_id));
        configs
    }

    // ========== Events ==========

    /// Plan and store every cue of a program starting at `start`.
    ///
    /// Returns the new event ids in planning order. Cues already in the past
    /// fire on the next tick.
    pub fn schedule_program_events(
        &self,
        program_id: &str,
        start: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let config = self
            .get_program_config(program_id)
            .ok_or_else(|| Error::not_found("ProgramConfig", program_id))?;

        let events = plan_program(&config, start, &self.markers, self.clock.now());
        let ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();
        for event in events {
            self.events.insert(event.id.clone(), event);
        }

        info!(
            program_id,
            channel_id = %config.channel_id,
            start = %start,
            events = ids.len(),
            "Program events scheduled"
        );
        self.wake.notify_one();
        Ok(ids)
    }

    /// Cancel the program's still-scheduled events. Returns how many changed.
    pub fn cancel_program_events(&self, program_id: &str) -> usize {
        let mut count = 0;
        for mut entry in self.events.iter_mut() {
            let event = entry.value_mut();
            if event.program_id.as_deref() == Some(program_id)
                && event.is_pending()
                && event.cancel().is_ok()
            {
                count += 1;
            }
        }

        if count > 0 {
            info!(program_id, count, "Program events cancelled");
            self.broadcaster.publish(OrchestratorEvent::CuesCancelled {
                program_id: program_id.to_string(),
                count,
                timestamp: self.clock.now(),
            });
        }
        count
    }

    /// Cancel one still-scheduled event.
    pub fn cancel_event(&self, event_id: &str) -> Result<()> {
        let mut entry = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| Error::not_found("ScheduledEvent", event_id))?;
        entry.value_mut().cancel()?;
        debug!(event_id, "Event cancelled");
        Ok(())
    }

    /// Queue a cue that runs ahead of everything else on the next tick.
    pub fn add_emergency_event(
        &self,
        channel_id: &str,
        kind: CueKind,
        duration: Option<Duration>,
    ) -> Result<String> {
        if channel_id.trim().is_empty() {
            return Err(Error::validation("emergency event needs a channel id"));
        }

        let now = self.clock.now();
        let mut event =
            ScheduledEvent::new(channel_id, None, kind, self.markers.allocate(), now, now);
        event.emergency = true;
        event.duration_ms = duration.map(|d| d.as_millis() as u64);
        let id = event.id.clone();

        warn!(
            channel_id,
            event_id = %id,
            %kind,
            marker_id = event.marker_id,
            "Emergency event queued"
        );
        self.events.insert(id.clone(), event);
        self.wake.notify_one();
        Ok(id)
    }

    pub fn get_event(&self, event_id: &str) -> Option<ScheduledEvent> {
        self.events.get(event_id).map(|entry| entry.clone())
    }

    /// All events, in scheduled-time order.
    pub fn get_all_scheduled_events(&self) -> Vec<ScheduledEvent> {
        let mut events: Vec<ScheduledEvent> =
            self.events.iter().map(|entry| entry.clone()).collect();
        events.sort_by(|a, b| {
            a.scheduled_time
                .cmp(&b.scheduled_time)
                .then_with(|| a.marker_id.cmp(&b.marker_id))
        });
        events
    }

    pub fn get_program_events(&self, program_id: &str) -> Vec<ScheduledEvent> {
        self.get_all_scheduled_events()
            .into_iter()
            .filter(|e| e.program_id.as_deref() == Some(program_id))
            .collect()
    }

    /// Drop terminal events that finished before `before`. Returns how many
    /// were removed. Cancelled events age from their scheduled time.
    pub fn purge_finished(&self, before: DateTime<Utc>) -> usize {
        let len = self.events.len();
        self.events.retain(|_, event| {
            !(event.status.is_terminal()
                && event.executed_at.unwrap_or(event.scheduled_time) < before)
        });
        len - self.events.len()
    }

    /// Drop terminal events older than the retention window.
    pub fn purge_expired(&self) -> usize {
        let cutoff = sub_duration(self.clock.now(), self.retention);
        let purged = self.purge_finished(cutoff);
        if purged > 0 {
            debug!(purged, "Purged finished events");
        }
        purged
    }

    pub fn get_status(&self) -> SchedulerStatus {
        let events: Vec<ScheduledEvent> = self.events.iter().map(|e| e.clone()).collect();
        let count = |status: EventStatus| events.iter().filter(|e| e.status == status).count();

        SchedulerStatus {
            running: self.is_running(),
            program_count: self.configs.len(),
            total_events: events.len(),
            scheduled: count(EventStatus::Scheduled),
            executed: count(EventStatus::Executed),
            failed: count(EventStatus::Failed),
            cancelled: count(EventStatus::Cancelled),
            next_event_time: events
                .iter()
                .filter(|e| e.is_pending())
                .map(|e| e.scheduled_time)
                .min(),
            next_marker_id: self.markers.peek(),
        }
    }

    // ========== Execution ==========

    /// Execute every due event. A tick already in progress makes this a no-op.
    pub async fn process_due(&self) -> TickReport {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            debug!("Scheduler tick already running");
            return TickReport {
                skipped: true,
                ..TickReport::default()
            };
        };

        let mut report = TickReport::default();
        // Re-evaluated per event so emergencies queued mid-tick go next.
        while let Some(event) = self.next_due() {
            if self.execute(event).await {
                report.executed += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.executed + report.failed > 0 {
            debug!(
                executed = report.executed,
                failed = report.failed,
                "Scheduler tick finished"
            );
        }
        report
    }

    fn next_due(&self) -> Option<ScheduledEvent> {
        let now = self.clock.now();
        self.events
            .iter()
            .filter(|entry| entry.is_due(now))
            .map(|entry| entry.clone())
            .min_by(execution_order)
    }

    /// Inject one event's marker and record the terminal state.
    async fn execute(&self, event: ScheduledEvent) -> bool {
        let result = bounded(
            "inject_marker",
            self.call_timeout,
            self.media.inject_marker(
                &event.channel_id,
                event.kind,
                event.marker_id,
                event.duration(),
            ),
        )
        .await;
        let at = self.clock.now();

        let Some(mut entry) = self.events.get_mut(&event.id) else {
            return result.is_ok();
        };
        let stored = entry.value_mut();

        match result {
            Ok(()) => {
                if stored.mark_executed(at).is_err() {
                    warn!(
                        event_id = %event.id,
                        status = %stored.status,
                        "Marker injected for an event cancelled mid-flight"
                    );
                    return true;
                }
                drop(entry);
                info!(
                    event_id = %event.id,
                    channel_id = %event.channel_id,
                    kind = %event.kind,
                    marker_id = event.marker_id,
                    emergency = event.emergency,
                    "Cue executed"
                );
                self.broadcaster.publish(OrchestratorEvent::CueExecuted {
                    event_id: event.id,
                    channel_id: event.channel_id,
                    kind: event.kind,
                    marker_id: event.marker_id,
                    emergency: event.emergency,
                    timestamp: at,
                });
                true
            }
            Err(e) => {
                let message = e.to_string();
                if stored.mark_failed(at, message.clone()).is_err() {
                    return false;
                }
                drop(entry);
                error!(
                    event_id = %event.id,
                    channel_id = %event.channel_id,
                    kind = %event.kind,
                    marker_id = event.marker_id,
                    error = %message,
                    "Cue injection failed"
                );
                self.broadcaster.publish(OrchestratorEvent::CueFailed {
                    event_id: event.id,
                    channel_id: event.channel_id,
                    kind: event.kind,
                    marker_id: event.marker_id,
                    error: message,
                    timestamp: at,
                });
                false
            }
        }
    }

    // ========== Lifecycle ==========

    /// Spawn the tick loop. Does nothing when already running.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return;
        }

        let token = parent.child_token();
        let scheduler = Arc::clone(self);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            info!(
                tick_ms = scheduler.tick_interval.as_millis() as u64,
                "Event scheduler started"
            );
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(scheduler.tick_interval) => {}
                    _ = scheduler.wake.notified() => {}
                }
                scheduler.process_due().await;
                scheduler.purge_expired();
            }
            info!("Event scheduler stopped");
        });
        *task = Some((token, handle));
    }

    /// Stop the tick loop, letting a running tick finish.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some((token, handle)) = task {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Event scheduler task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|(token, handle)| !token.is_cancelled() && !handle.is_finished())
    }
}
