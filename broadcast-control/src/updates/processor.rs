//! Update queue processor.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex as SyncMutex, RwLock};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::domain::{ScheduleMutation, ScheduleUpdate, UpdateStatus};
use crate::events::{EventBroadcaster, OrchestratorEvent};
use crate::media::{MediaControl, ScheduleItem, ScheduleStore, bounded};
use crate::scheduler::EventScheduler;
use crate::{Error, Result};

/// Snapshot of the queue for the status surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateQueueStatus {
    pub running: bool,
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub capacity: usize,
}

/// What a single processing pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub completed: usize,
    pub failed: usize,
    pub skipped: bool,
}

/// Dependencies and tuning for [`UpdateQueueProcessor`].
pub struct UpdateQueueDeps {
    pub store: Arc<dyn ScheduleStore>,
    pub media: Arc<dyn MediaControl>,
    pub scheduler: Arc<EventScheduler>,
    pub clock: SharedClock,
    pub broadcaster: EventBroadcaster,
    pub call_timeout: Duration,
    pub tick_interval: Duration,
    pub history_capacity: usize,
}

/// Applies queued schedule mutations one at a time, oldest first.
///
/// The history doubles as the queue: pending entries are picked up by the
/// tick, terminal entries stay for status queries until evicted.
pub struct UpdateQueueProcessor {
    store: Arc<dyn ScheduleStore>,
    media: Arc<dyn MediaControl>,
    scheduler: Arc<EventScheduler>,
    clock: SharedClock,
    broadcaster: EventBroadcaster,
    call_timeout: Duration,
    tick_interval: Duration,
    capacity: usize,
    history: RwLock<VecDeque<ScheduleUpdate>>,
    tick_lock: Mutex<()>,
    wake: Notify,
    task: SyncMutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl UpdateQueueProcessor {
    pub fn new(deps: UpdateQueueDeps) -> Self {
        let capacity = deps.history_capacity.max(1);
        Self {
            store: deps.store,
            media: deps.media,
            scheduler: deps.scheduler,
            clock: deps.clock,
            broadcaster: deps.broadcaster,
            call_timeout: deps.call_timeout,
            tick_interval: deps.tick_interval,
            capacity,
            history: RwLock::new(VecDeque::with_capacity(capacity)),
            tick_lock: Mutex::new(()),
            wake: Notify::new(),
            task: SyncMutex::new(None),
        }
    }

    /// Validate and enqueue a mutation. Returns the update id.
    ///
    /// When the history is full the oldest finished entry is evicted; if
    /// every entry is still unfinished the update is rejected.
    pub fn queue_update(&self, channel_id: &str, mutation: ScheduleMutation) -> Result<String> {
        let update = ScheduleUpdate::new(channel_id, mutation, self.clock.now())?;
        let id = update.id.clone();
        let kind = update.kind;

        {
            let mut history = self.history.write();
            if history.len() >= self.capacity {
                let oldest_finished = history
                    .iter()
                    .position(|u| u.status.is_terminal())
                    .ok_or(Error::QueueFull {
                        capacity: self.capacity,
                    })?;
                history.remove(oldest_finished);
            }
            history.push_back(update);
        }

        debug!(update_id = %id, channel_id, %kind, "Update queued");
        self.wake.notify_one();
        Ok(id)
    }

    pub fn get_update(&self, update_id: &str) -> Option<ScheduleUpdate> {
        self.history
            .read()
            .iter()
            .find(|u| u.id == update_id)
            .cloned()
    }

    /// Up to `limit` updates, newest first.
    pub fn get_updates(&self, limit: usize) -> Vec<ScheduleUpdate> {
        self.history.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn get_channel_updates(&self, channel_id: &str, limit: usize) -> Vec<ScheduleUpdate> {
        self.history
            .read()
            .iter()
            .rev()
            .filter(|u| u.channel_id == channel_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Drop every finished update. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let mut history = self.history.write();
        let before = history.len();
        history.retain(|u| !u.status.is_terminal());
        before - history.len()
    }

    pub fn get_status(&self) -> UpdateQueueStatus {
        let history = self.history.read();
        let count = |status: UpdateStatus| history.iter().filter(|u| u.status == status).count();
        UpdateQueueStatus {
            running: self.is_running(),
            total: history.len(),
            pending: count(UpdateStatus::Pending),
            processing: count(UpdateStatus::Processing),
            completed: count(UpdateStatus::Completed),
            failed: count(UpdateStatus::Failed),
            capacity: self.capacity,
        }
    }

    /// Current schedule of a channel as the store sees it.
    pub async fn current_schedule(&self, channel_id: &str) -> Result<Vec<ScheduleItem>> {
        bounded(
            "read_schedule",
            self.call_timeout,
            self.store.read_schedule(channel_id),
        )
        .await
    }

    /// Process every pending update. A pass already in progress makes this a no-op.
    pub async fn process_pending(&self) -> ProcessReport {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            return ProcessReport {
                skipped: true,
                ..ProcessReport::default()
            };
        };

        let mut report = ProcessReport::default();
        while let Some(update) = self.claim_next() {
            let outcome = self.apply(&update).await;
            if self.finish(&update, outcome) {
                report.completed += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    /// Move the oldest pending update to processing and hand out a copy.
    fn claim_next(&self) -> Option<ScheduleUpdate> {
        let mut history = self.history.write();
        let update = history
            .iter_mut()
            .find(|u| u.status == UpdateStatus::Pending)?;
        update.begin_processing().ok()?;
        Some(update.clone())
    }

    async fn apply(&self, update: &ScheduleUpdate) -> std::result::Result<Option<String>, String> {
        let channel_id = update.channel_id.as_str();
        match &update.mutation {
            ScheduleMutation::Emergency {
                cue,
                duration_ms,
                reason,
            } => {
                if let Some(reason) = reason {
                    info!(update_id = %update.id, channel_id, reason = %reason, "Emergency update");
                }
                self.scheduler
                    .add_emergency_event(channel_id, *cue, duration_ms.map(Duration::from_millis))
                    .map(Some)
                    .map_err(|e| e.to_string())
            }
            mutation => self
                .apply_to_store(channel_id, mutation)
                .await
                .map(|()| None)
                .map_err(|e| e.to_string()),
        }
    }

    async fn apply_to_store(&self, channel_id: &str, mutation: &ScheduleMutation) -> Result<()> {
        bounded(
            "apply_mutation",
            self.call_timeout,
            self.store.apply_mutation(channel_id, mutation),
        )
        .await?;
        bounded("persist", self.call_timeout, self.store.persist(channel_id)).await?;
        bounded(
            "reload_schedule",
            self.call_timeout,
            self.media.reload_schedule(channel_id),
        )
        .await
    }

    /// Record the terminal state. Returns whether the update completed.
    fn finish(
        &self,
        update: &ScheduleUpdate,
        outcome: std::result::Result<Option<String>, String>,
    ) -> bool {
        let at = self.clock.now();
        let completed = outcome.is_ok();
        let error = outcome.as_ref().err().cloned();

        {
            let mut history = self.history.write();
            if let Some(stored) = history.iter_mut().find(|u| u.id == update.id)
                && let Err(e) = stored.finish(at, outcome)
            {
                warn!(update_id = %update.id, error = %e, "Could not record update outcome");
            }
        }

        match error {
            None => {
                info!(
                    update_id = %update.id,
                    channel_id = %update.channel_id,
                    kind = %update.kind,
                    "Update completed"
                );
                self.broadcaster.publish(OrchestratorEvent::UpdateCompleted {
                    update_id: update.id.clone(),
                    channel_id: update.channel_id.clone(),
                    kind: update.kind,
                    timestamp: at,
                });
            }
            Some(error) => {
                warn!(
                    update_id = %update.id,
                    channel_id = %update.channel_id,
                    kind = %update.kind,
                    error = %error,
                    "Update failed"
                );
                self.broadcaster.publish(OrchestratorEvent::UpdateFailed {
                    update_id: update.id.clone(),
                    channel_id: update.channel_id.clone(),
                    kind: update.kind,
                    error,
                    timestamp: at,
                });
            }
        }
        completed
    }

    // ========== Lifecycle ==========

    /// Spawn the processing loop. Does nothing when already running.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return;
        }

        let token = parent.child_token();
        let processor = Arc::clone(self);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            info!("Update queue processor started");
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(processor.tick_interval) => {}
                    _ = processor.wake.notified() => {}
                }
                processor.process_pending().await;
            }
            info!("Update queue processor stopped");
        });
        *task = Some((token, handle));
    }

    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some((token, handle)) = task {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Update queue task ended abnormally");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::{CueKind, EventStatus, StreamSource};
    use crate::media::{InMemoryScheduleStore, NoOpMediaControl};
    use crate::scheduler::MarkerAllocator;
    use async_trait::async_trait;
    use serde_json::json;

    /// Store that parks every mutation until `gate` is notified.
    #[derive(Default)]
    struct GatedStore {
        inner: InMemoryScheduleStore,
        entered: Notify,
        gate: Notify,
        applied: SyncMutex<Vec<String>>,
    }

    #[async_trait]
    impl ScheduleStore for GatedStore {
        async fn read_schedule(&self, channel_id: &str) -> Result<Vec<ScheduleItem>> {
            self.inner.read_schedule(channel_id).await
        }

        async fn apply_mutation(&self, channel_id: &str, mutation: &ScheduleMutation) -> Result<()> {
            self.entered.notify_one();
            self.gate.notified().await;
            self.applied
                .lock()
                .push(mutation.item_id().unwrap_or_default().to_string());
            self.inner.apply_mutation(channel_id, mutation).await
        }

        async fn persist(&self, channel_id: &str) -> Result<()> {
            self.inner.persist(channel_id).await
        }
    }

    /// Media server whose schedule reload never answers.
    struct StalledReload;

    #[async_trait]
    impl MediaControl for StalledReload {
        async fn redirect_channel(&self, _channel_id: &str, _source: &StreamSource) -> Result<()> {
            Ok(())
        }

        async fn inject_marker(
            &self,
            _channel_id: &str,
            _kind: CueKind,
            _marker_id: u64,
            _duration: Option<Duration>,
        ) -> Result<()> {
            Ok(())
        }

        async fn reload_schedule(&self, _channel_id: &str) -> Result<()> {
            std::future::pending().await
        }
    }

    struct Fixture {
        processor: Arc<UpdateQueueProcessor>,
        store: Arc<InMemoryScheduleStore>,
        scheduler: Arc<EventScheduler>,
    }

    fn processor_with(
        store: Arc<dyn ScheduleStore>,
        media: Arc<dyn MediaControl>,
        capacity: usize,
    ) -> (Arc<UpdateQueueProcessor>, Arc<EventScheduler>) {
        let clock: SharedClock = Arc::new(ManualClock::at_ms(1_700_000_000_000));
        let scheduler = Arc::new(EventScheduler::new(
            media.clone(),
            clock.clone(),
            Arc::new(MarkerAllocator::new()),
            EventBroadcaster::new(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        ));
        let processor = Arc::new(UpdateQueueProcessor::new(UpdateQueueDeps {
            store,
            media,
            scheduler: scheduler.clone(),
            clock,
            broadcaster: EventBroadcaster::new(),
            call_timeout: Duration::from_secs(1),
            tick_interval: Duration::from_secs(1),
            history_capacity: capacity,
        }));
        (processor, scheduler)
    }

    fn fixture(capacity: usize) -> Fixture {
        let store = Arc::new(InMemoryScheduleStore::new());
        let (processor, scheduler) =
            processor_with(store.clone(), Arc::new(NoOpMediaControl), capacity);
        Fixture {
            processor,
            store,
            scheduler,
        }
    }

    fn insert(id: &str) -> ScheduleMutation {
        ScheduleMutation::Insert {
            item_id: id.to_string(),
            position: None,
            data: json!({ "title": id }),
        }
    }

    #[tokio::test]
    async fn test_mutations_reach_store() {
        let f = fixture(100);
        let id = f.processor.queue_update("ch1", insert("a")).unwrap();
        assert_eq!(
            f.processor.get_update(&id).unwrap().status,
            UpdateStatus::Pending
        );

        let report = f.processor.process_pending().await;
        assert_eq!(report.completed, 1);

        let update = f.processor.get_update(&id).unwrap();
        assert_eq!(update.status, UpdateStatus::Completed);
        assert!(update.processed_at.is_some());
        assert_eq!(f.store.persist_count("ch1"), 1);
        assert_eq!(f.processor.current_schedule("ch1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_marks_failed() {
        let f = fixture(100);
        let id = f
            .processor
            .queue_update(
                "ch1",
                ScheduleMutation::Delete {
                    item_id: "missing".to_string(),
                },
            )
            .unwrap();

        let report = f.processor.process_pending().await;
        assert_eq!(report.failed, 1);

        let update = f.processor.get_update(&id).unwrap();
        assert_eq!(update.status, UpdateStatus::Failed);
        assert!(update.error.unwrap().contains("missing"));
        assert_eq!(f.store.persist_count("ch1"), 0);

        // terminal updates are never picked up again
        assert_eq!(f.processor.process_pending().await, ProcessReport::default());
    }

    #[tokio::test]
    async fn test_emergency_routes_to_scheduler() {
        let f = fixture(100);
        let id = f
            .processor
            .queue_update(
                "ch1",
                ScheduleMutation::Emergency {
                    cue: CueKind::CueOut,
                    duration_ms: Some(30_000),
                    reason: Some("breaking news".to_string()),
                },
            )
            .unwrap();
        f.processor.process_pending().await;

        let update = f.processor.get_update(&id).unwrap();
        let event_id = update.emergency_event_id.unwrap();
        let event = f.scheduler.get_event(&event_id).unwrap();
        assert!(event.emergency);
        assert_eq!(event.status, EventStatus::Scheduled);
        assert_eq!(event.duration_ms, Some(30_000));
    }

    #[tokio::test]
    async fn test_history_cap_evicts_finished_first() {
        let f = fixture(3);
        let first = f.processor.queue_update("ch1", insert("a")).unwrap();
        f.processor.process_pending().await;
        f.processor.queue_update("ch1", insert("b")).unwrap();
        f.processor.queue_update("ch2", insert("c")).unwrap();
        f.processor.queue_update("ch2", insert("d")).unwrap();

        assert!(f.processor.get_update(&first).is_none());
        assert_eq!(f.processor.get_status().pending, 3);
        assert!(matches!(
            f.processor.queue_update("ch1", insert("e")),
            Err(Error::QueueFull { capacity: 3 })
        ));

        f.processor.process_pending().await;
        assert_eq!(f.processor.get_channel_updates("ch2", 10).len(), 2);
        assert_eq!(f.processor.clear_completed(), 3);
        assert_eq!(f.processor.get_status().total, 0);
    }

    #[test]
    fn test_invalid_mutation_rejected_at_queue_time() {
        let f = fixture(10);
        let bad = ScheduleMutation::Modify {
            item_id: "a".to_string(),
            changes: json!(null),
        };
        assert!(f.processor.queue_update("ch1", bad).is_err());
        assert!(f.processor.queue_update("", insert("a")).is_err());
        assert_eq!(f.processor.get_status().total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_processes_queued_updates() {
        let f = fixture(10);
        let token = CancellationToken::new();
        f.processor.start(&token);

        let id = f.processor.queue_update("ch1", insert("a")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            f.processor.get_update(&id).unwrap().status,
            UpdateStatus::Completed
        );

        f.processor.stop().await;
        assert!(!f.processor.is_running());
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_skipped() {
        let store = Arc::new(GatedStore::default());
        let (processor, _) = processor_with(store.clone(), Arc::new(NoOpMediaControl), 10);
        let id = processor.queue_update("ch1", insert("a")).unwrap();

        let first = tokio::spawn({
            let processor = processor.clone();
            async move { processor.process_pending().await }
        });
        store.entered.notified().await;

        let second = processor.process_pending().await;
        assert!(second.skipped);
        assert_eq!(second.completed + second.failed, 0);
        assert_eq!(
            processor.get_update(&id).unwrap().status,
            UpdateStatus::Processing
        );

        store.gate.notify_one();
        let first = first.await.unwrap();
        assert!(!first.skipped);
        assert_eq!(first.completed, 1);
        assert_eq!(store.applied.lock().clone(), vec!["a".to_string()]);
        assert_eq!(store.inner.persist_count("ch1"), 1);
        assert_eq!(processor.process_pending().await, ProcessReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_store_fails_update() {
        // The gate is never opened, so apply_mutation never returns.
        let store = Arc::new(GatedStore::default());
        let (processor, _) = processor_with(store.clone(), Arc::new(NoOpMediaControl), 10);
        let id = processor.queue_update("ch1", insert("a")).unwrap();

        let report = processor.process_pending().await;
        assert_eq!(report.failed, 1);

        let update = processor.get_update(&id).unwrap();
        assert_eq!(update.status, UpdateStatus::Failed);
        assert!(update.error.unwrap().contains("apply_mutation timed out"));
        assert_eq!(store.inner.persist_count("ch1"), 0);
        assert_eq!(processor.process_pending().await, ProcessReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_reload_fails_update() {
        let store = Arc::new(InMemoryScheduleStore::new());
        let (processor, _) = processor_with(store.clone(), Arc::new(StalledReload), 10);
        let id = processor.queue_update("ch1", insert("a")).unwrap();

        let report = processor.process_pending().await;
        assert_eq!(report.failed, 1);

        let update = processor.get_update(&id).unwrap();
        assert_eq!(update.status, UpdateStatus::Failed);
        assert!(update.error.unwrap().contains("reload_schedule timed out"));
        assert_eq!(store.persist_count("ch1"), 1);
        assert_eq!(processor.get_status().failed, 1);
    }
}
