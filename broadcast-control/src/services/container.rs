//! Service container.
//!
//! The Orchestrator wires the registry, health monitor, failover controller,
//! cue scheduler and update queue around one media control and one schedule
//! store, and manages their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clock::{SharedClock, SystemClock};
use crate::config::OrchestratorConfig;
use crate::events::{BoundedLog, EventBroadcaster, OrchestratorEvent};
use crate::failover::FailoverController;
use crate::media::{MediaControl, ScheduleStore};
use crate::monitor::{HealthMonitor, MonitoringStatus, ProbeStrategies};
use crate::registry::StreamRegistry;
use crate::scheduler::{EventScheduler, MarkerAllocator, SchedulerStatus};
use crate::updates::{UpdateQueueDeps, UpdateQueueProcessor, UpdateQueueStatus};
use crate::{Error, Result};

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Aggregated status of every loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorStatus {
    pub monitoring: MonitoringStatus,
    pub scheduler: SchedulerStatus,
    pub updates: UpdateQueueStatus,
    pub event_subscriber_count: usize,
    pub shutting_down: bool,
}

pub struct Orchestrator {
    pub config: OrchestratorConfig,
    pub registry: Arc<StreamRegistry>,
    pub monitor: Arc<HealthMonitor>,
    pub failover: Arc<FailoverController>,
    pub scheduler: Arc<EventScheduler>,
    pub updates: Arc<UpdateQueueProcessor>,
    event_broadcaster: EventBroadcaster,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl Orchestrator {
    /// Build with the system clock and the built-in probe strategies.
    pub fn new(
        config: OrchestratorConfig,
        media: Arc<dyn MediaControl>,
        store: Arc<dyn ScheduleStore>,
    ) -> Result<Self> {
        let probes = ProbeStrategies::with_defaults(config.monitor.probe_timeout());
        Self::with_components(config, media, store, Arc::new(SystemClock), probes)
    }

    pub fn with_components(
        config: OrchestratorConfig,
        media: Arc<dyn MediaControl>,
        store: Arc<dyn ScheduleStore>,
        clock: SharedClock,
        probes: ProbeStrategies,
    ) -> Result<Self> {
        config.validate()?;

        let event_broadcaster = EventBroadcaster::with_capacity(config.event_capacity);
        let registry = Arc::new(StreamRegistry::new());

        let failover = Arc::new(FailoverController::new(
            registry.clone(),
            media.clone(),
            clock.clone(),
            Arc::new(BoundedLog::with_capacity(config.monitor.event_log_capacity)),
            event_broadcaster.clone(),
            config.call_timeout(),
        ));

        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            failover.clone(),
            probes,
            clock.clone(),
            &config.monitor,
        ));

        let scheduler = Arc::new(
            EventScheduler::new(
                media.clone(),
                clock.clone(),
                Arc::new(MarkerAllocator::new()),
                event_broadcaster.clone(),
                config.call_timeout(),
                config.scheduler.tick_interval(),
            )
            .with_retention(config.scheduler.event_retention()),
        );

        let updates = Arc::new(UpdateQueueProcessor::new(UpdateQueueDeps {
            store,
            media,
            scheduler: scheduler.clone(),
            clock,
            broadcaster: event_broadcaster.clone(),
            call_timeout: config.call_timeout(),
            tick_interval: config.updates.tick_interval(),
            history_capacity: config.updates.history_capacity,
        }));

        Ok(Self {
            config,
            registry,
            monitor,
            failover,
            scheduler,
            updates,
            event_broadcaster,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Start the monitor, scheduler and update loops.
    pub fn start(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(Error::Other(
                "orchestrator has been shut down".to_string(),
            ));
        }

        let loops = self.monitor.start_monitoring();
        self.scheduler.start(&self.cancellation_token);
        self.updates.start(&self.cancellation_token);
        info!(rule_loops = loops, "Orchestrator started");
        Ok(())
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown all services gracefully with a custom timeout.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down orchestrator (timeout: {:?})", timeout);
        self.cancellation_token.cancel();

        let stopped = tokio::time::timeout(timeout, async {
            self.monitor.shutdown(timeout).await;
            self.scheduler.stop().await;
            self.updates.stop().await;
        })
        .await;

        if stopped.is_err() {
            return Err(Error::Timeout {
                operation: "shutdown".to_string(),
                after_ms: timeout.as_millis() as u64,
            });
        }
        info!("Orchestrator shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            monitoring: self.monitor.get_status(),
            scheduler: self.scheduler.get_status(),
            updates: self.updates.get_status(),
            event_subscriber_count: self.event_broadcaster.subscriber_count(),
            shutting_down: self.is_shutting_down(),
        }
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<OrchestratorEvent> {
        self.event_broadcaster.subscribe()
    }
}
