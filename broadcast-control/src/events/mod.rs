//! Orchestrator events and bounded histories.
//!
//! Components append to their own logs and also publish an
//! [`OrchestratorEvent`] so observers (alerting, UI push) can react without
//! polling the status surface.

mod log;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::{CueKind, FailoverEvent, UpdateKind};

pub use log::BoundedLog;

/// Events emitted by the orchestration services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrchestratorEvent {
    /// A failover log entry was appended.
    Failover(FailoverEvent),
    CueExecuted {
        event_id: String,
        channel_id: String,
        kind: CueKind,
        marker_id: u64,
        emergency: bool,
        timestamp: DateTime<Utc>,
    },
    CueFailed {
        event_id: String,
        channel_id: String,
        kind: CueKind,
        marker_id: u64,
        error: String,
        timestamp: DateTime<Utc>,
    },
    CuesCancelled {
        program_id: String,
        count: usize,
        timestamp: DateTime<Utc>,
    },
    UpdateCompleted {
        update_id: String,
        channel_id: String,
        kind: UpdateKind,
        timestamp: DateTime<Utc>,
    },
    UpdateFailed {
        update_id: String,
        channel_id: String,
        kind: UpdateKind,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl OrchestratorEvent {
    /// Get a human-readable description of the event.
    pub fn description(&self) -> String {
        match self {
            OrchestratorEvent::Failover(event) => event.description(),
            OrchestratorEvent::CueExecuted {
                channel_id,
                kind,
                marker_id,
                emergency,
                ..
            } => {
                let prefix = if *emergency { "emergency " } else { "" };
                format!("{}: {}{} #{} executed", channel_id, prefix, kind, marker_id)
            }
            OrchestratorEvent::CueFailed {
                channel_id,
                kind,
                marker_id,
                error,
                ..
            } => format!("{}: {} #{} failed - {}", channel_id, kind, marker_id, error),
            OrchestratorEvent::CuesCancelled {
                program_id, count, ..
            } => format!("{}: {} cue(s) cancelled", program_id, count),
            OrchestratorEvent::UpdateCompleted {
                channel_id, kind, ..
            } => format!("{}: {} update completed", channel_id, kind),
            OrchestratorEvent::UpdateFailed {
                channel_id,
                kind,
                error,
                ..
            } => format!("{}: {} update failed - {}", channel_id, kind, error),
        }
    }

    /// Whether an operator should hear about this event.
    pub fn should_notify(&self) -> bool {
        match self {
            OrchestratorEvent::Failover(event) => event.kind.is_switch()
                || event.kind == crate::domain::FailoverEventKind::SwitchFailed,
            OrchestratorEvent::CueFailed { .. } | OrchestratorEvent::UpdateFailed { .. } => true,
            OrchestratorEvent::CueExecuted { emergency, .. } => *emergency,
            OrchestratorEvent::CuesCancelled { .. } | OrchestratorEvent::UpdateCompleted { .. } => {
                false
            }
        }
    }
}

/// Fan-out of orchestrator events.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<OrchestratorEvent>,
}

impl EventBroadcaster {
    /// Create a new broadcaster with default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; having no subscribers is not an error.
    pub fn publish(&self, event: OrchestratorEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FailoverEventKind;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let broadcaster = EventBroadcaster::with_capacity(8);
        let mut rx = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);

        broadcaster.publish(OrchestratorEvent::CuesCancelled {
            program_id: "p1".to_string(),
            count: 3,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.description(), "p1: 3 cue(s) cancelled");
        assert!(!event.should_notify());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let broadcaster = EventBroadcaster::new();
        broadcaster.publish(OrchestratorEvent::Failover(FailoverEvent::new(
            "ch1",
            FailoverEventKind::ProbeFailed,
            Utc::now(),
            "timeout",
        )));
    }

    #[test]
    fn test_should_notify() {
        let switched = OrchestratorEvent::Failover(FailoverEvent::new(
            "ch1",
            FailoverEventKind::SwitchedToFallback,
            Utc::now(),
            "primary down",
        ));
        let probe = OrchestratorEvent::Failover(FailoverEvent::new(
            "ch1",
            FailoverEventKind::ProbeFailed,
            Utc::now(),
            "(1/3)",
        ));
        assert!(switched.should_notify());
        assert!(!probe.should_notify());
    }
}
