//! Scheduled SCTE-35 cue events.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of marker injected into the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CueKind {
    CueOut,
    CueIn,
    PreRoll,
    PostRoll,
}

impl CueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CueOut => "cue_out",
            Self::CueIn => "cue_in",
            Self::PreRoll => "pre_roll",
            Self::PostRoll => "post_roll",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "cue_out" => Some(Self::CueOut),
            "cue_in" => Some(Self::CueIn),
            "pre_roll" => Some(Self::PreRoll),
            "post_roll" => Some(Self::PostRoll),
            _ => None,
        }
    }
}

impl std::fmt::Display for CueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a scheduled event. Everything but `Scheduled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Scheduled,
    Executed,
    Cancelled,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Executed => "executed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Scheduled)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A marker injection planned for an absolute point in time.
///
/// `scheduled_time` is fixed at creation. Status moves out of `Scheduled`
/// exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub id: String,
    pub channel_id: String,
    /// `None` for emergency events.
    pub program_id: Option<String>,
    pub kind: CueKind,
    pub marker_id: u64,
    pub scheduled_time: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub pre_roll_ms: Option<u64>,
    pub status: EventStatus,
    pub executed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Emergency events jump the execution queue.
    pub emergency: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledEvent {
    pub(crate) fn new(
        channel_id: impl Into<String>,
        program_id: Option<String>,
        kind: CueKind,
        marker_id: u64,
        scheduled_time: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id: channel_id.into(),
            program_id,
            kind,
            marker_id,
            scheduled_time,
            duration_ms: None,
            pre_roll_ms: None,
            status: EventStatus::Scheduled,
            executed_at: None,
            error: None,
            emergency: false,
            metadata: BTreeMap::new(),
            created_at,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_ms.map(Duration::from_millis)
    }

    pub fn is_pending(&self) -> bool {
        self.status == EventStatus::Scheduled
    }

    /// Whether the event should run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.scheduled_time <= now
    }

    pub(crate) fn mark_executed(&mut self, at: DateTime<Utc>) -> crate::Result<()> {
        self.transition(EventStatus::Executed)?;
        self.executed_at = Some(at);
        Ok(())
    }

    pub(crate) fn mark_failed(
        &mut self,
        at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> crate::Result<()> {
        self.transition(EventStatus::Failed)?;
        self.executed_at = Some(at);
        self.error = Some(error.into());
        Ok(())
    }

    pub(crate) fn cancel(&mut self) -> crate::Result<()> {
        self.transition(EventStatus::Cancelled)
    }

    fn transition(&mut self, to: EventStatus) -> crate::Result<()> {
        if self.status.is_terminal() {
            return Err(crate::Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> ScheduledEvent {
        let now = Utc::now();
        ScheduledEvent::new("ch1", Some("p1".to_string()), CueKind::CueOut, 1, now, now)
    }

    #[test]
    fn test_cue_kind_parse() {
        assert_eq!(CueKind::parse("cue-out"), Some(CueKind::CueOut));
        assert_eq!(CueKind::parse("POST_ROLL"), Some(CueKind::PostRoll));
        assert_eq!(CueKind::parse("splice"), None);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut e = event();
        e.mark_executed(Utc::now()).unwrap();
        assert_eq!(e.status, EventStatus::Executed);
        assert!(e.cancel().is_err());
        assert!(e.mark_failed(Utc::now(), "late").is_err());
        assert_eq!(e.status, EventStatus::Executed);
        assert!(e.error.is_none());
    }

    #[test]
    fn test_failed_records_error() {
        let mut e = event();
        e.mark_failed(Utc::now(), "inject refused").unwrap();
        assert_eq!(e.status, EventStatus::Failed);
        assert_eq!(e.error.as_deref(), Some("inject refused"));
        assert!(!e.is_due(Utc::now()));
    }

    #[test]
    fn test_due_only_when_scheduled_and_past() {
        let e = event();
        assert!(e.is_due(e.scheduled_time));
        assert!(!e.is_due(e.scheduled_time - chrono::Duration::seconds(1)));
    }
}
