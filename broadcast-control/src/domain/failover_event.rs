//! Failover log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverEventKind {
    /// The channel was redirected from its primary to a fallback.
    SwitchedToFallback,
    /// The channel was redirected back to its recovered primary.
    RecoveredToPrimary,
    /// An operator redirected the channel explicitly.
    ManualSwitch,
    /// A switch was attempted and did not happen.
    SwitchFailed,
    ProbeFailed,
    ProbeRecovered,
}

impl FailoverEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SwitchedToFallback => "switched_to_fallback",
            Self::RecoveredToPrimary => "recovered_to_primary",
            Self::ManualSwitch => "manual_switch",
            Self::SwitchFailed => "switch_failed",
            Self::ProbeFailed => "probe_failed",
            Self::ProbeRecovered => "probe_recovered",
        }
    }

    /// Whether this kind records a completed redirect.
    pub fn is_switch(&self) -> bool {
        matches!(
            self,
            Self::SwitchedToFallback | Self::RecoveredToPrimary | Self::ManualSwitch
        )
    }
}

impl std::fmt::Display for FailoverEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable record of something the monitor or failover controller did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub id: String,
    pub channel_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: FailoverEventKind,
    pub from_source: Option<String>,
    pub to_source: Option<String>,
    pub reason: String,
    /// Switch latency or probe response time, when meaningful.
    pub duration_ms: Option<u64>,
}

impl FailoverEvent {
    pub fn new(
        channel_id: impl Into<String>,
        kind: FailoverEventKind,
        timestamp: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id: channel_id.into(),
            timestamp,
            kind,
            from_source: None,
            to_source: None,
            reason: reason.into(),
            duration_ms: None,
        }
    }

    pub fn from_source(mut self, source_id: Option<impl Into<String>>) -> Self {
        self.from_source = source_id.map(Into::into);
        self
    }

    pub fn to_source(mut self, source_id: Option<impl Into<String>>) -> Self {
        self.to_source = source_id.map(Into::into);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn description(&self) -> String {
        match (&self.from_source, &self.to_source) {
            (Some(from), Some(to)) => {
                format!("{} [{}] {} -> {}: {}", self.channel_id, self.kind, from, to, self.reason)
            }
            (Some(source), None) | (None, Some(source)) => {
                format!("{} [{}] {}: {}", self.channel_id, self.kind, source, self.reason)
            }
            (None, None) => format!("{} [{}] {}", self.channel_id, self.kind, self.reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&FailoverEventKind::SwitchedToFallback).unwrap();
        assert_eq!(json, "\"switched_to_fallback\"");
        assert!(FailoverEventKind::RecoveredToPrimary.is_switch());
        assert!(!FailoverEventKind::SwitchFailed.is_switch());
    }

    #[test]
    fn test_description() {
        let event = FailoverEvent::new(
            "ch1",
            FailoverEventKind::SwitchedToFallback,
            Utc::now(),
            "primary unhealthy",
        )
        .from_source(Some("main"))
        .to_source(Some("backup"));

        assert_eq!(
            event.description(),
            "ch1 [switched_to_fallback] main -> backup: primary unhealthy"
        );
    }
}
