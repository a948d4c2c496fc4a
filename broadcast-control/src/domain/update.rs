//! Queued schedule mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::cue::CueKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Insert,
    Modify,
    Delete,
    Emergency,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Modify => "modify",
            Self::Delete => "delete",
            Self::Emergency => "emergency",
        }
    }
}

impl std::fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a queued update does. Each variant carries exactly the data its kind needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ScheduleMutation {
    /// Add a schedule item, optionally at a position (appended otherwise).
    Insert {
        item_id: String,
        #[serde(default)]
        position: Option<usize>,
        data: Value,
    },
    /// Merge `changes` (a JSON object) into an existing item.
    Modify { item_id: String, changes: Value },
    Delete { item_id: String },
    /// Fire a cue on the channel immediately.
    Emergency {
        cue: CueKind,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ScheduleMutation {
    pub fn kind(&self) -> UpdateKind {
        match self {
            Self::Insert { .. } => UpdateKind::Insert,
            Self::Modify { .. } => UpdateKind::Modify,
            Self::Delete { .. } => UpdateKind::Delete,
            Self::Emergency { .. } => UpdateKind::Emergency,
        }
    }

    /// Schedule item targeted by the mutation, if any.
    pub fn item_id(&self) -> Option<&str> {
        match self {
            Self::Insert { item_id, .. }
            | Self::Modify { item_id, .. }
            | Self::Delete { item_id } => Some(item_id),
            Self::Emergency { .. } => None,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if let Some(item_id) = self.item_id()
            && item_id.trim().is_empty()
        {
            return Err(crate::Error::validation(format!(
                "{} update requires an item id",
                self.kind()
            )));
        }

        match self {
            Self::Insert { data, .. } if data.is_null() => Err(crate::Error::validation(
                "insert update requires item data",
            )),
            Self::Modify { changes, .. } => match changes.as_object() {
                Some(map) if !map.is_empty() => Ok(()),
                _ => Err(crate::Error::validation(
                    "modify update requires a non-empty object of changes",
                )),
            },
            Self::Emergency {
                duration_ms: Some(0),
                ..
            } => Err(crate::Error::validation(
                "emergency duration must be greater than zero",
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A schedule mutation travelling through the update queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    pub id: String,
    pub channel_id: String,
    pub kind: UpdateKind,
    pub mutation: ScheduleMutation,
    pub timestamp: DateTime<Utc>,
    pub status: UpdateStatus,
    pub error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Event created on the scheduler for emergency updates.
    pub emergency_event_id: Option<String>,
}

impl ScheduleUpdate {
    /// Build a pending update, rejecting malformed mutations up front.
    pub fn new(
        channel_id: impl Into<String>,
        mutation: ScheduleMutation,
        timestamp: DateTime<Utc>,
    ) -> crate::Result<Self> {
        let channel_id = channel_id.into();
        if channel_id.trim().is_empty() {
            return Err(crate::Error::validation("update requires a channel id"));
        }
        mutation.validate()?;

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id,
            kind: mutation.kind(),
            mutation,
            timestamp,
            status: UpdateStatus::Pending,
            error: None,
            processed_at: None,
            emergency_event_id: None,
        })
    }

    pub(crate) fn begin_processing(&mut self) -> crate::Result<()> {
        if self.status != UpdateStatus::Pending {
            return Err(crate::Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: UpdateStatus::Processing.to_string(),
            });
        }
        self.status = UpdateStatus::Processing;
        Ok(())
    }

    pub(crate) fn finish(
        &mut self,
        at: DateTime<Utc>,
        outcome: Result<Option<String>, String>,
    ) -> crate::Result<()> {
        let to = if outcome.is_ok() {
            UpdateStatus::Completed
        } else {
            UpdateStatus::Failed
        };
        if self.status != UpdateStatus::Processing {
            return Err(crate::Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }

        self.status = to;
        self.processed_at = Some(at);
        match outcome {
            Ok(event_id) => self.emergency_event_id = event_id,
            Err(message) => self.error = Some(message),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mutation_tagging() {
        let mutation: ScheduleMutation = serde_json::from_value(json!({
            "kind": "emergency",
            "cue": "cue_out",
            "duration_ms": 60000
        }))
        .unwrap();
        assert_eq!(mutation.kind(), UpdateKind::Emergency);
        assert!(mutation.item_id().is_none());
    }

    #[test]
    fn test_validation() {
        let empty_modify = ScheduleMutation::Modify {
            item_id: "item-1".to_string(),
            changes: json!({}),
        };
        assert!(empty_modify.validate().is_err());

        let blank_delete = ScheduleMutation::Delete {
            item_id: "  ".to_string(),
        };
        assert!(blank_delete.validate().is_err());

        let zero_emergency = ScheduleMutation::Emergency {
            cue: CueKind::CueOut,
            duration_ms: Some(0),
            reason: None,
        };
        assert!(zero_emergency.validate().is_err());

        let insert = ScheduleMutation::Insert {
            item_id: "item-1".to_string(),
            position: None,
            data: json!({"title": "News"}),
        };
        assert!(insert.validate().is_ok());
    }

    #[test]
    fn test_lifecycle() {
        let mut update = ScheduleUpdate::new(
            "ch1",
            ScheduleMutation::Delete {
                item_id: "item-1".to_string(),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(update.kind, UpdateKind::Delete);
        assert_eq!(update.status, UpdateStatus::Pending);

        // Cannot finish before processing.
        assert!(update.finish(Utc::now(), Ok(None)).is_err());

        update.begin_processing().unwrap();
        assert!(update.begin_processing().is_err());

        update
            .finish(Utc::now(), Err("store unavailable".to_string()))
            .unwrap();
        assert_eq!(update.status, UpdateStatus::Failed);
        assert_eq!(update.error.as_deref(), Some("store unavailable"));
        assert!(update.finish(Utc::now(), Ok(None)).is_err());
    }
}
