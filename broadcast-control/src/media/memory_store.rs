//! In-memory schedule store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use super::{ScheduleItem, ScheduleStore};
use crate::domain::ScheduleMutation;
use crate::{Error, Result};

/// Schedule store keeping one ordered item list per channel.
#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    schedules: RwLock<HashMap<String, Vec<ScheduleItem>>>,
    persist_counts: RwLock<HashMap<String, u64>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `persist` calls seen for `channel_id`.
    pub fn persist_count(&self, channel_id: &str) -> u64 {
        self.persist_counts
            .read()
            .get(channel_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn read_schedule(&self, channel_id: &str) -> Result<Vec<ScheduleItem>> {
        Ok(self
            .schedules
            .read()
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn apply_mutation(&self, channel_id: &str, mutation: &ScheduleMutation) -> Result<()> {
        let mut schedules = self.schedules.write();
        let items = schedules.entry(channel_id.to_string()).or_default();

        match mutation {
            ScheduleMutation::Insert {
                item_id,
                position,
                data,
            } => {
                if items.iter().any(|item| &item.id == item_id) {
                    return Err(Error::validation(format!(
                        "schedule item {} already exists on {}",
                        item_id, channel_id
                    )));
                }
                let at = position.unwrap_or(items.len()).min(items.len());
                items.insert(
                    at,
                    ScheduleItem {
                        id: item_id.clone(),
                        data: data.clone(),
                    },
                );
            }
            ScheduleMutation::Modify { item_id, changes } => {
                let item = items
                    .iter_mut()
                    .find(|item| &item.id == item_id)
                    .ok_or_else(|| Error::not_found("ScheduleItem", item_id.clone()))?;
                merge(&mut item.data, changes);
            }
            ScheduleMutation::Delete { item_id } => {
                let before = items.len();
                items.retain(|item| &item.id != item_id);
                if items.len() == before {
                    return Err(Error::not_found("ScheduleItem", item_id.clone()));
                }
            }
            ScheduleMutation::Emergency { .. } => {
                return Err(Error::validation(
                    "emergency updates are not schedule store mutations",
                ));
            }
        }

        debug!(channel_id, kind = %mutation.kind(), "Applied schedule mutation");
        Ok(())
    }

    async fn persist(&self, channel_id: &str) -> Result<()> {
        *self
            .persist_counts
            .write()
            .entry(channel_id.to_string())
            .or_insert(0) += 1;
        Ok(())
    }
}

/// Shallow-merge `changes` into `target`; non-object targets are replaced.
fn merge(target: &mut Value, changes: &Value) {
    match (target.as_object_mut(), changes.as_object()) {
        (Some(target_map), Some(change_map)) => {
            for (key, value) in change_map {
                target_map.insert(key.clone(), value.clone());
            }
        }
        _ => *target = changes.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CueKind;
    use serde_json::json;

    fn insert(id: &str, position: Option<usize>) -> ScheduleMutation {
        ScheduleMutation::Insert {
            item_id: id.to_string(),
            position,
            data: json!({ "title": id }),
        }
    }

    #[tokio::test]
    async fn test_insert_modify_delete() {
        let store = InMemoryScheduleStore::new();
        store.apply_mutation("ch1", &insert("a", None)).await.unwrap();
        store.apply_mutation("ch1", &insert("b", Some(0))).await.unwrap();

        let ids: Vec<String> = store
            .read_schedule("ch1")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);

        store
            .apply_mutation(
                "ch1",
                &ScheduleMutation::Modify {
                    item_id: "a".to_string(),
                    changes: json!({ "title": "A!", "live": true }),
                },
            )
            .await
            .unwrap();
        let schedule = store.read_schedule("ch1").await.unwrap();
        assert_eq!(schedule[1].data, json!({ "title": "A!", "live": true }));

        store
            .apply_mutation(
                "ch1",
                &ScheduleMutation::Delete {
                    item_id: "b".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(store.read_schedule("ch1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_duplicates_missing_and_emergency() {
        let store = InMemoryScheduleStore::new();
        store.apply_mutation("ch1", &insert("a", None)).await.unwrap();
        assert!(store.apply_mutation("ch1", &insert("a", None)).await.is_err());

        let missing = ScheduleMutation::Delete {
            item_id: "zzz".to_string(),
        };
        assert!(matches!(
            store.apply_mutation("ch1", &missing).await,
            Err(Error::NotFound { .. })
        ));

        let emergency = ScheduleMutation::Emergency {
            cue: CueKind::CueOut,
            duration_ms: None,
            reason: None,
        };
        assert!(store.apply_mutation("ch1", &emergency).await.is_err());
    }

    #[tokio::test]
    async fn test_persist_counts() {
        let store = InMemoryScheduleStore::new();
        store.persist("ch1").await.unwrap();
        store.persist("ch1").await.unwrap();
        assert_eq!(store.persist_count("ch1"), 2);
        assert_eq!(store.persist_count("ch2"), 0);
    }
}
