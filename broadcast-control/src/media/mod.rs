//! Interfaces to the media server and schedule persistence.
//!
//! The orchestrator never speaks a wire protocol itself. It drives the
//! media server through [`MediaControl`] and schedule persistence through
//! [`ScheduleStore`]; every call is wrapped in [`bounded`] so a hung
//! collaborator turns into an ordinary failure instead of a stalled tick.

mod memory_store;
mod noop;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{CueKind, ScheduleMutation, StreamSource};
use crate::{Error, Result};

pub use memory_store::InMemoryScheduleStore;
pub use noop::NoOpMediaControl;

/// Control surface of the media server.
#[async_trait]
pub trait MediaControl: Send + Sync + 'static {
    /// Make `source` the live input of `channel_id`.
    async fn redirect_channel(&self, channel_id: &str, source: &StreamSource) -> Result<()>;

    /// Insert an SCTE-35 marker into the channel output.
    async fn inject_marker(
        &self,
        channel_id: &str,
        kind: CueKind,
        marker_id: u64,
        duration: Option<Duration>,
    ) -> Result<()>;

    /// Ask the server to pick up a changed schedule for `channel_id`.
    async fn reload_schedule(&self, channel_id: &str) -> Result<()>;
}

/// One entry of a channel's playout schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleItem {
    pub id: String,
    pub data: serde_json::Value,
}

/// Persistent storage for channel schedules.
#[async_trait]
pub trait ScheduleStore: Send + Sync + 'static {
    async fn read_schedule(&self, channel_id: &str) -> Result<Vec<ScheduleItem>>;

    /// Apply an insert/modify/delete mutation. Emergency mutations are not
    /// store operations and must be rejected.
    async fn apply_mutation(&self, channel_id: &str, mutation: &ScheduleMutation) -> Result<()>;

    async fn persist(&self, channel_id: &str) -> Result<()>;
}

/// Run `fut`, failing with [`Error::Timeout`] once `timeout` elapses.
pub async fn bounded<T, F>(operation: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            after_ms: timeout.as_millis() as u64,
        }),
    }
}
