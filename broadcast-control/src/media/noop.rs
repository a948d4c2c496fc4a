use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::MediaControl;
use crate::Result;
use crate::domain::{CueKind, StreamSource};

/// Media control that only logs what it would have done.
///
/// Used by the daemon when no media server is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMediaControl;

#[async_trait]
impl MediaControl for NoOpMediaControl {
    async fn redirect_channel(&self, channel_id: &str, source: &StreamSource) -> Result<()> {
        info!(
            channel_id,
            source_id = %source.id,
            address = %source.address,
            "Redirect channel (no-op)"
        );
        Ok(())
    }

    async fn inject_marker(
        &self,
        channel_id: &str,
        kind: CueKind,
        marker_id: u64,
        duration: Option<Duration>,
    ) -> Result<()> {
        info!(
            channel_id,
            %kind,
            marker_id,
            duration_ms = duration.map(|d| d.as_millis() as u64),
            "Inject marker (no-op)"
        );
        Ok(())
    }

    async fn reload_schedule(&self, channel_id: &str) -> Result<()> {
        info!(channel_id, "Reload schedule (no-op)");
        Ok(())
    }
}
