use async_trait::async_trait;

use super::backend::{CaptureNotice, NotifySink};

/// Used when no webhook is configured.
pub struct NoopSink;

#[async_trait]
impl NotifySink for NoopSink {
    async fn send(&self, _notices: &[CaptureNotice]) -> anyhow::Result<()> {
        Ok(())
    }
}
