use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{warn, Instrument};

use super::backend::{CaptureNotice, NotifySink};

/// Per-worker delivery queue. One task drains it in order, so a large pull
/// costs one request and a worker never has more than `capacity` batches
/// in flight. The task ends once the queue is dropped and drained.
pub struct NoticeQueue {
    tx: mpsc::Sender<Vec<CaptureNotice>>,
}

impl NoticeQueue {
    pub fn spawn(sink: Arc<dyn NotifySink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Vec<CaptureNotice>>(capacity.max(1));
        tokio::spawn(
            async move {
                while let Some(batch) = rx.recv().await {
                    if let Err(e) = sink.send(&batch).await {
                        warn!(error = %e, notices = batch.len(), "Failed to send notifications");
                    }
                }
            }
            .in_current_span(),
        );
        Self { tx }
    }

    /// Queue one batch. A full queue drops the batch with a warning.
    pub fn push(&self, batch: Vec<CaptureNotice>) {
        if batch.is_empty() {
            return;
        }
        match self.tx.try_send(batch) {
            Ok(()) => {}
            Err(TrySendError::Full(batch)) => {
                warn!(notices = batch.len(), "Notification queue full, dropping batch");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
