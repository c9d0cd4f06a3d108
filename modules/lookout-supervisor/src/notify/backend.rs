use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use lookout_common::{AccountId, Channel, EntityKind, UpsertOutcome};

/// A captured entity was created or changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureNotice {
    pub account_id: AccountId,
    pub login: String,
    pub kind: EntityKind,
    pub key: String,
    pub outcome: UpsertOutcome,
    pub channel: Channel,
    pub observed_at: DateTime<Utc>,
}

/// Pluggable downstream notification sink. Receives one batch per pull or
/// push capture, never empty.
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn send(&self, notices: &[CaptureNotice]) -> anyhow::Result<()>;
}
