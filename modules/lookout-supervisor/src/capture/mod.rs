//! Capture normalizer: raw push/pull items in, deduplicated upserts out.
//!
//! Both channels go through the same upsert path, so the same logical item
//! observed twice (or out of order) converges to one stored record.

pub mod parse;
pub mod time;

use std::sync::Arc;

use tracing::debug;

use lookout_common::{AccountId, Channel, EntityKind, UpsertOutcome};

use crate::error::CaptureError;
use crate::traits::{EntityStore, RawItem};
use parse::Entity;

/// Result of storing one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub kind: EntityKind,
    /// Natural key within the account: member id or conversation id.
    pub key: String,
    pub outcome: UpsertOutcome,
}

pub struct Normalizer {
    account_id: AccountId,
    self_hash: Option<String>,
    store: Arc<dyn EntityStore>,
}

impl Normalizer {
    pub fn new(account_id: AccountId, store: Arc<dyn EntityStore>) -> Self {
        Self {
            account_id,
            self_hash: None,
            store,
        }
    }

    /// The account's own profile hash, once known.
    pub fn set_self_hash(&mut self, hash: Option<String>) {
        self.self_hash = hash;
    }

    pub async fn normalize_and_store(
        &self,
        item: &RawItem,
        channel: Channel,
    ) -> Result<Capture, CaptureError> {
        let entity = parse::parse_item(self.account_id, self.self_hash.as_deref(), &item.0)?;

        let capture = match entity {
            Entity::Connection(record) => {
                let outcome = self.store.upsert_connection(&record).await?;
                Capture {
                    kind: EntityKind::Connection,
                    key: record.member_id,
                    outcome,
                }
            }
            Entity::Conversation(record) => {
                let outcome = self.store.upsert_conversation(&record).await?;
                Capture {
                    kind: EntityKind::Conversation,
                    key: record.conversation_id,
                    outcome,
                }
            }
        };

        debug!(
            channel = %channel,
            kind = %capture.kind,
            key = %capture.key,
            outcome = %capture.outcome,
            "Capture stored"
        );
        Ok(capture)
    }
}
