// Trait abstractions for the worker and supervisor collaborators.
//
// AccountStore: configuration store: accounts, heartbeats, status.
// EntityStore: atomic per-key upserts of captured entities.
// SessionEngine / Session: the browser automation service.
//
// The Postgres store implements both store traits; the HTTP engine lives in
// `crate::engine`. In-memory doubles are in `crate::testing`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use lookout_common::{
    Account, AccountId, AccountStatus, ConnectionRecord, ConversationRecord, EntityKind,
    ProxyConfig, UpsertOutcome,
};
use lookout_store::{PgStore, StoreError};

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// AccountStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Cheap reachability check.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;

    async fn list_eligible_accounts(&self) -> Result<Vec<Account>, StoreError>;

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn update_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
    ) -> Result<(), StoreError>;

    async fn record_heartbeat(&self, id: AccountId, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn set_hash_id(&self, id: AccountId, hash_id: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl AccountStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        PgStore::ping(self).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        PgStore::list_accounts(self).await
    }

    async fn list_eligible_accounts(&self) -> Result<Vec<Account>, StoreError> {
        PgStore::list_eligible_accounts(self).await
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        PgStore::get_account(self, id).await
    }

    async fn update_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
    ) -> Result<(), StoreError> {
        PgStore::update_account_status(self, id, status).await
    }

    async fn record_heartbeat(&self, id: AccountId, at: DateTime<Utc>) -> Result<(), StoreError> {
        PgStore::record_heartbeat(self, id, at).await
    }

    async fn set_hash_id(&self, id: AccountId, hash_id: &str) -> Result<(), StoreError> {
        PgStore::set_hash_id(self, id, hash_id).await
    }
}

// ---------------------------------------------------------------------------
// EntityStore
// ---------------------------------------------------------------------------

/// Upserts must be atomic per natural key: concurrent calls for the same key
/// yield exactly one `Created`.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn upsert_connection(&self, record: &ConnectionRecord)
        -> Result<UpsertOutcome, StoreError>;

    async fn upsert_conversation(
        &self,
        record: &ConversationRecord,
    ) -> Result<UpsertOutcome, StoreError>;
}

#[async_trait]
impl EntityStore for PgStore {
    async fn upsert_connection(
        &self,
        record: &ConnectionRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        PgStore::upsert_connection(self, record).await
    }

    async fn upsert_conversation(
        &self,
        record: &ConversationRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        PgStore::upsert_conversation(self, record).await
    }
}

// ---------------------------------------------------------------------------
// Session engine
// ---------------------------------------------------------------------------

/// A raw item as produced by the engine, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem(pub serde_json::Value);

impl From<serde_json::Value> for RawItem {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Something the push channel observed.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Capture(RawItem),
    /// An unread badge appeared; asks for an early pull of that view.
    Nudge { kind: EntityKind, badge_count: u32 },
}

/// Non-blocking handoff from the push channel to the worker loop.
#[derive(Clone)]
pub struct PushSink {
    tx: mpsc::Sender<PushEvent>,
}

impl PushSink {
    pub fn new(tx: mpsc::Sender<PushEvent>) -> Self {
        Self { tx }
    }

    /// Hand over an event without waiting. A full buffer drops the event
    /// (the next pull observes the same data). Returns false once the worker
    /// has gone away.
    pub fn deliver(&self, event: PushEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Push buffer full, dropping event");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// What the engine needs to open a session for one account.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub account_id: AccountId,
    pub login: String,
    pub credentials: serde_json::Value,
    pub proxy: Option<ProxyConfig>,
}

impl From<&Account> for SessionSpec {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id,
            login: account.login.clone(),
            credentials: account.credentials.clone(),
            proxy: account.proxy.clone(),
        }
    }
}

#[async_trait]
pub trait SessionEngine: Send + Sync {
    /// Acquire a logged-in session. `Unavailable` when none can be acquired,
    /// `AuthRequired` when the account needs a human to log in again.
    async fn open_session(&self, spec: &SessionSpec) -> Result<Box<dyn Session>, EngineError>;
}

#[async_trait]
pub trait Session: Send + Sync {
    fn id(&self) -> &str;

    /// Profile hash of the account the session is logged in as, if known.
    async fn identity(&self) -> Result<Option<String>, EngineError>;

    /// Start delivering push events to `sink`. Delivery runs in the
    /// background until the session is closed.
    async fn subscribe_push(&mut self, sink: PushSink) -> Result<(), EngineError>;

    /// Current state of the monitored views.
    async fn pull(&self) -> Result<Vec<RawItem>, EngineError>;

    async fn close(&mut self) -> Result<(), EngineError>;
}
