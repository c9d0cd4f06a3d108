// Test doubles for the supervisor and worker.
//
// MemoryStore (AccountStore + EntityStore): accounts and entities in memory,
// with switches to simulate an unreachable store.
// MockEngine (SessionEngine): scripted sessions with pull results, failures,
// hangs and push injection.
// RecordingNotifier (NotifySink): remembers every batch.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use lookout_common::{
    Account, AccountId, AccountStatus, ConnectionRecord, ConversationRecord, Merge, UpsertOutcome,
};
use lookout_store::StoreError;

use crate::error::EngineError;
use crate::notify::{CaptureNotice, NotifySink};
use crate::traits::{
    AccountStore, EntityStore, PushEvent, PushSink, RawItem, Session, SessionEngine, SessionSpec,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Profile hash the fixture conversations use for the monitored account.
pub const SELF_HASH: &str = "ACoAASELF";
/// Profile hash of the fixture counterpart.
pub const PEER_HASH: &str = "ACoAAPEER";

/// An enabled, active account with no heartbeat yet.
pub fn account(id: AccountId) -> Account {
    Account {
        id,
        login: format!("account{id}@example.com"),
        credentials: json!({"cookie": format!("li_at-{id}")}),
        proxy: None,
        monitor_enabled: true,
        status: AccountStatus::Active,
        last_heartbeat_at: None,
        hash_id: None,
        callback: None,
    }
}

pub fn conversation_item(thread: &str, text: &str, at: DateTime<Utc>) -> RawItem {
    let millis = at.timestamp_millis();
    RawItem(json!({
        "entityUrn": format!("urn:li:msg_conversation:(urn:li:fsd_profile:{SELF_HASH},{thread})"),
        "conversationParticipants": [
            {"hostIdentityUrn": format!("urn:li:msg_messagingParticipant:urn:li:fsd_profile:{SELF_HASH}")},
            {
                "hostIdentityUrn": format!("urn:li:msg_messagingParticipant:urn:li:fsd_profile:{PEER_HASH}"),
                "participantType": {"member": {
                    "firstName": {"text": "Ada"},
                    "lastName": {"text": "Lovelace"}
                }}
            }
        ],
        "unreadCount": 1,
        "groupChat": false,
        "lastActivityAt": millis,
        "messages": {"elements": [{
            "body": {"text": text},
            "deliveredAt": millis,
            "actor": {"hostIdentityUrn": format!("urn:li:fsd_profile:{PEER_HASH}")}
        }]}
    }))
}

pub fn connection_item(member_id: &str, first_name: &str, at: DateTime<Utc>) -> RawItem {
    RawItem(json!({
        "objectUrn": format!("urn:li:member:{member_id}"),
        "createdAt": at.timestamp_millis(),
        "connectedMemberResolutionResult": {
            "entityUrn": format!("urn:li:fsd_profile:ACoAA{member_id}"),
            "firstName": first_name,
            "lastName": "Hopper",
            "headline": "Engineer",
            "publicIdentifier": format!("{}-{member_id}", first_name.to_lowercase())
        }
    }))
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    accounts: BTreeMap<AccountId, Account>,
    connections: HashMap<(AccountId, String), ConnectionRecord>,
    conversations: HashMap<(AccountId, String), ConversationRecord>,
    heartbeats: HashMap<AccountId, usize>,
    fail_reads: bool,
    fail_writes: bool,
}

/// In-memory account and entity store. Upserts happen under one lock, so
/// they are atomic per key like the Postgres store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let store = Self::new();
        for account in accounts {
            store.put_account(account);
        }
        store
    }

    pub fn put_account(&self, account: Account) {
        self.state.lock().unwrap().accounts.insert(account.id, account);
    }

    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.state.lock().unwrap().accounts.get(&id).cloned()
    }

    pub fn set_enabled(&self, id: AccountId, enabled: bool) {
        if let Some(a) = self.state.lock().unwrap().accounts.get_mut(&id) {
            a.monitor_enabled = enabled;
        }
    }

    pub fn set_status(&self, id: AccountId, status: AccountStatus) {
        if let Some(a) = self.state.lock().unwrap().accounts.get_mut(&id) {
            a.status = status;
        }
    }

    pub fn set_heartbeat(&self, id: AccountId, at: Option<DateTime<Utc>>) {
        if let Some(a) = self.state.lock().unwrap().accounts.get_mut(&id) {
            a.last_heartbeat_at = at;
        }
    }

    /// Number of heartbeats written for `id`.
    pub fn heartbeats(&self, id: AccountId) -> usize {
        self.state
            .lock()
            .unwrap()
            .heartbeats
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    /// Simulate an unreachable store for reads (ping, list, get).
    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    /// Simulate failing writes (heartbeats, status, upserts).
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    pub fn connections(&self) -> Vec<ConnectionRecord> {
        self.state.lock().unwrap().connections.values().cloned().collect()
    }

    pub fn conversations(&self) -> Vec<ConversationRecord> {
        self.state.lock().unwrap().conversations.values().cloned().collect()
    }

    pub fn conversation(&self, account_id: AccountId, id: &str) -> Option<ConversationRecord> {
        self.state
            .lock()
            .unwrap()
            .conversations
            .get(&(account_id, id.to_string()))
            .cloned()
    }

    fn read_guard(&self) -> Result<std::sync::MutexGuard<'_, StoreState>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(state)
    }

    fn write_guard(&self) -> Result<std::sync::MutexGuard<'_, StoreState>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_writes || state.fail_reads {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(state)
    }
}

fn upsert<T: Merge>(
    map: &mut HashMap<(AccountId, String), T>,
    key: (AccountId, String),
    record: &T,
) -> UpsertOutcome {
    match map.get_mut(&key) {
        None => {
            map.insert(key, record.as_inserted());
            UpsertOutcome::Created
        }
        Some(stored) => {
            if stored.merge_from(record) {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Unchanged
            }
        }
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.read_guard().map(|_| ())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self.read_guard()?.accounts.values().cloned().collect())
    }

    async fn list_eligible_accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self
            .read_guard()?
            .accounts
            .values()
            .filter(|a| a.is_eligible())
            .cloned()
            .collect())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.read_guard()?.accounts.get(&id).cloned())
    }

    async fn update_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.write_guard()?;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::AccountNotFound(id))?;
        account.status = status;
        Ok(())
    }

    async fn record_heartbeat(&self, id: AccountId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.write_guard()?;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::AccountNotFound(id))?;
        account.last_heartbeat_at = Some(at);
        *state.heartbeats.entry(id).or_default() += 1;
        Ok(())
    }

    async fn set_hash_id(&self, id: AccountId, hash_id: &str) -> Result<(), StoreError> {
        let mut state = self.write_guard()?;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::AccountNotFound(id))?;
        account.hash_id = Some(hash_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn upsert_connection(
        &self,
        record: &ConnectionRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.write_guard()?;
        let key = (record.account_id, record.member_id.clone());
        Ok(upsert(&mut state.connections, key, record))
    }

    async fn upsert_conversation(
        &self,
        record: &ConversationRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.write_guard()?;
        let key = (record.account_id, record.conversation_id.clone());
        Ok(upsert(&mut state.conversations, key, record))
    }
}

// ---------------------------------------------------------------------------
// MockEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailure {
    Unavailable,
    AuthRequired,
}

#[derive(Default)]
struct EngineState {
    open_failures: HashMap<AccountId, OpenFailure>,
    pull_items: HashMap<AccountId, Vec<Value>>,
    failing_pulls: HashSet<AccountId>,
    hanging_pulls: HashSet<AccountId>,
    identities: HashMap<AccountId, String>,
    sinks: HashMap<AccountId, PushSink>,
    opened: HashMap<AccountId, usize>,
    closed: HashMap<AccountId, usize>,
    pulls: HashMap<AccountId, usize>,
}

/// Scripted session engine. Every account gets a working, logged-in session
/// with an empty pull unless configured otherwise.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<EngineState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items every pull for `account_id` returns.
    pub fn on_pull(self, account_id: AccountId, items: Vec<RawItem>) -> Self {
        self.set_pull_items(account_id, items);
        self
    }

    pub fn with_identity(self, account_id: AccountId, hash: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .identities
            .insert(account_id, hash.to_string());
        self
    }

    pub fn set_pull_items(&self, account_id: AccountId, items: Vec<RawItem>) {
        self.state
            .lock()
            .unwrap()
            .pull_items
            .insert(account_id, items.into_iter().map(|i| i.0).collect());
    }

    pub fn fail_open(&self, account_id: AccountId, failure: Option<OpenFailure>) {
        let mut state = self.state.lock().unwrap();
        match failure {
            Some(f) => state.open_failures.insert(account_id, f),
            None => state.open_failures.remove(&account_id),
        };
    }

    pub fn fail_pulls(&self, account_id: AccountId, fail: bool) {
        let mut state = self.state.lock().unwrap();
        if fail {
            state.failing_pulls.insert(account_id);
        } else {
            state.failing_pulls.remove(&account_id);
        }
    }

    /// Make pulls block forever: the worker stays alive but stops beating.
    pub fn hang_pulls(&self, account_id: AccountId, hang: bool) {
        let mut state = self.state.lock().unwrap();
        if hang {
            state.hanging_pulls.insert(account_id);
        } else {
            state.hanging_pulls.remove(&account_id);
        }
    }

    /// Inject a push event into the account's open session. Returns false
    /// when no session is subscribed.
    pub fn push(&self, account_id: AccountId, event: PushEvent) -> bool {
        let sink = self.state.lock().unwrap().sinks.get(&account_id).cloned();
        sink.is_some_and(|s| s.deliver(event))
    }

    pub fn subscribed(&self, account_id: AccountId) -> bool {
        self.state.lock().unwrap().sinks.contains_key(&account_id)
    }

    pub fn opened(&self, account_id: AccountId) -> usize {
        count(&self.state.lock().unwrap().opened, account_id)
    }

    pub fn closed(&self, account_id: AccountId) -> usize {
        count(&self.state.lock().unwrap().closed, account_id)
    }

    pub fn pulls(&self, account_id: AccountId) -> usize {
        count(&self.state.lock().unwrap().pulls, account_id)
    }
}

fn count(map: &HashMap<AccountId, usize>, account_id: AccountId) -> usize {
    map.get(&account_id).copied().unwrap_or(0)
}

#[async_trait]
impl SessionEngine for MockEngine {
    async fn open_session(&self, spec: &SessionSpec) -> Result<Box<dyn Session>, EngineError> {
        let mut state = self.state.lock().unwrap();
        let opened = state.opened.entry(spec.account_id).or_default();
        *opened += 1;
        let session_id = format!("mock-{}-{}", spec.account_id, opened);

        match state.open_failures.get(&spec.account_id) {
            Some(OpenFailure::Unavailable) => {
                return Err(EngineError::Unavailable("mock engine at capacity".to_string()))
            }
            Some(OpenFailure::AuthRequired) => return Err(EngineError::AuthRequired),
            None => {}
        }

        Ok(Box::new(MockSession {
            account_id: spec.account_id,
            session_id,
            state: self.state.clone(),
        }))
    }
}

struct MockSession {
    account_id: AccountId,
    session_id: String,
    state: Arc<Mutex<EngineState>>,
}

#[async_trait]
impl Session for MockSession {
    fn id(&self) -> &str {
        &self.session_id
    }

    async fn identity(&self) -> Result<Option<String>, EngineError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .identities
            .get(&self.account_id)
            .cloned())
    }

    async fn subscribe_push(&mut self, sink: PushSink) -> Result<(), EngineError> {
        self.state
            .lock()
            .unwrap()
            .sinks
            .insert(self.account_id, sink);
        Ok(())
    }

    async fn pull(&self) -> Result<Vec<RawItem>, EngineError> {
        let (hang, result) = {
            let mut state = self.state.lock().unwrap();
            *state.pulls.entry(self.account_id).or_default() += 1;
            let hang = state.hanging_pulls.contains(&self.account_id);
            let result = if state.failing_pulls.contains(&self.account_id) {
                Err(EngineError::Session("mock pull failure".to_string()))
            } else {
                Ok(state
                    .pull_items
                    .get(&self.account_id)
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .map(RawItem)
                    .collect())
            };
            (hang, result)
        };

        if hang {
            std::future::pending::<()>().await;
        }
        result
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.sinks.remove(&self.account_id);
        *state.closed.entry(self.account_id).or_default() += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    batches: Mutex<Vec<Vec<CaptureNotice>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notice received, flattened in delivery order.
    pub fn notices(&self) -> Vec<CaptureNotice> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }

    /// Number of `send` calls.
    pub fn batches(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl NotifySink for RecordingNotifier {
    async fn send(&self, notices: &[CaptureNotice]) -> anyhow::Result<()> {
        self.batches.lock().unwrap().push(notices.to_vec());
        Ok(())
    }
}
