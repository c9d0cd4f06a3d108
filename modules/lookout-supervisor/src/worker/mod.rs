//! One account's capture session, end to end.
//!
//! A worker opens a session, subscribes to its push channel and then loops
//! on a fixed period: pull, heartbeat, re-check eligibility. Push events are
//! handled between ticks. Any session or store failure ends the run; the
//! supervisor decides whether to start a new one.

pub mod handle;

pub use handle::{StopOutcome, WorkerHandle};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use lookout_common::file_config::WorkerSettings;
use lookout_common::{Account, AccountStatus, Channel};

use crate::capture::Normalizer;
use crate::error::{CaptureError, EngineError, WorkerError};
use crate::notify::{CaptureNotice, NoticeQueue, NotifyRouter};
use crate::throttle::PullThrottle;
use crate::traits::{
    AccountStore, EntityStore, PushEvent, PushSink, RawItem, Session, SessionEngine, SessionSpec,
};

/// Notification batches a worker may have waiting for delivery.
const NOTICE_QUEUE_BATCHES: usize = 16;

/// How a worker run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Stopped on the supervisor's request.
    Stopped,
    /// The worker found its account no longer eligible.
    Ineligible,
    /// No session could be acquired. Not counted toward escalation.
    SessionUnavailable(String),
    /// The account needs a human to log in again; status was set to `error`.
    AuthRequired,
    /// The session or the store failed mid-run.
    Failed(String),
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Ineligible => write!(f, "ineligible"),
            Self::SessionUnavailable(reason) => write!(f, "session unavailable: {reason}"),
            Self::AuthRequired => write!(f, "login required"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub push_buffer: usize,
    pub nudge_min_gap: Duration,
    pub nudge_hourly_cap: u32,
}

impl From<&WorkerSettings> for WorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            push_buffer: settings.push_buffer.max(1),
            nudge_min_gap: settings.nudge_min_gap(),
            nudge_hourly_cap: settings.nudge_hourly_cap,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&WorkerSettings::default())
    }
}

/// Collaborators shared by every worker.
pub struct WorkerDeps {
    pub accounts: Arc<dyn AccountStore>,
    pub entities: Arc<dyn EntityStore>,
    pub engine: Arc<dyn SessionEngine>,
    pub notify: Arc<NotifyRouter>,
}

/// Spawns workers with shared dependencies.
pub struct WorkerLauncher {
    deps: Arc<WorkerDeps>,
    config: WorkerConfig,
}

impl WorkerLauncher {
    pub fn new(deps: WorkerDeps, config: WorkerConfig) -> Self {
        Self {
            deps: Arc::new(deps),
            config,
        }
    }

    pub fn launch(&self, account: Account, started_at: DateTime<Utc>) -> WorkerHandle {
        let worker = Worker::new(account, self.deps.clone(), self.config.clone());
        WorkerHandle::spawn(worker, started_at)
    }
}

pub struct Worker {
    account: Account,
    deps: Arc<WorkerDeps>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(account: Account, deps: Arc<WorkerDeps>, config: WorkerConfig) -> Self {
        Self {
            account,
            deps,
            config,
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Run until stopped through `stop` or until the run ends on its own.
    pub async fn run(self, stop: watch::Receiver<bool>) -> WorkerExit {
        let span = info_span!("worker", account_id = self.account.id, run_id = %Uuid::new_v4());
        self.run_inner(stop).instrument(span).await
    }

    async fn run_inner(self, mut stop: watch::Receiver<bool>) -> WorkerExit {
        info!(login = %self.account.login, "Worker starting");

        let spec = SessionSpec::from(&self.account);
        let mut session = match self.deps.engine.open_session(&spec).await {
            Ok(session) => session,
            Err(EngineError::AuthRequired) => {
                self.mark_login_required().await;
                return WorkerExit::AuthRequired;
            }
            Err(e) => {
                warn!(error = %e, "Could not acquire a session");
                return WorkerExit::SessionUnavailable(e.to_string());
            }
        };
        info!(session_id = %session.id(), "Session open");

        let exit = self.capture_loop(session.as_mut(), &mut stop).await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close session");
        }
        if exit == WorkerExit::AuthRequired {
            self.mark_login_required().await;
        }

        info!(exit = %exit, "Worker exited");
        exit
    }

    async fn capture_loop(
        &self,
        session: &mut dyn Session,
        stop: &mut watch::Receiver<bool>,
    ) -> WorkerExit {
        if *stop.borrow() {
            return WorkerExit::Stopped;
        }

        let mut normalizer = Normalizer::new(self.account.id, self.deps.entities.clone());
        normalizer.set_self_hash(self.discover_identity(session).await);
        let notices = NoticeQueue::spawn(
            self.deps.notify.sink_for(&self.account),
            NOTICE_QUEUE_BATCHES,
        );

        let (tx, mut rx) = mpsc::channel(self.config.push_buffer.max(1));
        if let Err(e) = session.subscribe_push(PushSink::new(tx)).await {
            return exit_for(e.into());
        }
        let mut push_open = true;

        let mut throttle =
            PullThrottle::new(self.config.nudge_min_gap, self.config.nudge_hourly_cap);
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    let stopping = changed.is_err() || *stop.borrow();
                    if stopping {
                        info!("Stop requested");
                        return WorkerExit::Stopped;
                    }
                }
                event = rx.recv(), if push_open => match event {
                    Some(PushEvent::Capture(item)) => {
                        match self.store_capture(&normalizer, &item, Channel::Push).await {
                            Ok(notice) => notices.push(notice.into_iter().collect()),
                            Err(e) => return exit_for(e),
                        }
                    }
                    Some(PushEvent::Nudge { kind, badge_count }) => {
                        if !throttle.try_acquire(Instant::now()) {
                            debug!(kind = %kind, badge_count, "Nudge throttled");
                            continue;
                        }
                        info!(kind = %kind, badge_count, "Nudge received, pulling early");
                        if let Err(e) = self.pull_once(session, &normalizer, &notices).await {
                            return exit_for(e);
                        }
                    }
                    None => {
                        warn!("Push channel closed, continuing with pulls only");
                        push_open = false;
                    }
                },
                _ = ticker.tick() => {
                    match self.tick(session, &normalizer, &notices).await {
                        Ok(None) => {}
                        Ok(Some(exit)) => return exit,
                        Err(e) => return exit_for(e),
                    }
                }
            }
        }
    }

    /// One poll period: pull, heartbeat, eligibility self-check.
    async fn tick(
        &self,
        session: &dyn Session,
        normalizer: &Normalizer,
        notices: &NoticeQueue,
    ) -> Result<Option<WorkerExit>, WorkerError> {
        self.pull_once(session, normalizer, notices).await?;

        self.deps
            .accounts
            .record_heartbeat(self.account.id, Utc::now())
            .await?;

        match self.deps.accounts.get_account(self.account.id).await? {
            Some(account) if account.is_eligible() => Ok(None),
            Some(account) => {
                info!(
                    status = %account.status,
                    monitor_enabled = account.monitor_enabled,
                    "Account no longer eligible, stopping"
                );
                Ok(Some(WorkerExit::Ineligible))
            }
            None => {
                info!("Account no longer exists, stopping");
                Ok(Some(WorkerExit::Ineligible))
            }
        }
    }

    async fn pull_once(
        &self,
        session: &dyn Session,
        normalizer: &Normalizer,
        notices: &NoticeQueue,
    ) -> Result<(), WorkerError> {
        let items = session.pull().await?;
        let mut changed = Vec::new();
        for item in &items {
            if let Some(notice) = self.store_capture(normalizer, item, Channel::Pull).await? {
                changed.push(notice);
            }
        }
        debug!(items = items.len(), changed = changed.len(), "Pull complete");
        notices.push(changed);
        Ok(())
    }

    /// Normalize and store one item, returning a notice if it changed
    /// anything. Malformed items are dropped; store failures end the run.
    async fn store_capture(
        &self,
        normalizer: &Normalizer,
        item: &RawItem,
        channel: Channel,
    ) -> Result<Option<CaptureNotice>, WorkerError> {
        let capture = match normalizer.normalize_and_store(item, channel).await {
            Ok(capture) => capture,
            Err(CaptureError::Malformed(e)) => {
                warn!(channel = %channel, error = %e, "Dropping malformed capture");
                return Ok(None);
            }
            Err(CaptureError::Store(e)) => return Err(e.into()),
        };

        if !capture.outcome.is_change() {
            return Ok(None);
        }
        Ok(Some(CaptureNotice {
            account_id: self.account.id,
            login: self.account.login.clone(),
            kind: capture.kind,
            key: capture.key,
            outcome: capture.outcome,
            channel,
            observed_at: Utc::now(),
        }))
    }

    /// The account's own profile hash: stored, or asked from the session
    /// and persisted. Failures only cost sender attribution.
    async fn discover_identity(&self, session: &dyn Session) -> Option<String> {
        if let Some(ref hash) = self.account.hash_id {
            return Some(hash.clone());
        }

        let hash = match session.identity().await {
            Ok(Some(hash)) => hash,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Identity lookup failed");
                return None;
            }
        };

        match self.deps.accounts.set_hash_id(self.account.id, &hash).await {
            Ok(()) => info!(hash_id = %hash, "Discovered own profile hash"),
            Err(e) => warn!(error = %e, "Failed to persist own profile hash"),
        }
        Some(hash)
    }

    async fn mark_login_required(&self) {
        warn!("Account is not logged in, marking error");
        if let Err(e) = self
            .deps
            .accounts
            .update_account_status(self.account.id, AccountStatus::Error)
            .await
        {
            warn!(error = %e, "Failed to mark account error");
        }
    }
}

fn exit_for(err: WorkerError) -> WorkerExit {
    match err {
        WorkerError::Engine(EngineError::AuthRequired) => WorkerExit::AuthRequired,
        WorkerError::Engine(e) => WorkerExit::Failed(e.to_string()),
        WorkerError::Store(e) => WorkerExit::Failed(e.to_string()),
    }
}
