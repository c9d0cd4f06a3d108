use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use lookout_common::{Account, AccountId, AccountStatus, Settings};
use lookout_store::StoreError;

use crate::health::HealthReport;
use crate::policy::{Decision, Observation, RestartLedger, RestartPolicy};
use crate::traits::AccountStore;
use crate::types::ReconcileStats;
use crate::worker::{StopOutcome, WorkerExit, WorkerHandle, WorkerLauncher};

/// Work left for after the cycle's concurrent stops.
enum Followup {
    Restart(Account),
    MarkError(AccountId),
}

/// Wakes the supervisor loop for an immediate reconcile.
#[derive(Clone, Default)]
pub struct ReconcileTrigger(Arc<Notify>);

impl ReconcileTrigger {
    pub fn reconcile_now(&self) {
        self.0.notify_one();
    }
}

/// Keeps the set of running workers equal to the set of eligible accounts.
///
/// The worker registry is owned here and nowhere else; workers report back
/// only through heartbeats and status in the account store.
pub struct Supervisor {
    accounts: Arc<dyn AccountStore>,
    launcher: WorkerLauncher,
    policy: RestartPolicy,
    ledger: RestartLedger,
    workers: HashMap<AccountId, WorkerHandle>,
    reconcile_interval: Duration,
    stop_grace: Duration,
    trigger: ReconcileTrigger,
}

impl Supervisor {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        launcher: WorkerLauncher,
        settings: &Settings,
    ) -> Self {
        Self {
            accounts,
            launcher,
            policy: RestartPolicy::from_settings(&settings.policy),
            ledger: RestartLedger::from_settings(&settings.policy),
            workers: HashMap::new(),
            reconcile_interval: settings.supervisor.reconcile_interval(),
            stop_grace: settings.supervisor.stop_grace(),
            trigger: ReconcileTrigger::default(),
        }
    }

    /// Override the stop grace period (tests use milliseconds).
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn trigger(&self) -> ReconcileTrigger {
        self.trigger.clone()
    }

    /// Accounts with a registered worker, in id order.
    pub fn running(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.workers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn worker_alive(&self, account_id: AccountId) -> bool {
        self.workers
            .get(&account_id)
            .is_some_and(WorkerHandle::is_alive)
    }

    pub fn worker_started_at(&self, account_id: AccountId) -> Option<DateTime<Utc>> {
        self.workers.get(&account_id).map(WorkerHandle::started_at)
    }

    pub fn recent_restarts(&self, account_id: AccountId) -> usize {
        self.ledger.recent(account_id)
    }

    /// Reconcile on the fixed cadence, or early when triggered, until
    /// `shutdown` resolves. Then stop every worker.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let trigger = self.trigger.0.clone();
        let mut ticker = tokio::time::interval(self.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.reconcile_interval.as_secs(),
            "Supervisor loop starting"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
                _ = trigger.notified() => info!("Reconcile requested"),
            }

            match self.reconcile().await {
                Ok(stats) if stats.is_noop() => info!("Reconcile complete, no changes. {stats}"),
                Ok(stats) => info!("Reconcile complete. {stats}"),
                Err(e) => warn!(error = %e, "Store unavailable, skipping reconcile cycle"),
            }
        }

        self.shutdown().await;
    }

    pub async fn reconcile(&mut self) -> Result<ReconcileStats, StoreError> {
        self.reconcile_at(Utc::now()).await
    }

    /// One reconcile pass at `now`. A store failure before any decision is
    /// made aborts the cycle without touching running workers.
    pub async fn reconcile_at(&mut self, now: DateTime<Utc>) -> Result<ReconcileStats, StoreError> {
        self.accounts.ping().await?;
        let accounts = self.accounts.list_accounts().await?;

        let mut stats = ReconcileStats::default();
        let mut eligible: Vec<Account> = accounts.into_iter().filter(Account::is_eligible).collect();
        eligible.sort_by_key(|a| a.id);
        stats.eligible = eligible.len();

        // running \ eligible: stop concurrently, each with the grace period.
        let stale: Vec<AccountId> = self
            .workers
            .keys()
            .filter(|id| !eligible.iter().any(|a| a.id == **id))
            .copied()
            .collect();
        let handles: Vec<WorkerHandle> = stale
            .iter()
            .filter_map(|id| self.workers.remove(id))
            .collect();
        let stopped = self.stop_all(handles, &mut stats).await;
        for id in stopped {
            self.ledger.forget(id);
        }

        // eligible \ running and running ∩ eligible, isolated per account.
        // Restarts and escalations are collected so hung workers are
        // stopped together rather than one grace period at a time.
        let mut followups = Vec::new();
        let mut to_stop = Vec::new();
        for account in &eligible {
            match self.reconcile_account(account, now, &mut stats).await {
                Ok(None) => {}
                Ok(Some(followup)) => {
                    if let Some(handle) = self.workers.remove(&account.id) {
                        to_stop.push(handle);
                    }
                    followups.push(followup);
                }
                Err(e) => {
                    stats.errors += 1;
                    warn!(account_id = account.id, error = %e, "Reconcile failed for account");
                }
            }
        }
        self.stop_all(to_stop, &mut stats).await;

        for followup in followups {
            match followup {
                Followup::Restart(account) => {
                    self.start(&account, now);
                    stats.restarted += 1;
                }
                Followup::MarkError(id) => match self.mark_error(id).await {
                    Ok(()) => {
                        stats.marked_error += 1;
                        error!(account_id = id, "Restart limit reached, account marked error");
                    }
                    Err(e) => {
                        stats.errors += 1;
                        warn!(account_id = id, error = %e, "Failed to mark account error");
                    }
                },
            }
        }

        stats.running = self.workers.len();
        Ok(stats)
    }

    /// Decide what one eligible account needs. Starts, relaunches and login
    /// escalations happen here; restarts and restart-limit escalations are
    /// returned so the caller can stop the old workers concurrently.
    async fn reconcile_account(
        &mut self,
        account: &Account,
        now: DateTime<Utc>,
        stats: &mut ReconcileStats,
    ) -> Result<Option<Followup>, StoreError> {
        let id = account.id;
        let Some(handle) = self.workers.get(&id) else {
            self.start(account, now);
            stats.started += 1;
            return Ok(None);
        };
        let started_at = handle.started_at();
        let alive = handle.is_alive();

        if !alive {
            let exit = match self.workers.remove(&id) {
                Some(handle) => handle.join().await,
                None => return Ok(None),
            };
            match exit {
                WorkerExit::SessionUnavailable(reason) => {
                    warn!(account_id = id, reason = %reason, "Worker could not acquire a session, relaunching");
                    self.start(account, now);
                    stats.relaunched += 1;
                    return Ok(None);
                }
                WorkerExit::Ineligible | WorkerExit::Stopped => {
                    info!(account_id = id, exit = %exit, "Worker exited but account is eligible, relaunching");
                    self.start(account, now);
                    stats.relaunched += 1;
                    return Ok(None);
                }
                WorkerExit::AuthRequired => {
                    self.mark_error(id).await?;
                    stats.marked_error += 1;
                    warn!(account_id = id, "Account requires login, marked error");
                    return Ok(None);
                }
                WorkerExit::Failed(reason) => {
                    warn!(account_id = id, reason = %reason, "Worker failed");
                }
            }
        }

        let observation = Observation {
            status: account.status,
            process_alive: alive,
            last_heartbeat_at: account.last_heartbeat_at,
            started_at,
            now,
        };
        let decision = match self.policy.evaluate(&observation) {
            Decision::Restart(reason) => self.ledger.escalate(id, reason, now),
            other => other,
        };

        match decision {
            Decision::None => {
                self.ledger.note_healthy(id, now);
                Ok(None)
            }
            Decision::Restart(reason) => {
                warn!(
                    account_id = id,
                    reason = %reason,
                    recent_restarts = self.ledger.recent(id),
                    "Restarting worker"
                );
                Ok(Some(Followup::Restart(account.clone())))
            }
            Decision::MarkError => Ok(Some(Followup::MarkError(id))),
        }
    }

    fn start(&mut self, account: &Account, now: DateTime<Utc>) {
        let handle = self.launcher.launch(account.clone(), now);
        self.workers.insert(account.id, handle);
        info!(account_id = account.id, "Worker started");
    }

    async fn mark_error(&mut self, account_id: AccountId) -> Result<(), StoreError> {
        self.accounts
            .update_account_status(account_id, AccountStatus::Error)
            .await?;
        self.ledger.forget(account_id);
        Ok(())
    }

    /// Stop workers concurrently. Returns the ids that were stopped.
    async fn stop_all(
        &self,
        handles: Vec<WorkerHandle>,
        stats: &mut ReconcileStats,
    ) -> Vec<AccountId> {
        let grace = self.stop_grace;
        let stops = handles.into_iter().map(|handle| async move {
            let id = handle.account_id();
            (id, handle.stop(grace).await)
        });

        let mut stopped = Vec::new();
        for (id, outcome) in join_all(stops).await {
            match outcome {
                StopOutcome::Graceful(exit) => {
                    info!(account_id = id, exit = %exit, "Worker stopped");
                }
                StopOutcome::Forced => {
                    warn!(account_id = id, "Worker ignored stop, aborted after grace period");
                    stats.forced_stops += 1;
                }
            }
            stats.stopped += 1;
            stopped.push(id);
        }
        stopped
    }

    /// Per-account health as seen from inside the supervisor.
    pub async fn health_report(&self) -> Result<HealthReport, StoreError> {
        let accounts = self.accounts.list_accounts().await?;
        Ok(HealthReport::new(&accounts, Utc::now(), |a| {
            self.worker_alive(a.id)
        }))
    }

    /// Stop every worker concurrently within the grace period.
    pub async fn shutdown(&mut self) {
        let handles: Vec<WorkerHandle> = self.workers.drain().map(|(_, h)| h).collect();
        if handles.is_empty() {
            return;
        }
        info!(workers = handles.len(), "Stopping all workers");
        let mut stats = ReconcileStats::default();
        self.stop_all(handles, &mut stats).await;
        info!(
            stopped = stats.stopped,
            forced = stats.forced_stops,
            "All workers stopped"
        );
    }
}
