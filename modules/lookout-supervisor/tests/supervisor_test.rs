//! Reconcile-loop tests against in-memory collaborators.
//! Workers run for real on short poll intervals; policy time is driven
//! through `reconcile_at`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use lookout_common::{AccountStatus, Settings};
use lookout_supervisor::notify::NotifyRouter;
use lookout_supervisor::supervisor::Supervisor;
use lookout_supervisor::testing::{account, MemoryStore, MockEngine, OpenFailure, RecordingNotifier};
use lookout_supervisor::worker::{WorkerConfig, WorkerDeps, WorkerLauncher};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn fast_worker() -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(20),
        push_buffer: 16,
        nudge_min_gap: Duration::ZERO,
        nudge_hourly_cap: 1000,
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    engine: MockEngine,
    supervisor: Supervisor,
}

fn harness(store: MemoryStore, engine: MockEngine) -> Harness {
    let store = Arc::new(store);
    let notifier = Arc::new(RecordingNotifier::new());
    let launcher = WorkerLauncher::new(
        WorkerDeps {
            accounts: store.clone(),
            entities: store.clone(),
            engine: Arc::new(engine.clone()),
            notify: Arc::new(NotifyRouter::with_fallback(notifier)),
        },
        fast_worker(),
    );
    let supervisor = Supervisor::new(store.clone(), launcher, &Settings::default())
        .with_stop_grace(Duration::from_millis(200));

    Harness {
        store,
        engine,
        supervisor,
    }
}

/// Poll `cond` until it holds or two seconds pass.
async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

// ---------------------------------------------------------------------------
// Start / stop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn starts_one_worker_per_eligible_account() {
    let mut disabled = account(2);
    disabled.monitor_enabled = false;
    let mut inactive = account(3);
    inactive.status = AccountStatus::Inactive;
    let mut h = harness(
        MemoryStore::with_accounts([account(1), disabled, inactive]),
        MockEngine::new(),
    );

    let stats = h.supervisor.reconcile().await.unwrap();

    assert_eq!(stats.eligible, 1);
    assert_eq!(stats.started, 1);
    assert_eq!(h.supervisor.running(), vec![1]);
    let store = h.store.clone();
    assert!(wait_until(|| store.heartbeats(1) > 0).await);
    assert_eq!(h.engine.opened(2), 0);
    assert_eq!(h.engine.opened(3), 0);

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn repeated_reconcile_is_a_noop() {
    let mut h = harness(
        MemoryStore::with_accounts([account(1), account(2)]),
        MockEngine::new(),
    );

    h.supervisor.reconcile().await.unwrap();
    let stats = h.supervisor.reconcile().await.unwrap();

    assert!(stats.is_noop(), "{stats}");
    assert_eq!(stats.running, 2);
    assert_eq!(h.engine.opened(1), 1);
    assert_eq!(h.engine.opened(2), 1);

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn stops_workers_for_accounts_that_become_ineligible() {
    let mut h = harness(MemoryStore::with_accounts([account(1)]), MockEngine::new());
    h.supervisor.reconcile().await.unwrap();
    let engine = h.engine.clone();
    assert!(wait_until(|| engine.subscribed(1)).await);

    h.store.set_enabled(1, false);
    let stats = h.supervisor.reconcile().await.unwrap();

    assert_eq!(stats.stopped, 1);
    assert_eq!(stats.forced_stops, 0);
    assert!(h.supervisor.running().is_empty());
    assert_eq!(h.engine.closed(1), 1);
}

#[tokio::test]
async fn hung_worker_is_aborted_after_grace_period() {
    let engine = MockEngine::new();
    engine.hang_pulls(1, true);
    let mut h = harness(MemoryStore::with_accounts([account(1)]), engine);
    h.supervisor = h.supervisor.with_stop_grace(Duration::from_millis(50));

    h.supervisor.reconcile().await.unwrap();
    let engine = h.engine.clone();
    assert!(wait_until(|| engine.pulls(1) > 0).await);

    h.store.set_enabled(1, false);
    let stats = h.supervisor.reconcile().await.unwrap();

    assert_eq!(stats.stopped, 1);
    assert_eq!(stats.forced_stops, 1);
    assert!(h.supervisor.running().is_empty());
}

#[tokio::test]
async fn shutdown_stops_every_worker() {
    let mut h = harness(
        MemoryStore::with_accounts([account(1), account(2)]),
        MockEngine::new(),
    );
    h.supervisor.reconcile().await.unwrap();
    let engine = h.engine.clone();
    assert!(wait_until(|| engine.subscribed(1) && engine.subscribed(2)).await);

    h.supervisor.shutdown().await;

    assert!(h.supervisor.running().is_empty());
    assert_eq!(h.engine.closed(1), 1);
    assert_eq!(h.engine.closed(2), 1);
}

// ---------------------------------------------------------------------------
// Restart policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_worker_is_restarted() {
    let engine = MockEngine::new();
    engine.fail_pulls(1, true);
    let mut h = harness(MemoryStore::with_accounts([account(1)]), engine);

    h.supervisor.reconcile().await.unwrap();
    assert!(wait_for_exit(&h.supervisor, 1).await);

    let stats = h.supervisor.reconcile().await.unwrap();

    assert_eq!(stats.restarted, 1);
    assert_eq!(h.supervisor.recent_restarts(1), 1);
    let engine = h.engine.clone();
    assert!(wait_until(|| engine.opened(1) == 2).await);
    assert_eq!(h.store.account(1).unwrap().status, AccountStatus::Active);

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn repeated_failures_escalate_to_error() {
    let engine = MockEngine::new();
    engine.fail_pulls(1, true);
    let mut h = harness(MemoryStore::with_accounts([account(1)]), engine);

    h.supervisor.reconcile().await.unwrap();
    let mut restarted = 0;
    let mut marked = 0;
    for _ in 0..3 {
        assert!(wait_for_exit(&h.supervisor, 1).await);
        let stats = h.supervisor.reconcile().await.unwrap();
        restarted += stats.restarted;
        marked += stats.marked_error;
    }

    assert_eq!(restarted, 2);
    assert_eq!(marked, 1);
    assert_eq!(h.store.account(1).unwrap().status, AccountStatus::Error);
    assert!(h.supervisor.running().is_empty());

    // Error is sticky: nothing restarts it.
    let stats = h.supervisor.reconcile().await.unwrap();
    assert_eq!(stats.eligible, 0);
    assert!(stats.is_noop(), "{stats}");
    assert_eq!(h.engine.opened(1), 3);
}

#[tokio::test]
async fn stale_heartbeat_restarts_a_live_worker() {
    let engine = MockEngine::new();
    engine.hang_pulls(1, true);
    let mut h = harness(MemoryStore::with_accounts([account(1)]), engine);
    h.supervisor = h.supervisor.with_stop_grace(Duration::from_millis(50));

    let t0 = Utc::now();
    h.supervisor.reconcile_at(t0).await.unwrap();
    h.store.set_heartbeat(1, Some(t0 + chrono::Duration::seconds(10)));

    // Inside the timeout nothing happens.
    let stats = h
        .supervisor
        .reconcile_at(t0 + chrono::Duration::minutes(4))
        .await
        .unwrap();
    assert!(stats.is_noop(), "{stats}");

    let later = t0 + chrono::Duration::minutes(6);
    let stats = h.supervisor.reconcile_at(later).await.unwrap();

    assert_eq!(stats.restarted, 1);
    assert_eq!(stats.forced_stops, 1);
    assert_eq!(h.supervisor.worker_started_at(1), Some(later));
    let engine = h.engine.clone();
    assert!(wait_until(|| engine.opened(1) == 2).await);

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn missing_first_heartbeat_restarts_after_startup_grace() {
    let engine = MockEngine::new();
    engine.hang_pulls(1, true);
    let mut h = harness(MemoryStore::with_accounts([account(1)]), engine);
    h.supervisor = h.supervisor.with_stop_grace(Duration::from_millis(50));

    let t0 = Utc::now();
    h.supervisor.reconcile_at(t0).await.unwrap();

    let stats = h
        .supervisor
        .reconcile_at(t0 + chrono::Duration::minutes(2))
        .await
        .unwrap();
    assert!(stats.is_noop(), "{stats}");

    let stats = h
        .supervisor
        .reconcile_at(t0 + chrono::Duration::minutes(6))
        .await
        .unwrap();
    assert_eq!(stats.restarted, 1);

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn hung_workers_are_restarted_within_one_grace_period() {
    let engine = MockEngine::new();
    for id in 1..=4 {
        engine.hang_pulls(id, true);
    }
    let mut h = harness(
        MemoryStore::with_accounts([account(1), account(2), account(3), account(4)]),
        engine,
    );
    h.supervisor = h.supervisor.with_stop_grace(Duration::from_millis(300));

    let t0 = Utc::now();
    h.supervisor.reconcile_at(t0).await.unwrap();
    let engine = h.engine.clone();
    assert!(wait_until(|| (1..=4).all(|id| engine.pulls(id) > 0)).await);

    let started = std::time::Instant::now();
    let stats = h
        .supervisor
        .reconcile_at(t0 + chrono::Duration::minutes(6))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(stats.restarted, 4);
    assert_eq!(stats.forced_stops, 4);
    assert!(elapsed < Duration::from_millis(900), "took {elapsed:?}");
    assert_eq!(h.supervisor.running(), vec![1, 2, 3, 4]);

    h.supervisor = h.supervisor.with_stop_grace(Duration::from_millis(50));
    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn login_required_marks_error_without_restart() {
    let engine = MockEngine::new();
    engine.fail_open(1, Some(OpenFailure::AuthRequired));
    let mut h = harness(MemoryStore::with_accounts([account(1)]), engine);

    h.supervisor.reconcile().await.unwrap();
    let store = h.store.clone();
    assert!(wait_until(|| store.account(1).unwrap().status == AccountStatus::Error).await);

    let stats = h.supervisor.reconcile().await.unwrap();
    assert_eq!(stats.eligible, 0);
    assert_eq!(stats.restarted, 0);
    assert!(h.supervisor.running().is_empty());
    assert_eq!(h.engine.opened(1), 1);
}

#[tokio::test]
async fn unavailable_sessions_are_relaunched_without_escalation() {
    let engine = MockEngine::new();
    engine.fail_open(1, Some(OpenFailure::Unavailable));
    let mut h = harness(MemoryStore::with_accounts([account(1)]), engine);

    h.supervisor.reconcile().await.unwrap();
    for _ in 0..4 {
        assert!(wait_for_exit(&h.supervisor, 1).await);
        let stats = h.supervisor.reconcile().await.unwrap();
        assert_eq!(stats.relaunched, 1);
        assert_eq!(stats.restarted, 0);
    }

    assert_eq!(h.supervisor.recent_restarts(1), 0);
    assert_eq!(h.store.account(1).unwrap().status, AccountStatus::Active);
    let engine = h.engine.clone();
    assert!(wait_until(|| engine.opened(1) == 5).await);

    // Once the engine has capacity again the next launch sticks.
    h.engine.fail_open(1, None);
    assert!(wait_for_exit(&h.supervisor, 1).await);
    h.supervisor.reconcile().await.unwrap();
    assert!(wait_until(|| engine.subscribed(1)).await);
    assert!(h.supervisor.worker_alive(1));

    h.supervisor.shutdown().await;
}

async fn wait_for_exit(supervisor: &Supervisor, account_id: i64) -> bool {
    wait_until(|| !supervisor.worker_alive(account_id)).await
}

// ---------------------------------------------------------------------------
// Store outages and reporting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn store_outage_skips_cycle_and_keeps_workers() {
    let engine = MockEngine::new();
    engine.hang_pulls(1, true);
    let mut h = harness(MemoryStore::with_accounts([account(1)]), engine);
    h.supervisor = h.supervisor.with_stop_grace(Duration::from_millis(50));
    h.supervisor.reconcile().await.unwrap();

    h.store.fail_reads(true);
    assert!(h.supervisor.reconcile().await.is_err());
    assert_eq!(h.supervisor.running(), vec![1]);
    assert!(h.supervisor.worker_alive(1));

    h.store.fail_reads(false);
    let stats = h.supervisor.reconcile().await.unwrap();
    assert!(stats.is_noop(), "{stats}");
    assert_eq!(h.engine.opened(1), 1);

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn health_report_shows_running_workers() {
    let mut disabled = account(2);
    disabled.monitor_enabled = false;
    let mut h = harness(
        MemoryStore::with_accounts([account(1), disabled]),
        MockEngine::new(),
    );
    h.supervisor.reconcile().await.unwrap();

    let report = h.supervisor.health_report().await.unwrap();

    assert_eq!(report.accounts.len(), 2);
    assert!(report.accounts[0].running);
    assert!(!report.accounts[1].running);
    assert!(!report.accounts[1].monitor_enabled);
    assert_eq!(report.running_count(), 1);

    h.supervisor.shutdown().await;
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_loop_reconciles_on_trigger_and_stops_on_shutdown() {
    let h = harness(MemoryStore::with_accounts([account(1)]), MockEngine::new());
    let trigger = h.supervisor.trigger();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let task = tokio::spawn(h.supervisor.run(async move {
        let _ = shutdown_rx.await;
    }));

    let engine = h.engine.clone();
    assert!(wait_until(|| engine.subscribed(1)).await);

    h.store.put_account(account(2));
    trigger.reconcile_now();
    assert!(wait_until(|| engine.subscribed(2)).await);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
    assert_eq!(h.engine.closed(1), 1);
    assert_eq!(h.engine.closed(2), 1);
}
