use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use lookout_common::AccountId;

use super::{Worker, WorkerExit};

/// Supervisor-owned handle to one running worker.
pub struct WorkerHandle {
    account_id: AccountId,
    started_at: DateTime<Utc>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<WorkerExit>,
}

/// How a stop request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Graceful(WorkerExit),
    /// The worker ignored the grace period and was aborted.
    Forced,
}

impl WorkerHandle {
    pub fn spawn(worker: Worker, started_at: DateTime<Utc>) -> Self {
        let account_id = worker.account().id;
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(worker.run(stop_rx));
        Self {
            account_id,
            started_at,
            stop_tx,
            task,
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Liveness independent of heartbeats: the task has not finished.
    pub fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }

    /// Outcome of a finished worker. Waits if it is still running.
    pub async fn join(self) -> WorkerExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(e) => exit_from_join_error(e),
        }
    }

    /// Ask the worker to stop and wait up to `grace`, then abort it.
    pub async fn stop(mut self, grace: Duration) -> StopOutcome {
        // Fails only when the worker already returned.
        let _ = self.stop_tx.send(true);

        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(exit)) => StopOutcome::Graceful(exit),
            Ok(Err(e)) => StopOutcome::Graceful(exit_from_join_error(e)),
            Err(_) => {
                self.task.abort();
                StopOutcome::Forced
            }
        }
    }
}

fn exit_from_join_error(err: JoinError) -> WorkerExit {
    if err.is_panic() {
        WorkerExit::Failed("worker panicked".to_string())
    } else {
        WorkerExit::Failed("worker cancelled".to_string())
    }
}
