//! Heartbeat / restart policy.
//!
//! `RestartPolicy::evaluate` is a pure decision over one observation of a
//! running worker. `RestartLedger` is the supervisor-owned counter that turns
//! a storm of restarts into `MarkError`.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Duration, Utc};

use lookout_common::file_config::PolicySettings;
use lookout_common::{AccountId, AccountStatus};

/// What the supervisor knows about one account's worker at `now`.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub status: AccountStatus,
    pub process_alive: bool,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    Exited,
    NoFirstHeartbeat,
    HeartbeatStale,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited => write!(f, "worker exited"),
            Self::NoFirstHeartbeat => write!(f, "no heartbeat since start"),
            Self::HeartbeatStale => write!(f, "heartbeat stale"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    None,
    Restart(RestartReason),
    MarkError,
}

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    heartbeat_timeout: Duration,
    startup_grace: Duration,
}

impl RestartPolicy {
    pub fn new(heartbeat_timeout: std::time::Duration, startup_grace: std::time::Duration) -> Self {
        Self {
            heartbeat_timeout: to_chrono(heartbeat_timeout),
            startup_grace: to_chrono(startup_grace),
        }
    }

    pub fn from_settings(settings: &PolicySettings) -> Self {
        Self::new(settings.heartbeat_timeout(), settings.startup_grace())
    }

    pub fn evaluate(&self, obs: &Observation) -> Decision {
        if obs.status == AccountStatus::Error {
            return Decision::None;
        }
        if !obs.process_alive {
            return Decision::Restart(RestartReason::Exited);
        }

        // A heartbeat from before this worker started belongs to a previous run.
        let heartbeat = obs.last_heartbeat_at.filter(|hb| *hb >= obs.started_at);

        match heartbeat {
            None if obs.now - obs.started_at > self.startup_grace => {
                Decision::Restart(RestartReason::NoFirstHeartbeat)
            }
            Some(hb) if obs.now - hb > self.heartbeat_timeout => {
                Decision::Restart(RestartReason::HeartbeatStale)
            }
            _ => Decision::None,
        }
    }
}

/// Recent restarts per account. The `max_restarts`-th restart inside
/// `window` escalates to `MarkError`.
#[derive(Debug)]
pub struct RestartLedger {
    max_restarts: usize,
    window: Duration,
    restarts: HashMap<AccountId, VecDeque<DateTime<Utc>>>,
}

impl RestartLedger {
    pub fn new(max_restarts: u32, window: std::time::Duration) -> Self {
        Self {
            max_restarts: max_restarts.max(1) as usize,
            window: to_chrono(window),
            restarts: HashMap::new(),
        }
    }

    pub fn from_settings(settings: &PolicySettings) -> Self {
        Self::new(settings.max_restarts, settings.restart_window())
    }

    /// Count a restart decision, escalating it if it recurs too often.
    /// The history is kept until `forget`, so a failed status write escalates
    /// again on the next attempt.
    pub fn escalate(
        &mut self,
        account_id: AccountId,
        reason: RestartReason,
        now: DateTime<Utc>,
    ) -> Decision {
        let window = self.window;
        let entries = self.restarts.entry(account_id).or_default();
        prune(entries, now, window);
        entries.push_back(now);

        if entries.len() >= self.max_restarts {
            Decision::MarkError
        } else {
            Decision::Restart(reason)
        }
    }

    /// A healthy observation lets old restarts age out; once the worker has
    /// been healthy for a whole window the counter is empty again.
    pub fn note_healthy(&mut self, account_id: AccountId, now: DateTime<Utc>) {
        let window = self.window;
        if let Some(entries) = self.restarts.get_mut(&account_id) {
            prune(entries, now, window);
            if entries.is_empty() {
                self.restarts.remove(&account_id);
            }
        }
    }

    pub fn forget(&mut self, account_id: AccountId) {
        self.restarts.remove(&account_id);
    }

    pub fn recent(&self, account_id: AccountId) -> usize {
        self.restarts.get(&account_id).map_or(0, VecDeque::len)
    }
}

fn prune(entries: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) {
    while entries.front().is_some_and(|at| now - *at > window) {
        entries.pop_front();
    }
}

fn to_chrono(d: std::time::Duration) -> Duration {
    Duration::from_std(d).unwrap_or_else(|_| Duration::weeks(52 * 100))
}
