//! Per-account health report ("running?", status, last heartbeat).

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use lookout_common::{Account, AccountId, AccountStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountHealth {
    pub account_id: AccountId,
    pub login: String,
    pub status: AccountStatus,
    pub monitor_enabled: bool,
    pub running: bool,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub accounts: Vec<AccountHealth>,
}

impl HealthReport {
    /// Build a report with liveness supplied by the caller.
    pub fn new(
        accounts: &[Account],
        now: DateTime<Utc>,
        running: impl Fn(&Account) -> bool,
    ) -> Self {
        let accounts = accounts
            .iter()
            .map(|a| AccountHealth {
                account_id: a.id,
                login: a.login.clone(),
                status: a.status,
                monitor_enabled: a.monitor_enabled,
                running: running(a),
                last_heartbeat_at: a.last_heartbeat_at,
            })
            .collect();

        Self {
            generated_at: now,
            accounts,
        }
    }

    /// Outside the supervisor process the only liveness signal is the
    /// heartbeat: an account counts as running if it beat within `timeout`.
    pub fn from_heartbeats(accounts: &[Account], now: DateTime<Utc>, timeout: Duration) -> Self {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero());
        Self::new(accounts, now, |a| {
            a.last_heartbeat_at.is_some_and(|hb| now - hb <= timeout)
        })
    }

    pub fn running_count(&self) -> usize {
        self.accounts.iter().filter(|a| a.running).count()
    }

    pub fn error_count(&self) -> usize {
        self.accounts
            .iter()
            .filter(|a| a.status == AccountStatus::Error)
            .count()
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>6}  {:<32}  {:<8}  {:<7}  {:<7}  last_heartbeat",
            "id", "login", "status", "enabled", "running"
        )?;
        for a in &self.accounts {
            let heartbeat = a
                .last_heartbeat_at
                .map(|hb| hb.format("%Y-%m-%dT%H:%M:%SZ").to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "{:>6}  {:<32}  {:<8}  {:<7}  {:<7}  {}",
                a.account_id,
                a.login,
                a.status.to_string(),
                a.monitor_enabled,
                a.running,
                heartbeat
            )?;
        }
        write!(
            f,
            "{} accounts, {} running, {} in error",
            self.accounts.len(),
            self.running_count(),
            self.error_count()
        )
    }
}
