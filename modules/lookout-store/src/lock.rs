use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use tracing::warn;

use crate::error::Result;
use crate::PgStore;

/// Advisory lock key shared by every supervisor process ("lookout" in ASCII).
pub const SUPERVISOR_LOCK_KEY: i64 = 0x6c6f_6f6b_6f75_74;

/// Held for the lifetime of a supervisor. Session-level advisory locks are
/// bound to one connection, so the connection is kept out of the pool.
pub struct SupervisorLock {
    conn: PoolConnection<Postgres>,
}

impl PgStore {
    /// Try to become the only running supervisor. `None` means another
    /// process already holds the lock.
    pub async fn try_lock_supervisor(&self) -> Result<Option<SupervisorLock>> {
        let mut conn = self.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(SUPERVISOR_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await?;

        Ok(acquired.then_some(SupervisorLock { conn }))
    }
}

impl SupervisorLock {
    pub async fn release(mut self) {
        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(SUPERVISOR_LOCK_KEY)
            .fetch_one(&mut *self.conn)
            .await;

        match released {
            Ok(true) => {}
            Ok(false) => warn!("Supervisor lock was not held at release"),
            Err(e) => warn!(error = %e, "Failed to release supervisor lock"),
        }
    }
}
