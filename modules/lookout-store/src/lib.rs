//! Postgres persistence for the monitor.
//!
//! Two roles share one pool: the configuration store (accounts, heartbeats,
//! status) and the entity store (connections, conversations). Every account
//! write touches a single column so workers and the supervisor never need a
//! cross-component transaction.

pub mod accounts;
pub mod entities;
pub mod error;
pub mod lock;
mod rows;

pub use error::{Result, StoreError};
pub use lock::SupervisorLock;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool sized for one supervisor plus its workers.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(database_url)
            .await?;
        info!(max_connections, "Connected to database");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations (idempotent).
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// Cheap round trip used as a health check before each reconcile cycle.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
