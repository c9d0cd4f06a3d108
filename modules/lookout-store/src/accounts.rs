use chrono::{DateTime, Utc};

use lookout_common::{Account, AccountId, AccountStatus};

use crate::error::{Result, StoreError};
use crate::rows::{AccountRow, ACCOUNT_COLUMNS};
use crate::PgStore;

impl PgStore {
    /// Every configured account, eligible or not.
    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM monitor_accounts ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Account::try_from).collect()
    }

    /// Accounts that should have a running worker right now.
    pub async fn list_eligible_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM monitor_accounts
             WHERE monitor_enabled AND status = 'active'
             ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Account::try_from).collect()
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM monitor_accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Account::try_from).transpose()
    }

    pub async fn update_account_status(&self, id: AccountId, status: AccountStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE monitor_accounts SET status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AccountNotFound(id));
        }
        Ok(())
    }

    /// Liveness write. Touches only `last_heartbeat_at`.
    pub async fn record_heartbeat(&self, id: AccountId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE monitor_accounts SET last_heartbeat_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AccountNotFound(id));
        }
        Ok(())
    }

    /// Persist the account's own profile hash once discovered.
    pub async fn set_hash_id(&self, id: AccountId, hash_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE monitor_accounts SET hash_id = $2 WHERE id = $1")
            .bind(id)
            .bind(hash_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AccountNotFound(id));
        }
        Ok(())
    }
}
