//! Idempotent upserts for captured entities.
//!
//! Each upsert runs in one transaction: insert-or-skip on the natural key,
//! then lock the existing row, merge in Rust and write back only if the
//! merge changed something. Concurrent captures of the same key serialize
//! on the row lock, so exactly one of them observes `Created`.

use lookout_common::{
    AccountId, ConnectionRecord, ConversationRecord, Merge, UpsertOutcome,
};
use tracing::debug;

use crate::error::Result;
use crate::rows::{ConnectionRow, ConversationRow, CONNECTION_COLUMNS, CONVERSATION_COLUMNS};
use crate::PgStore;

impl PgStore {
    pub async fn upsert_connection(&self, record: &ConnectionRecord) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO realtime_connections
                (account_id, member_id, first_name, last_name, public_id, hash_id,
                 headline, connected_at, source)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (account_id, member_id) DO NOTHING",
        )
        .bind(record.account_id)
        .bind(&record.member_id)
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(&record.public_id)
        .bind(&record.hash_id)
        .bind(&record.headline)
        .bind(record.connected_at)
        .bind(record.source.to_string())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 1 {
            tx.commit().await?;
            return Ok(UpsertOutcome::Created);
        }

        let row = sqlx::query_as::<_, ConnectionRow>(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM realtime_connections
             WHERE account_id = $1 AND member_id = $2
             FOR UPDATE"
        ))
        .bind(record.account_id)
        .bind(&record.member_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut stored = ConnectionRecord::try_from(row)?;
        if !stored.merge_from(record) {
            tx.commit().await?;
            return Ok(UpsertOutcome::Unchanged);
        }

        sqlx::query(
            "UPDATE realtime_connections
             SET first_name = $3, last_name = $4, public_id = $5, hash_id = $6,
                 headline = $7, connected_at = $8, updated_at = now()
             WHERE account_id = $1 AND member_id = $2",
        )
        .bind(stored.account_id)
        .bind(&stored.member_id)
        .bind(&stored.first_name)
        .bind(&stored.last_name)
        .bind(&stored.public_id)
        .bind(&stored.hash_id)
        .bind(&stored.headline)
        .bind(stored.connected_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(account_id = record.account_id, member_id = %record.member_id, "Connection updated");
        Ok(UpsertOutcome::Updated)
    }

    pub async fn upsert_conversation(&self, record: &ConversationRecord) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;
        let inserted = record.as_inserted();

        let result = sqlx::query(
            "INSERT INTO realtime_conversations
                (account_id, conversation_id, hash_id, first_name, last_name, public_id,
                 unread_count, is_group_chat, last_message_text, last_message_sender,
                 last_message_delivered_at, last_activity_at, conversation_url)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (account_id, conversation_id) DO NOTHING",
        )
        .bind(inserted.account_id)
        .bind(&inserted.conversation_id)
        .bind(&inserted.hash_id)
        .bind(&inserted.first_name)
        .bind(&inserted.last_name)
        .bind(&inserted.public_id)
        .bind(inserted.unread_count)
        .bind(inserted.is_group)
        .bind(&inserted.last_message_text)
        .bind(&inserted.last_message_sender)
        .bind(inserted.last_message_delivered_at)
        .bind(inserted.last_activity_at)
        .bind(&inserted.conversation_url)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 1 {
            tx.commit().await?;
            return Ok(UpsertOutcome::Created);
        }

        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM realtime_conversations
             WHERE account_id = $1 AND conversation_id = $2
             FOR UPDATE"
        ))
        .bind(record.account_id)
        .bind(&record.conversation_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut stored = ConversationRecord::from(row);
        if !stored.merge_from(record) {
            tx.commit().await?;
            return Ok(UpsertOutcome::Unchanged);
        }

        sqlx::query(
            "UPDATE realtime_conversations
             SET hash_id = $3, first_name = $4, last_name = $5, public_id = $6,
                 unread_count = $7, is_group_chat = $8, last_message_text = $9,
                 last_message_sender = $10, last_message_delivered_at = $11,
                 last_activity_at = $12, conversation_url = $13, updated_at = now()
             WHERE account_id = $1 AND conversation_id = $2",
        )
        .bind(stored.account_id)
        .bind(&stored.conversation_id)
        .bind(&stored.hash_id)
        .bind(&stored.first_name)
        .bind(&stored.last_name)
        .bind(&stored.public_id)
        .bind(stored.unread_count.unwrap_or(0).max(0))
        .bind(stored.is_group.unwrap_or(false))
        .bind(&stored.last_message_text)
        .bind(&stored.last_message_sender)
        .bind(stored.last_message_delivered_at)
        .bind(stored.last_activity_at)
        .bind(&stored.conversation_url)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(
            account_id = record.account_id,
            conversation_id = %record.conversation_id,
            "Conversation updated"
        );
        Ok(UpsertOutcome::Updated)
    }

    pub async fn get_connection(
        &self,
        account_id: AccountId,
        member_id: &str,
    ) -> Result<Option<ConnectionRecord>> {
        let row = sqlx::query_as::<_, ConnectionRow>(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM realtime_connections
             WHERE account_id = $1 AND member_id = $2"
        ))
        .bind(account_id)
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ConnectionRecord::try_from).transpose()
    }

    pub async fn get_conversation(
        &self,
        account_id: AccountId,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>> {
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM realtime_conversations
             WHERE account_id = $1 AND conversation_id = $2"
        ))
        .bind(account_id)
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ConversationRecord::from))
    }
}
