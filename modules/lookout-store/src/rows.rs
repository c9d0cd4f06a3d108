use chrono::{DateTime, Utc};

use lookout_common::{
    Account, CallbackTarget, ConnectionRecord, ConversationRecord, ProxyConfig,
};

use crate::error::StoreError;

pub(crate) const ACCOUNT_COLUMNS: &str = "id, login, credentials, proxy_host, proxy_port, \
     proxy_username, proxy_password, monitor_enabled, status, last_heartbeat_at, hash_id, \
     callback_url, callback_token";

pub(crate) const CONNECTION_COLUMNS: &str = "account_id, member_id, first_name, last_name, \
     public_id, hash_id, headline, connected_at, source";

pub(crate) const CONVERSATION_COLUMNS: &str = "account_id, conversation_id, hash_id, first_name, \
     last_name, public_id, unread_count, is_group_chat, last_message_text, last_message_sender, \
     last_message_delivered_at, last_activity_at, conversation_url";

#[derive(sqlx::FromRow)]
pub(crate) struct AccountRow {
    id: i64,
    login: String,
    credentials: serde_json::Value,
    proxy_host: Option<String>,
    proxy_port: Option<i32>,
    proxy_username: Option<String>,
    proxy_password: Option<String>,
    monitor_enabled: bool,
    status: String,
    last_heartbeat_at: Option<DateTime<Utc>>,
    hash_id: Option<String>,
    callback_url: Option<String>,
    callback_token: Option<String>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let proxy = match row.proxy_host.filter(|h| !h.trim().is_empty()) {
            Some(host) => {
                let port = row
                    .proxy_port
                    .map(u16::try_from)
                    .transpose()
                    .map_err(|_| {
                        StoreError::Decode(format!("account {}: proxy port out of range", row.id))
                    })?;
                Some(ProxyConfig {
                    host,
                    port,
                    username: row.proxy_username,
                    password: row.proxy_password,
                })
            }
            None => None,
        };

        let callback = row
            .callback_url
            .filter(|u| !u.trim().is_empty())
            .map(|url| CallbackTarget {
                url,
                token: row.callback_token,
            });

        Ok(Account {
            id: row.id,
            login: row.login,
            credentials: row.credentials,
            proxy,
            monitor_enabled: row.monitor_enabled,
            status: row.status.parse()?,
            last_heartbeat_at: row.last_heartbeat_at,
            hash_id: row.hash_id,
            callback,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ConnectionRow {
    account_id: i64,
    member_id: String,
    first_name: Option<String>,
    last_name: Option<String>,
    public_id: Option<String>,
    hash_id: Option<String>,
    headline: Option<String>,
    connected_at: Option<DateTime<Utc>>,
    source: String,
}

impl TryFrom<ConnectionRow> for ConnectionRecord {
    type Error = StoreError;

    fn try_from(row: ConnectionRow) -> Result<Self, Self::Error> {
        Ok(ConnectionRecord {
            account_id: row.account_id,
            member_id: row.member_id,
            first_name: row.first_name,
            last_name: row.last_name,
            public_id: row.public_id,
            hash_id: row.hash_id,
            headline: row.headline,
            connected_at: row.connected_at,
            source: row.source.parse()?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ConversationRow {
    account_id: i64,
    conversation_id: String,
    hash_id: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    public_id: Option<String>,
    unread_count: i32,
    is_group_chat: bool,
    last_message_text: Option<String>,
    last_message_sender: Option<String>,
    last_message_delivered_at: Option<DateTime<Utc>>,
    last_activity_at: Option<DateTime<Utc>>,
    conversation_url: Option<String>,
}

impl From<ConversationRow> for ConversationRecord {
    fn from(row: ConversationRow) -> Self {
        ConversationRecord {
            account_id: row.account_id,
            conversation_id: row.conversation_id,
            hash_id: row.hash_id,
            first_name: row.first_name,
            last_name: row.last_name,
            public_id: row.public_id,
            unread_count: Some(row.unread_count),
            is_group: Some(row.is_group_chat),
            last_message_text: row.last_message_text,
            last_message_sender: row.last_message_sender,
            last_message_delivered_at: row.last_message_delivered_at,
            last_activity_at: row.last_activity_at,
            conversation_url: row.conversation_url,
        }
    }
}
