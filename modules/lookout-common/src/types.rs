use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;

pub type AccountId = i64;

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// Lifecycle status of a monitored account.
///
/// `Error` is sticky: only an external actor clears it back to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Inactive,
    Error,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl FromStr for AccountStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "error" => Ok(Self::Error),
            other => Err(ParseEnumError::new("account status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Where downstream notifications for an account are delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackTarget {
    pub url: String,
    pub token: Option<String>,
}

/// One monitored identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Human-facing login (email). Also names the engine's profile directory.
    pub login: String,
    /// Opaque to the monitor; handed to the session engine as-is.
    #[serde(default, skip_serializing)]
    pub credentials: serde_json::Value,
    pub proxy: Option<ProxyConfig>,
    pub monitor_enabled: bool,
    pub status: AccountStatus,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// The account's own profile hash, once known.
    pub hash_id: Option<String>,
    pub callback: Option<CallbackTarget>,
}

impl Account {
    /// A worker may run only for enabled, active accounts.
    pub fn is_eligible(&self) -> bool {
        self.monitor_enabled && self.status == AccountStatus::Active
    }
}

// ---------------------------------------------------------------------------
// Captured entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Connection,
    Conversation,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Conversation => write!(f, "conversation"),
        }
    }
}

impl FromStr for EntityKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connection" | "my_network" => Ok(Self::Connection),
            "conversation" | "messaging" => Ok(Self::Conversation),
            other => Err(ParseEnumError::new("entity kind", other)),
        }
    }
}

/// Which capture channel observed an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Push,
    Pull,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionSource {
    /// Observed by the monitor itself.
    #[default]
    Original,
    /// Found by some other means (search) and recorded by an external actor.
    Discovered,
}

impl fmt::Display for ConnectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Original => write!(f, "original"),
            Self::Discovered => write!(f, "discovered"),
        }
    }
}

impl FromStr for ConnectionSource {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(Self::Original),
            "discovered" => Ok(Self::Discovered),
            other => Err(ParseEnumError::new("connection source", other)),
        }
    }
}

/// A captured contact, unique per `(account_id, member_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub account_id: AccountId,
    pub member_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub public_id: Option<String>,
    pub hash_id: Option<String>,
    pub headline: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub source: ConnectionSource,
}

impl ConnectionRecord {
    pub fn new(account_id: AccountId, member_id: impl Into<String>) -> Self {
        Self {
            account_id,
            member_id: member_id.into(),
            first_name: None,
            last_name: None,
            public_id: None,
            hash_id: None,
            headline: None,
            connected_at: None,
            source: ConnectionSource::Original,
        }
    }
}

/// A captured conversation thread, unique per `(account_id, conversation_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub account_id: AccountId,
    pub conversation_id: String,
    /// Profile hash of the counterpart (single-person threads).
    pub hash_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub public_id: Option<String>,
    pub unread_count: Option<i32>,
    pub is_group: Option<bool>,
    pub last_message_text: Option<String>,
    pub last_message_sender: Option<String>,
    pub last_message_delivered_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub conversation_url: Option<String>,
}

impl ConversationRecord {
    pub fn new(account_id: AccountId, conversation_id: impl Into<String>) -> Self {
        Self {
            account_id,
            conversation_id: conversation_id.into(),
            hash_id: None,
            first_name: None,
            last_name: None,
            public_id: None,
            unread_count: None,
            is_group: None,
            last_message_text: None,
            last_message_sender: None,
            last_message_delivered_at: None,
            last_activity_at: None,
            conversation_url: None,
        }
    }

    /// Display name of the counterpart, if any part is known.
    pub fn counterpart_name(&self) -> Option<String> {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        (!name.is_empty()).then_some(name)
    }
}

/// What an upsert did to the store. Drives the notification decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

impl UpsertOutcome {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}
