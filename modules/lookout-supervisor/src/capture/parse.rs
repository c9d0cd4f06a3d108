//! Shape-based parsing of raw engine items into entity records.
//!
//! Connection items carry `connectedMemberResolutionResult` (the resolved
//! profile) or `connectedMember`. Conversation items carry
//! `conversationParticipants` or a `urn:li:msg_conversation:` entity urn.

use serde_json::Value;

use lookout_common::{
    AccountId, ConnectionRecord, ConnectionSource, ConversationRecord, EntityKind,
};

use super::time::parse_timestamp;
use crate::error::MalformedCapture;

const PROFILE_URN: &str = "urn:li:fsd_profile:";
const MEMBER_URN: &str = "urn:li:member:";
const CONVERSATION_URN: &str = "urn:li:msg_conversation:";

/// Sender label for messages written by the monitored account itself.
pub const SELF_SENDER: &str = "You";
const UNKNOWN_SENDER: &str = "Unknown";

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Connection(ConnectionRecord),
    Conversation(ConversationRecord),
}

pub fn classify(item: &Value) -> Option<EntityKind> {
    if !item.is_object() {
        return None;
    }
    if item.get("connectedMemberResolutionResult").is_some() || item.get("connectedMember").is_some()
    {
        return Some(EntityKind::Connection);
    }
    let conversation_urn = str_field(item, "entityUrn")
        .is_some_and(|urn| urn.starts_with(CONVERSATION_URN));
    if item.get("conversationParticipants").is_some() || conversation_urn {
        return Some(EntityKind::Conversation);
    }
    None
}

/// Parse a raw item for `account_id`. `self_hash` is the account's own
/// profile hash, used to tell the counterpart from the account.
pub fn parse_item(
    account_id: AccountId,
    self_hash: Option<&str>,
    item: &Value,
) -> Result<Entity, MalformedCapture> {
    match classify(item) {
        Some(EntityKind::Connection) => parse_connection(account_id, item).map(Entity::Connection),
        Some(EntityKind::Conversation) => {
            parse_conversation(account_id, self_hash, item).map(Entity::Conversation)
        }
        None => Err(MalformedCapture::new("item matches no known shape")),
    }
}

pub fn parse_connection(
    account_id: AccountId,
    item: &Value,
) -> Result<ConnectionRecord, MalformedCapture> {
    let profile = item
        .get("connectedMemberResolutionResult")
        .filter(|p| p.is_object());
    let profile_urn = profile.and_then(|p| str_field(p, "entityUrn"));

    let member_id = str_field(item, "objectUrn")
        .and_then(|urn| urn.strip_prefix(MEMBER_URN))
        .or_else(|| str_field(item, "connectedMember").and_then(urn_tail))
        .or_else(|| profile_urn.and_then(urn_tail))
        .filter(|id| !id.is_empty())
        .ok_or_else(|| MalformedCapture::new("connection without member identifier"))?;

    let source = match str_field(item, "source") {
        Some("discovered") => ConnectionSource::Discovered,
        _ => ConnectionSource::Original,
    };

    Ok(ConnectionRecord {
        first_name: profile.and_then(|p| text_field(p, "firstName")),
        last_name: profile.and_then(|p| text_field(p, "lastName")),
        public_id: profile.and_then(|p| text_field(p, "publicIdentifier")),
        hash_id: profile_urn.and_then(urn_tail).map(String::from),
        headline: profile.and_then(|p| text_field(p, "headline")),
        connected_at: item.get("createdAt").and_then(parse_timestamp),
        source,
        ..ConnectionRecord::new(account_id, member_id)
    })
}

pub fn parse_conversation(
    account_id: AccountId,
    self_hash: Option<&str>,
    item: &Value,
) -> Result<ConversationRecord, MalformedCapture> {
    let conversation_id = str_field(item, "entityUrn")
        .and_then(thread_id)
        .or_else(|| str_field(item, "backendUrn").and_then(urn_tail))
        .ok_or_else(|| MalformedCapture::new("conversation without thread identifier"))?;

    let participants = item
        .get("conversationParticipants")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let counterpart = participants
        .iter()
        .find(|p| participant_hash(p).is_some_and(|hash| Some(hash) != self_hash));
    let member = counterpart.and_then(member_info);

    let last_message = item.pointer("/messages/elements/0").filter(|m| m.is_object());

    Ok(ConversationRecord {
        hash_id: counterpart.and_then(participant_hash).map(String::from),
        first_name: member.and_then(|m| text_field(m, "firstName")),
        last_name: member.and_then(|m| text_field(m, "lastName")),
        public_id: counterpart.and_then(participant_public_id),
        unread_count: item
            .get("unreadCount")
            .and_then(Value::as_i64)
            .map(|n| n.clamp(0, i64::from(i32::MAX)) as i32),
        is_group: item.get("groupChat").and_then(Value::as_bool),
        last_message_text: last_message
            .and_then(|m| m.pointer("/body/text"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from),
        last_message_sender: last_message.map(|m| message_sender(m, self_hash)),
        last_message_delivered_at: last_message
            .and_then(|m| m.get("deliveredAt"))
            .and_then(parse_timestamp),
        last_activity_at: item.get("lastActivityAt").and_then(parse_timestamp),
        conversation_url: str_field(item, "conversationUrl").map(String::from),
        ..ConversationRecord::new(account_id, conversation_id)
    })
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Text comes either as a plain string or as `{ "text": "..." }`.
fn text_field(value: &Value, key: &str) -> Option<String> {
    let text = match value.get(key)? {
        Value::String(s) => s.as_str(),
        Value::Object(obj) => obj.get("text")?.as_str()?,
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn urn_tail(urn: &str) -> Option<&str> {
    urn.rsplit(':').next().filter(|s| !s.is_empty())
}

/// `urn:li:msg_conversation:(urn:li:fsd_profile:ACoAA...,2-ZjM...)` -> `2-ZjM...`
fn thread_id(urn: &str) -> Option<&str> {
    let inner = urn
        .strip_prefix(CONVERSATION_URN)?
        .trim_start_matches('(')
        .trim_end_matches(')');
    let thread = inner.rsplit(',').next()?.trim();
    (!thread.is_empty()).then_some(thread)
}

/// Profile hash embedded anywhere in a (possibly nested) urn.
fn profile_hash(urn: &str) -> Option<&str> {
    let (_, tail) = urn.rsplit_once(PROFILE_URN)?;
    let end = tail.find(|c: char| c == ',' || c == ')').unwrap_or(tail.len());
    let hash = &tail[..end];
    (!hash.is_empty()).then_some(hash)
}

fn participant_hash(participant: &Value) -> Option<&str> {
    str_field(participant, "hostIdentityUrn").and_then(profile_hash)
}

fn member_info(participant: &Value) -> Option<&Value> {
    participant
        .get("participantType")?
        .get("member")
        .filter(|m| m.is_object())
}

fn participant_public_id(participant: &Value) -> Option<String> {
    if let Some(id) = str_field(participant, "publicIdentifier") {
        return Some(id.to_string());
    }
    let url = str_field(member_info(participant)?, "profileUrl")?;
    let (_, rest) = url.split_once("/in/")?;
    let id = rest.split(['/', '?']).next()?;
    (!id.is_empty()).then(|| id.to_string())
}

fn message_sender(message: &Value, self_hash: Option<&str>) -> String {
    let actor = message
        .get("actor")
        .filter(|a| a.as_object().is_some_and(|o| !o.is_empty()))
        .or_else(|| message.get("sender"));

    let Some(actor) = actor else {
        return SELF_SENDER.to_string();
    };
    match participant_hash(actor) {
        Some(hash) if Some(hash) != self_hash => {
            let name = member_info(actor)
                .map(|m| {
                    [text_field(m, "firstName"), text_field(m, "lastName")]
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default();
            if name.is_empty() {
                UNKNOWN_SENDER.to_string()
            } else {
                name
            }
        }
        _ => SELF_SENDER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SELF: &str = "ACoAASELF";

    fn participant(hash: &str, first: &str, last: &str) -> Value {
        json!({
            "hostIdentityUrn": format!("urn:li:msg_messagingParticipant:urn:li:fsd_profile:{hash}"),
            "participantType": {
                "member": {
                    "firstName": {"text": first},
                    "lastName": {"text": last},
                    "profileUrl": format!("https://www.linkedin.com/in/{}-{}/?trk=x", first.to_lowercase(), last.to_lowercase())
                }
            }
        })
    }

    fn conversation_item(actor_hash: &str) -> Value {
        json!({
            "entityUrn": format!("urn:li:msg_conversation:(urn:li:fsd_profile:{SELF},2-ZjMyNGU=)"),
            "conversationParticipants": [
                participant(SELF, "Me", "Myself"),
                participant("ACoAAADA", "Ada", "Lovelace")
            ],
            "unreadCount": 2,
            "groupChat": false,
            "lastActivityAt": 1758695400000i64,
            "conversationUrl": "https://www.linkedin.com/messaging/thread/2-ZjMyNGU=/",
            "messages": {
                "elements": [{
                    "body": {"text": "See you Monday"},
                    "deliveredAt": 1758695400000i64,
                    "actor": participant(actor_hash, "Ada", "Lovelace")
                }]
            }
        })
    }

    #[test]
    fn connection_uses_member_urn_as_key() {
        let item = json!({
            "objectUrn": "urn:li:member:123456",
            "createdAt": 1758695400000i64,
            "connectedMemberResolutionResult": {
                "entityUrn": "urn:li:fsd_profile:ACoAAGRACE",
                "firstName": "Grace",
                "lastName": "Hopper",
                "headline": "Rear Admiral",
                "publicIdentifier": "grace-hopper"
            }
        });

        let record = parse_connection(7, &item).unwrap();

        assert_eq!(record.member_id, "123456");
        assert_eq!(record.hash_id.as_deref(), Some("ACoAAGRACE"));
        assert_eq!(record.first_name.as_deref(), Some("Grace"));
        assert_eq!(record.public_id.as_deref(), Some("grace-hopper"));
        assert!(record.connected_at.is_some());
        assert_eq!(record.source, ConnectionSource::Original);
    }

    #[test]
    fn connection_falls_back_to_profile_urn() {
        let item = json!({
            "connectedMemberResolutionResult": {"entityUrn": "urn:li:fsd_profile:ACoAAGRACE"},
            "source": "discovered"
        });

        let record = parse_connection(7, &item).unwrap();
        assert_eq!(record.member_id, "ACoAAGRACE");
        assert_eq!(record.source, ConnectionSource::Discovered);
    }

    #[test]
    fn connection_without_any_identifier_is_malformed() {
        let item = json!({"connectedMemberResolutionResult": {"firstName": "Nobody"}});
        assert!(parse_item(7, None, &item).is_err());
    }

    #[test]
    fn conversation_picks_counterpart_not_self() {
        let record = parse_conversation(7, Some(SELF), &conversation_item("ACoAAADA")).unwrap();

        assert_eq!(record.conversation_id, "2-ZjMyNGU=");
        assert_eq!(record.hash_id.as_deref(), Some("ACoAAADA"));
        assert_eq!(record.counterpart_name().as_deref(), Some("Ada Lovelace"));
        assert_eq!(record.public_id.as_deref(), Some("ada-lovelace"));
        assert_eq!(record.unread_count, Some(2));
        assert_eq!(record.is_group, Some(false));
        assert_eq!(record.last_message_text.as_deref(), Some("See you Monday"));
        assert_eq!(record.last_message_sender.as_deref(), Some("Ada Lovelace"));
        assert!(record.last_activity_at.is_some());
    }

    #[test]
    fn own_messages_are_sent_by_you() {
        let record = parse_conversation(7, Some(SELF), &conversation_item(SELF)).unwrap();
        assert_eq!(record.last_message_sender.as_deref(), Some(SELF_SENDER));
    }

    #[test]
    fn conversation_falls_back_to_backend_urn() {
        let item = json!({
            "conversationParticipants": [],
            "backendUrn": "urn:li:messagingThread:2-abc",
            "unreadCount": -4
        });

        let record = parse_conversation(7, None, &item).unwrap();
        assert_eq!(record.conversation_id, "2-abc");
        assert_eq!(record.unread_count, Some(0));
        assert_eq!(record.last_message_sender, None);
    }

    #[test]
    fn unrecognised_shapes_are_malformed() {
        assert!(parse_item(7, None, &json!({"elements": []})).is_err());
        assert!(parse_item(7, None, &json!("text")).is_err());
        assert!(parse_item(7, None, &json!({"conversationParticipants": []})).is_err());
    }
}
