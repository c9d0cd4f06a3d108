use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct OpenSessionRequest {
    /// Names the persistent browser profile on the engine side.
    pub login: String,
    pub credentials: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxySettings {
    /// `http://host:port`
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub logged_in: bool,
    #[serde(default)]
    pub identity: Option<SessionIdentity>,
}

/// Who the session is logged in as.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionIdentity {
    pub hash_id: String,
    #[serde(default)]
    pub public_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotResponse {
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct EventsResponse {
    #[serde(default)]
    pub events: Vec<EngineEvent>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A network response the engine intercepted on a monitored page.
    Capture { item: serde_json::Value },
    /// An unread badge appeared (`kind` is `my_network` or `messaging`).
    Nudge {
        kind: String,
        #[serde(default)]
        badge_count: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_decode_by_type_tag() {
        let body: EventsResponse = serde_json::from_value(json!({
            "events": [
                {"type": "capture", "item": {"entityUrn": "urn:li:msg_conversation:(x,2-abc)"}},
                {"type": "nudge", "kind": "messaging", "badge_count": 3},
                {"type": "nudge", "kind": "my_network"}
            ]
        }))
        .unwrap();

        assert_eq!(body.events.len(), 3);
        assert!(matches!(body.events[0], EngineEvent::Capture { .. }));
        assert_eq!(
            body.events[1],
            EngineEvent::Nudge {
                kind: "messaging".to_string(),
                badge_count: 3
            }
        );
        assert_eq!(
            body.events[2],
            EngineEvent::Nudge {
                kind: "my_network".to_string(),
                badge_count: 0
            }
        );
    }

    #[test]
    fn session_info_tolerates_missing_identity() {
        let info: SessionInfo =
            serde_json::from_value(json!({"session_id": "s-1", "logged_in": false})).unwrap();
        assert!(!info.logged_in);
        assert!(info.identity.is_none());
    }

    #[test]
    fn proxy_omits_absent_auth() {
        let proxy = ProxySettings {
            server: "http://10.0.0.1:3128".to_string(),
            username: None,
            password: None,
        };
        assert_eq!(
            serde_json::to_value(&proxy).unwrap(),
            json!({"server": "http://10.0.0.1:3128"})
        );
    }
}
