pub mod error;
pub mod types;

pub use error::{EngineClientError, Result};
pub use types::{
    EngineEvent, EventsResponse, OpenSessionRequest, ProxySettings, SessionIdentity, SessionInfo,
    SnapshotResponse,
};

use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Extra time allowed on top of a long-poll wait before the request times out.
const LONG_POLL_SLACK: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct EngineClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl EngineClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    /// Launch a browser session for an account. The engine restores the
    /// account's profile and reports whether it is logged in.
    pub async fn open_session(&self, request: &OpenSessionRequest) -> Result<SessionInfo> {
        let resp = self
            .with_token(self.client.post(self.url("/sessions")))
            .json(request)
            .send()
            .await?;

        let info: SessionInfo = decode(resp).await?;
        debug!(
            session_id = %info.session_id,
            logged_in = info.logged_in,
            "Engine session opened"
        );
        Ok(info)
    }

    /// Current page state of both monitored views.
    pub async fn snapshot(&self, session_id: &str) -> Result<Vec<serde_json::Value>> {
        let resp = self
            .with_token(self.client.get(self.url(&format!("/sessions/{session_id}/snapshot"))))
            .send()
            .await?;

        let body: SnapshotResponse = decode(resp).await?;
        Ok(body.items)
    }

    /// Long-poll for push events captured since the previous call. Returns an
    /// empty list when nothing happened within `wait_secs`.
    pub async fn events(&self, session_id: &str, wait_secs: u64) -> Result<Vec<EngineEvent>> {
        let resp = self
            .with_token(self.client.get(self.url(&format!("/sessions/{session_id}/events"))))
            .query(&[("wait_secs", wait_secs)])
            .timeout(Duration::from_secs(wait_secs) + LONG_POLL_SLACK)
            .send()
            .await?;

        let body: EventsResponse = decode(resp).await?;
        Ok(body.events)
    }

    pub async fn close(&self, session_id: &str) -> Result<()> {
        let resp = self
            .with_token(self.client.delete(self.url(&format!("/sessions/{session_id}"))))
            .send()
            .await?;

        let status = resp.status();
        // Closing an already-gone session is not an error.
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }
        let message = resp.text().await.unwrap_or_default();
        Err(EngineClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_token(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => builder.query(&[("token", token)]),
            None => builder,
        }
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(EngineClientError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| EngineClientError::Decode(e.to_string()))
}
