use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use super::backend::{CaptureNotice, NotifySink};

/// Header carrying the callback token, as existing receivers expect it.
const TOKEN_HEADER: &str = "X-Callback-Token";

/// Posts each batch as `{"notices": [...]}` to a webhook, with an optional
/// callback token header.
pub struct Webhook {
    url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl Webhook {
    pub fn new(http: reqwest::Client, url: String, token: Option<String>) -> Self {
        Self { url, token, http }
    }

    fn request(&self, payload: &serde_json::Value) -> reqwest::RequestBuilder {
        let request = self.http.post(&self.url).json(payload);
        match self.token {
            Some(ref token) => request.header(TOKEN_HEADER, token.as_str()),
            None => request,
        }
    }

    async fn post(&self, payload: &serde_json::Value) -> anyhow::Result<()> {
        let resp = self.request(payload).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Notification webhook returned non-success");
            anyhow::bail!("Notification webhook returned {status}");
        }

        Ok(())
    }
}

#[async_trait]
impl NotifySink for Webhook {
    async fn send(&self, notices: &[CaptureNotice]) -> anyhow::Result<()> {
        self.post(&json!({ "notices": notices })).await
    }
}
