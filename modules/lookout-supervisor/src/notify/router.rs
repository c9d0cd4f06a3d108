use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use lookout_common::{Account, Config};

use super::backend::NotifySink;
use super::noop::NoopSink;
use super::webhook::Webhook;

/// Picks the notification sink for an account: its own callback target if
/// set, else the default webhook, else nothing.
pub struct NotifyRouter {
    http: reqwest::Client,
    fallback: Arc<dyn NotifySink>,
}

impl NotifyRouter {
    /// Build a router from environment configuration
    /// (`NOTIFY_WEBHOOK_URL`, `NOTIFY_WEBHOOK_TOKEN`).
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let fallback: Arc<dyn NotifySink> = match config.notify_webhook_url {
            Some(ref url) => {
                info!("Default notification webhook enabled");
                Arc::new(Webhook::new(
                    http.clone(),
                    url.clone(),
                    config.notify_webhook_token.clone(),
                ))
            }
            None => {
                info!("No NOTIFY_WEBHOOK_URL set, default notifications disabled");
                Arc::new(NoopSink)
            }
        };

        Ok(Self { http, fallback })
    }

    /// Route every account without a callback target to `sink`.
    pub fn with_fallback(sink: Arc<dyn NotifySink>) -> Self {
        Self {
            http: reqwest::Client::new(),
            fallback: sink,
        }
    }

    pub fn sink_for(&self, account: &Account) -> Arc<dyn NotifySink> {
        match account.callback {
            Some(ref target) => Arc::new(Webhook::new(
                self.http.clone(),
                target.url.clone(),
                target.token.clone(),
            )),
            None => self.fallback.clone(),
        }
    }
}

impl Default for NotifyRouter {
    fn default() -> Self {
        Self::with_fallback(Arc::new(NoopSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{account, RecordingNotifier};
    use lookout_common::CallbackTarget;

    #[test]
    fn callback_target_overrides_fallback() {
        let fallback: Arc<dyn NotifySink> = Arc::new(RecordingNotifier::new());
        let router = NotifyRouter::with_fallback(fallback.clone());

        assert!(Arc::ptr_eq(&router.sink_for(&account(1)), &fallback));

        let mut routed = account(2);
        routed.callback = Some(CallbackTarget {
            url: "https://hooks.example.com/lookout".to_string(),
            token: Some("t0ken".to_string()),
        });
        assert!(!Arc::ptr_eq(&router.sink_for(&routed), &fallback));
    }
}
