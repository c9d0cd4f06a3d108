//! Session engine backed by the HTTP automation service.

use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use lookout_common::{EntityKind, ProxyConfig};
use session_engine_client::{
    EngineClient, EngineClientError, EngineEvent, OpenSessionRequest, ProxySettings,
};

use crate::error::EngineError;
use crate::traits::{PushEvent, PushSink, RawItem, Session, SessionEngine, SessionSpec};

/// How long one events long-poll waits on the engine side.
const EVENTS_WAIT_SECS: u64 = 25;
/// Pause after a failed long-poll before trying again.
const EVENTS_RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct HttpEngine {
    client: EngineClient,
}

impl HttpEngine {
    pub fn new(client: EngineClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SessionEngine for HttpEngine {
    async fn open_session(&self, spec: &SessionSpec) -> Result<Box<dyn Session>, EngineError> {
        let request = OpenSessionRequest {
            login: spec.login.clone(),
            credentials: spec.credentials.clone(),
            proxy: spec.proxy.as_ref().map(proxy_settings),
        };

        let info = self
            .client
            .open_session(&request)
            .await
            .map_err(open_error)?;

        if !info.logged_in {
            if let Err(e) = self.client.close(&info.session_id).await {
                debug!(error = %e, "Failed to close logged-out session");
            }
            return Err(EngineError::AuthRequired);
        }

        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            session_id: info.session_id,
            identity: info.identity.map(|i| i.hash_id),
            push_task: None,
        }))
    }
}

struct HttpSession {
    client: EngineClient,
    session_id: String,
    identity: Option<String>,
    push_task: Option<JoinHandle<()>>,
}

#[async_trait]
impl Session for HttpSession {
    fn id(&self) -> &str {
        &self.session_id
    }

    async fn identity(&self) -> Result<Option<String>, EngineError> {
        Ok(self.identity.clone())
    }

    async fn subscribe_push(&mut self, sink: PushSink) -> Result<(), EngineError> {
        if let Some(task) = self.push_task.take() {
            task.abort();
        }
        let client = self.client.clone();
        let session_id = self.session_id.clone();
        self.push_task = Some(tokio::spawn(forward_events(client, session_id, sink)));
        Ok(())
    }

    async fn pull(&self) -> Result<Vec<RawItem>, EngineError> {
        let items = self
            .client
            .snapshot(&self.session_id)
            .await
            .map_err(session_error)?;
        Ok(items.into_iter().map(RawItem).collect())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        if let Some(task) = self.push_task.take() {
            task.abort();
        }
        self.client
            .close(&self.session_id)
            .await
            .map_err(session_error)
    }
}

impl Drop for HttpSession {
    fn drop(&mut self) {
        if let Some(task) = self.push_task.take() {
            task.abort();
        }
    }
}

/// Long-poll the engine for push events until the session disappears or the
/// worker stops listening.
async fn forward_events(client: EngineClient, session_id: String, sink: PushSink) {
    loop {
        let events = match client.events(&session_id, EVENTS_WAIT_SECS).await {
            Ok(events) => events,
            Err(e) if e.is_gone() || e.is_rejected() => {
                warn!(session_id = %session_id, error = %e, "Push channel closed by engine");
                return;
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Push long-poll failed, retrying");
                tokio::time::sleep(EVENTS_RETRY_DELAY).await;
                continue;
            }
        };

        for event in events {
            let Some(event) = push_event(event) else {
                continue;
            };
            if !sink.deliver(event) {
                return;
            }
        }
    }
}

fn push_event(event: EngineEvent) -> Option<PushEvent> {
    match event {
        EngineEvent::Capture { item } => Some(PushEvent::Capture(RawItem(item))),
        EngineEvent::Nudge { kind, badge_count } => match kind.parse::<EntityKind>() {
            Ok(kind) => Some(PushEvent::Nudge { kind, badge_count }),
            Err(e) => {
                debug!(error = %e, "Ignoring nudge for unmonitored view");
                None
            }
        },
    }
}

/// Only `logged_in: false` marks an account as needing login. A rejected
/// API token is an engine problem and must not touch account status.
fn open_error(err: EngineClientError) -> EngineError {
    if err.is_rejected() {
        warn!(error = %err, "Engine rejected the API token");
    }
    EngineError::Unavailable(err.to_string())
}

fn session_error(err: EngineClientError) -> EngineError {
    EngineError::Session(err.to_string())
}

fn proxy_settings(proxy: &ProxyConfig) -> ProxySettings {
    let server = match proxy.port {
        Some(port) => format!("http://{}:{port}", proxy.host),
        None => format!("http://{}", proxy.host),
    };
    ProxySettings {
        server,
        username: proxy.username.clone(),
        password: proxy.password.clone(),
    }
}
