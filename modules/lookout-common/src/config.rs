use anyhow::{Context, Result};
use tracing::info;

/// Secrets and endpoints loaded from environment variables.
/// Policy knobs live in the TOML [`Settings`](crate::Settings) file.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // Session engine (external automation service)
    pub engine_url: String,
    pub engine_token: Option<String>,

    // Default notification webhook (accounts may override with their own callback)
    pub notify_webhook_url: Option<String>,
    pub notify_webhook_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            engine_url: required_env("ENGINE_URL")?,
            engine_token: optional_env("ENGINE_TOKEN"),
            notify_webhook_url: optional_env("NOTIFY_WEBHOOK_URL"),
            notify_webhook_token: optional_env("NOTIFY_WEBHOOK_TOKEN"),
        })
    }

    /// Database-only config, for read-side commands like `health`.
    pub fn store_from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            engine_url: String::new(),
            engine_token: None,
            notify_webhook_url: None,
            notify_webhook_token: None,
        })
    }

    /// Log which settings are present without printing secrets.
    pub fn log_redacted(&self) {
        info!(
            database = %redact_url(&self.database_url),
            engine_url = self.engine_url.as_str(),
            engine_token = presence(&self.engine_token),
            notify_webhook = presence(&self.notify_webhook_url),
            notify_webhook_token = presence(&self.notify_webhook_token),
            "Config loaded"
        );
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} environment variable is required"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn presence(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "set"
    } else {
        "unset"
    }
}

/// Strip credentials from a connection URL: `postgres://user:pw@host/db` -> `postgres://***@host/db`.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***{}", &url[..scheme_end + 3], &url[at..])
        }
        _ => url.to_string(),
    }
}
