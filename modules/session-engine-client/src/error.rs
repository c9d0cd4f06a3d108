use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineClientError>;

#[derive(Debug, Error)]
pub enum EngineClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected response body: {0}")]
    Decode(String),
}

impl EngineClientError {
    /// The engine refused our API token. Says nothing about the account's
    /// own login, which the engine reports in `SessionInfo::logged_in`.
    pub fn is_rejected(&self) -> bool {
        matches!(self, EngineClientError::Api { status: 401 | 403, .. })
    }

    /// The session no longer exists on the engine side.
    pub fn is_gone(&self) -> bool {
        matches!(self, EngineClientError::Api { status: 404 | 410, .. })
    }
}

impl From<reqwest::Error> for EngineClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EngineClientError::Decode(err.to_string())
        } else {
            EngineClientError::Network(err.to_string())
        }
    }
}
