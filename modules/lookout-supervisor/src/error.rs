use thiserror::Error;

use lookout_store::StoreError;

/// Failures of the session engine. Local to one worker; recovered by the
/// supervisor restarting it.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No session could be acquired (engine down, resource exhaustion).
    #[error("Session unavailable: {0}")]
    Unavailable(String),

    /// The session opened but the account is not logged in.
    #[error("Account is not logged in")]
    AuthRequired,

    /// An open session failed.
    #[error("Session failed: {0}")]
    Session(String),
}

/// A raw item the normalizer cannot turn into an entity. Dropped, never fatal.
#[derive(Debug, Error)]
#[error("Malformed capture: {reason}")]
pub struct MalformedCapture {
    pub reason: String,
}

impl MalformedCapture {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Malformed(#[from] MalformedCapture),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a worker run ended early.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

