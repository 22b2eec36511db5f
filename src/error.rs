use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Library-wide error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Keep-alive timeout: no document read for {} ms", timeout.as_millis())]
    KeepAliveTimeout { timeout: Duration },

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Overwrite transaction rolled back: {0}")]
    Transaction(Box<Error>),

    #[error("Task {0} has already been started")]
    TaskAlreadyStarted(Uuid),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Resource in use: {0}")]
    ResourceInUse(String),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Keep-alive reader stopped: {0}")]
    KeepAliveWorker(String),
}

impl Error {
    /// Whether this is the keep-alive timeout kind rather than a generic stream failure.
    pub fn is_keep_alive_timeout(&self) -> bool {
        matches!(self, Error::KeepAliveTimeout { .. })
    }
}

/// Convenience Result type using our Error
pub type Result<T> = std::result::Result<T, Error>;
