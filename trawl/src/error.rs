use thiserror::Error;
use trawl_storage::StorageError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Search index returned {status}: {reason}")]
    Index { status: u16, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid log at '{key}': {reason}")]
    Decode { key: String, reason: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this is a "not found" response or storage error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Storage(e) => e.is_not_found(),
            Error::Index { status, .. } => *status == 404,
            _ => false,
        }
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Transport failures, throttling and server-side errors qualify;
    /// rejected requests do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Index { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
