//! Storage error types.

use thiserror::Error;

/// Object source errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Invalid key or prefix
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Object store error
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Payload could not be decompressed
    #[error("Decompression failed: {0}")]
    Decompression(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Check if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
            || matches!(self, StorageError::ObjectStore(object_store::Error::NotFound { .. }))
    }
}
