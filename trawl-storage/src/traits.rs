//! Core source trait definitions.
//!
//! The `ObjectSource` trait is the boundary between the importer and whatever
//! holds the log objects (S3 or an S3-compatible service).

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

use crate::error::Result;

/// One importable unit: a key inside a container (bucket).
///
/// Produced by listing. Carries no payload until fetched with
/// [`ObjectSource::get`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceObject {
    /// Bucket-like namespace
    pub container: String,
    /// Path of the object within the container
    pub key: String,
    /// Size in bytes, if the listing reported it
    pub size: Option<u64>,
}

impl SourceObject {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
            size: None,
        }
    }
}

impl fmt::Display for SourceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects in key order
    pub objects: Vec<SourceObject>,
    /// Token to pass to the next `list_page` call, `None` when exhausted
    pub continuation: Option<String>,
}

impl ListPage {
    /// Whether more pages follow this one.
    pub fn is_truncated(&self) -> bool {
        self.continuation.is_some()
    }
}

/// Read-only access to a container of log objects.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a single source is shared by every
/// extraction worker.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Name of the container this source reads from.
    fn container(&self) -> &str;

    /// List one page of objects whose key starts with `prefix`.
    ///
    /// Pass `None` for the first page and the previous page's
    /// `continuation` afterwards.
    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage>;

    /// Read the full payload of an object.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Get a human-readable name for this source backend.
    fn backend_name(&self) -> &'static str;
}
