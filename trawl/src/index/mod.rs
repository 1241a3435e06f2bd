//! Search-index collaborator.
//!
//! The importer only needs a handful of index operations: existence checks,
//! index creation, point lookups and writes for the ledger, and bulk writes
//! for the destination. [`SearchIndex`] captures exactly that surface.
//! [`ElasticsearchClient`] speaks the Elasticsearch REST API and
//! [`MemoryIndex`] keeps everything in process for tests.

mod elasticsearch;
mod memory;

pub use elasticsearch::{ElasticsearchClient, DEFAULT_ELASTICSEARCH_PORT};
pub use memory::MemoryIndex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::Result;

/// One `index` action of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOperation {
    pub index: String,
    /// Document id, `None` to let the store assign one
    pub id: Option<String>,
    pub document: Value,
}

impl BulkOperation {
    pub fn new(index: impl Into<String>, id: Option<String>, document: Value) -> Self {
        Self {
            index: index.into(),
            id,
            document,
        }
    }

    /// The action line preceding the document in an NDJSON bulk body.
    pub fn action(&self) -> Value {
        match &self.id {
            Some(id) => json!({ "index": { "_index": self.index, "_id": id } }),
            None => json!({ "index": { "_index": self.index } }),
        }
    }
}

/// Error detail attached to a failed bulk item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsError {
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Bulk response, in the shape Elasticsearch returns it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub took: u64,
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<BulkItemResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<BulkItemResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create: Option<BulkItemResult>,
}

impl BulkItemResponse {
    pub fn result(&self) -> Option<&BulkItemResult> {
        self.index.as_ref().or(self.create.as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemResult {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EsError>,
}

impl BulkResponse {
    /// Items the store rejected.
    pub fn failures(&self) -> impl Iterator<Item = &BulkItemResult> {
        self.items
            .iter()
            .filter_map(BulkItemResponse::result)
            .filter(|item| item.error.is_some() || item.status >= 300)
    }

    pub fn failed_count(&self) -> usize {
        if !self.errors {
            return 0;
        }
        self.failures().count()
    }
}

/// Operations the importer performs against a search store.
///
/// # Thread Safety
///
/// One instance is shared by the ledger, every extraction worker and
/// every loader.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Create an index with the given field mappings.
    ///
    /// Succeeds if the index already exists, including when another process
    /// created it between our existence check and this call.
    async fn create_index(&self, index: &str, mappings: &Value) -> Result<()>;

    /// Point lookup of a document's source.
    ///
    /// A missing index is reported the same way as a missing document.
    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>>;

    /// Create or overwrite the document with the given id.
    async fn index_document(&self, index: &str, id: &str, document: &Value) -> Result<()>;

    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse>;

    fn backend_name(&self) -> &'static str;
}

/// Create `index` with `mappings` unless it exists already.
pub async fn ensure_index(store: &dyn SearchIndex, index: &str, mappings: &Value) -> Result<()> {
    if store.index_exists(index).await? {
        debug!("Index '{}' exists", index);
        return Ok(());
    }
    info!("Creating index '{}' on {}", index, store.backend_name());
    store.create_index(index, mappings).await
}

/// Mappings of the ledger index.
pub fn ledger_mappings() -> Value {
    json!({
        "properties": {
            "timestamp": { "type": "date" }
        }
    })
}

/// Mappings of the CloudTrail destination index.
pub fn destination_mappings() -> Value {
    json!({
        "properties": {
            "eventTime": { "type": "date", "format": "date_time_no_millis" }
        }
    })
}
