//! Batching load stage.
//!
//! Loads never fail the run. A bulk request that keeps failing after its
//! retries is dropped with an `error!` log and the `trawl_batches_total`
//! counter tagged `dropped`; its records are lost for this run.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::index::{destination_mappings, ensure_index, BulkOperation, BulkResponse, SearchIndex};
use crate::metrics;
use crate::transform::Document;

/// What happened to the records of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub loaded: usize,
    pub failed: usize,
}

/// Destination of transformed records.
#[async_trait]
pub trait Load: Send + Sync {
    type Item: Send + 'static;

    /// Called once before any batch; an error here aborts the run.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Write one non-empty batch.
    async fn load(&self, batch: Vec<Self::Item>) -> LoadOutcome;
}

/// Writes documents to a search index with `_bulk` requests.
pub struct BulkLoader {
    index: Arc<dyn SearchIndex>,
    destination: String,
    id_field: Option<String>,
    max_retries: usize,
    retry_delay: Duration,
}

impl BulkLoader {
    pub fn new(index: Arc<dyn SearchIndex>, destination: impl Into<String>) -> Self {
        Self {
            index,
            destination: destination.into(),
            id_field: None,
            max_retries: 0,
            retry_delay: Duration::ZERO,
        }
    }

    /// Use the string value of `field` as document id when a record has one.
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.id_field = (!field.is_empty()).then_some(field);
        self
    }

    /// Retry retryable bulk failures up to `max_retries` times, waiting
    /// `delay` times the attempt number in between.
    pub fn with_retry(mut self, max_retries: usize, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self
    }

    fn operation(&self, document: Document) -> BulkOperation {
        let id = self
            .id_field
            .as_ref()
            .and_then(|field| document.get(field))
            .and_then(Value::as_str)
            .map(str::to_string);
        BulkOperation::new(&self.destination, id, Value::Object(document))
    }

    async fn send(&self, operations: &[BulkOperation]) -> Result<BulkResponse> {
        let mut attempt = 0;
        loop {
            match self.index.bulk(operations).await {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Bulk request failed, retrying"
                    );
                    metrics::record_bulk_retry();
                    tokio::time::sleep(self.retry_delay * attempt as u32).await;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl Load for BulkLoader {
    type Item = Document;

    async fn prepare(&self) -> Result<()> {
        ensure_index(self.index.as_ref(), &self.destination, &destination_mappings()).await
    }

    async fn load(&self, batch: Vec<Document>) -> LoadOutcome {
        let total = batch.len();
        let operations: Vec<_> = batch.into_iter().map(|doc| self.operation(doc)).collect();

        let start = Instant::now();
        match self.send(&operations).await {
            Ok(response) => {
                let failed = response.failed_count();
                if failed > 0 {
                    for item in response.failures().take(3) {
                        warn!(
                            index = %item.index,
                            id = ?item.id,
                            status = item.status,
                            error = ?item.error,
                            "Document rejected"
                        );
                    }
                    warn!(failed, total, "Bulk request had rejected documents");
                }
                let loaded = total.saturating_sub(failed);
                debug!(loaded, index = %self.destination, "Loaded batch");
                metrics::record_batch_loaded(loaded, failed, start.elapsed());
                LoadOutcome { loaded, failed }
            }
            Err(e) => {
                error!(
                    error = %e,
                    records = total,
                    index = %self.destination,
                    "Couldn't load batch, dropping it"
                );
                metrics::record_batch_dropped(total);
                LoadOutcome {
                    loaded: 0,
                    failed: total,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_prepare_creates_destination() {
        let index = Arc::new(MemoryIndex::new());
        let loader = BulkLoader::new(index.clone(), "cloudtrail");
        loader.prepare().await.unwrap();
        assert_eq!(index.mappings("cloudtrail"), Some(destination_mappings()));
    }

    #[tokio::test]
    async fn test_ids_from_field() {
        let index = Arc::new(MemoryIndex::new());
        let loader = BulkLoader::new(index.clone(), "cloudtrail").with_id_field("eventID");

        let outcome = loader
            .load(vec![
                doc(json!({"eventID": "ev-1", "n": 1})),
                doc(json!({"eventID": 7, "n": 2})),
                doc(json!({"n": 3})),
            ])
            .await;
        assert_eq!(outcome, LoadOutcome { loaded: 3, failed: 0 });
        assert_eq!(index.document_count("cloudtrail"), 3);
        assert_eq!(
            index.get_document("cloudtrail", "ev-1").await.unwrap().unwrap()["n"],
            1
        );

        // Same id again overwrites instead of duplicating
        loader.load(vec![doc(json!({"eventID": "ev-1", "n": 9}))]).await;
        assert_eq!(index.document_count("cloudtrail"), 3);
    }

    #[test]
    fn test_empty_id_field_disables_ids() {
        let loader = BulkLoader::new(Arc::new(MemoryIndex::new()), "cloudtrail").with_id_field("");
        let op = loader.operation(doc(json!({"eventID": "x"})));
        assert!(op.id.is_none());
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let index = Arc::new(MemoryIndex::new());
        index.fail_next_bulks(2);
        let loader = BulkLoader::new(index.clone(), "cloudtrail").with_retry(3, Duration::from_millis(1));

        let outcome = loader.load(vec![doc(json!({"n": 1})), doc(json!({"n": 2}))]).await;
        assert_eq!(outcome, LoadOutcome { loaded: 2, failed: 0 });
        assert_eq!(index.bulk_sizes(), vec![2, 2, 2]);
    }

    #[tokio::test]
    async fn test_drops_batch_after_retries() {
        let index = Arc::new(MemoryIndex::new());
        index.fail_next_bulks(10);
        let loader = BulkLoader::new(index.clone(), "cloudtrail").with_retry(2, Duration::from_millis(1));

        let outcome = loader.load(vec![doc(json!({"n": 1}))]).await;
        assert_eq!(outcome, LoadOutcome { loaded: 0, failed: 1 });
        assert_eq!(index.bulk_sizes().len(), 3);
        assert_eq!(index.document_count("cloudtrail"), 0);

        // The next batch goes through once the store recovers
        index.fail_next_bulks(0);
        let outcome = loader.load(vec![doc(json!({"n": 2}))]).await;
        assert_eq!(outcome.loaded, 1);
    }
}
