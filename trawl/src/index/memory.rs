//! In-process search index.
//!
//! Follows the same not-found and already-exists semantics as the
//! Elasticsearch client, auto-creates indices on write like Elasticsearch
//! does, and can be told to fail bulk requests.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use super::{BulkItemResponse, BulkItemResult, BulkOperation, BulkResponse, EsError, SearchIndex};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct IndexState {
    mappings: Option<Value>,
    documents: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
pub struct MemoryIndex {
    indices: RwLock<HashMap<String, IndexState>>,
    bulk_sizes: RwLock<Vec<usize>>,
    failing_bulks: AtomicUsize,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` bulk requests fail with HTTP 503.
    pub fn fail_next_bulks(&self, count: usize) {
        self.failing_bulks.store(count, Ordering::SeqCst);
    }

    /// Number of operations in each bulk request received so far,
    /// including failed ones.
    pub fn bulk_sizes(&self) -> Vec<usize> {
        self.bulk_sizes.read().clone()
    }

    pub fn mappings(&self, index: &str) -> Option<Value> {
        self.indices.read().get(index).and_then(|s| s.mappings.clone())
    }

    /// Documents of an index ordered by id.
    pub fn documents(&self, index: &str) -> Vec<(String, Value)> {
        self.indices
            .read()
            .get(index)
            .map(|s| s.documents.iter().map(|(id, doc)| (id.clone(), doc.clone())).collect())
            .unwrap_or_default()
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.indices.read().get(index).map_or(0, |s| s.documents.len())
    }

    /// Remove a document, returning whether it existed.
    pub fn delete_document(&self, index: &str, id: &str) -> bool {
        self.indices
            .write()
            .get_mut(index)
            .is_some_and(|s| s.documents.remove(id).is_some())
    }

    fn take_bulk_failure(&self) -> bool {
        self.failing_bulks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        Ok(self.indices.read().contains_key(index))
    }

    async fn create_index(&self, index: &str, mappings: &Value) -> Result<()> {
        self.indices
            .write()
            .entry(index.to_string())
            .or_insert_with(|| IndexState {
                mappings: Some(mappings.clone()),
                documents: BTreeMap::new(),
            });
        Ok(())
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>> {
        Ok(self
            .indices
            .read()
            .get(index)
            .and_then(|s| s.documents.get(id).cloned()))
    }

    async fn index_document(&self, index: &str, id: &str, document: &Value) -> Result<()> {
        self.indices
            .write()
            .entry(index.to_string())
            .or_default()
            .documents
            .insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse> {
        self.bulk_sizes.write().push(operations.len());
        if self.take_bulk_failure() {
            return Err(Error::Index {
                status: 503,
                reason: "injected bulk failure".to_string(),
            });
        }

        let mut indices = self.indices.write();
        let mut response = BulkResponse::default();
        for op in operations {
            let id = op.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
            let item = if op.document.is_object() {
                indices
                    .entry(op.index.clone())
                    .or_default()
                    .documents
                    .insert(id.clone(), op.document.clone());
                BulkItemResult {
                    index: op.index.clone(),
                    id: Some(id),
                    status: 201,
                    error: None,
                }
            } else {
                response.errors = true;
                BulkItemResult {
                    index: op.index.clone(),
                    id: Some(id),
                    status: 400,
                    error: Some(EsError {
                        error_type: "mapper_parsing_exception".to_string(),
                        reason: Some("document must be an object".to_string()),
                    }),
                }
            };
            response.items.push(BulkItemResponse {
                index: Some(item),
                create: None,
            });
        }
        Ok(response)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
