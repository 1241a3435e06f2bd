//! CloudTrail import entry point.

use std::sync::Arc;
use trawl_storage::ObjectSource;

use crate::config::ImportConfig;
use crate::error::Result;
use crate::extract::CloudTrailExtractor;
use crate::index::SearchIndex;
use crate::ledger::Ledger;
use crate::load::BulkLoader;
use crate::pipeline::BatchPipeline;
use crate::stats::{PipelineStats, RunSummary};
use crate::transform::CloudTrailTransform;

/// Imports CloudTrail logs from one source into one search store.
///
/// Collaborators are passed in explicitly so tests can substitute an
/// in-memory store and index.
pub struct Importer {
    config: ImportConfig,
    source: Arc<dyn ObjectSource>,
    index: Arc<dyn SearchIndex>,
    pipeline: BatchPipeline,
}

impl Importer {
    pub fn new(config: ImportConfig, source: Arc<dyn ObjectSource>, index: Arc<dyn SearchIndex>) -> Self {
        let pipeline = BatchPipeline::new(config.pipeline.parallelism, config.pipeline.batch_size);
        Self {
            config,
            source,
            index,
            pipeline,
        }
    }

    /// Live counters, for progress reporting.
    pub fn stats(&self) -> Arc<PipelineStats> {
        self.pipeline.stats()
    }

    /// Import every object under the configured prefix not yet in the ledger.
    pub async fn run(&self) -> Result<RunSummary> {
        let indices = &self.config.indices;
        let ledger = Ledger::new(Arc::clone(&self.index), &indices.ledger);
        let extractor =
            CloudTrailExtractor::new(Arc::clone(&self.source), ledger, &self.config.source.prefix);
        let loader = BulkLoader::new(Arc::clone(&self.index), &indices.destination)
            .with_id_field(&indices.document_id_field)
            .with_retry(
                self.config.pipeline.bulk_max_retries,
                self.config.pipeline.bulk_retry_delay(),
            );

        self.pipeline
            .run(&extractor, &CloudTrailTransform, &loader)
            .await
    }
}
