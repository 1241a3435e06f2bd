//! Pipeline orchestration.
//!
//! One merged extraction stream feeds `parallelism` workers. Each worker
//! pulls records under a shared lock, transforms them, and flushes a bulk
//! load whenever its own batch fills up, plus once more for the remainder
//! when the stream ends.

use futures::future::try_join_all;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::extract::{Extract, RecordStream};
use crate::load::Load;
use crate::merge::Merge;
use crate::stats::{PipelineStats, RunSummary};
use crate::transform::Transform;

pub struct BatchPipeline {
    parallelism: usize,
    batch_size: usize,
    stats: Arc<PipelineStats>,
}

impl BatchPipeline {
    /// Values of 0 are treated as 1.
    pub fn new(parallelism: usize, batch_size: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
            batch_size: batch_size.max(1),
            stats: Arc::new(PipelineStats::new()),
        }
    }

    /// Counters of the current run, updated while it is in flight.
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Run to completion.
    ///
    /// Returns once every worker has drained the extraction stream and
    /// flushed its last batch. Only extraction errors end the run early;
    /// load failures are absorbed by the loader.
    pub async fn run<X, T, L>(&self, extractor: &X, transform: &T, loader: &L) -> Result<RunSummary>
    where
        X: Extract,
        T: Transform<Input = X::Record>,
        L: Load<Item = T::Output>,
    {
        let start = Instant::now();
        loader.prepare().await?;

        let records = extractor
            .extract(Merge::new(self.parallelism), self.stats())
            .await?;
        let shared = Mutex::new(records);

        info!(
            parallelism = self.parallelism,
            batch_size = self.batch_size,
            "Pipeline started"
        );
        let workers = (0..self.parallelism).map(|worker| self.drain(worker, &shared, transform, loader));
        try_join_all(workers).await?;

        let summary = self.stats.summary(start.elapsed());
        info!(
            objects_imported = summary.objects_imported,
            objects_skipped = summary.objects_skipped,
            objects_failed = summary.objects_failed,
            records_loaded = summary.records_loaded,
            records_failed = summary.records_failed,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Pipeline finished"
        );
        Ok(summary)
    }

    async fn drain<R, T, L>(
        &self,
        worker: usize,
        records: &Mutex<RecordStream<R>>,
        transform: &T,
        loader: &L,
    ) -> Result<()>
    where
        R: Send + 'static,
        T: Transform<Input = R>,
        L: Load<Item = T::Output>,
    {
        let mut batch = Vec::new();
        loop {
            let next = records.lock().await.next().await;
            match next {
                Some(Ok(record)) => {
                    for output in transform.transform(record) {
                        batch.push(output);
                        if batch.len() == self.batch_size {
                            let full = std::mem::take(&mut batch);
                            self.flush(worker, loader, full).await;
                        }
                    }
                }
                Some(Err(e)) => {
                    error!(worker, error = %e, "Extraction failed, stopping");
                    return Err(e);
                }
                None => break,
            }
        }

        if !batch.is_empty() {
            self.flush(worker, loader, batch).await;
        }
        debug!(worker, "Pipeline worker finished");
        Ok(())
    }

    async fn flush<L: Load>(&self, worker: usize, loader: &L, batch: Vec<L::Item>) {
        let size = batch.len();
        let outcome = loader.load(batch).await;
        debug!(worker, size, loaded = outcome.loaded, failed = outcome.failed, "Flushed batch");
        self.stats.batch_finished(outcome.loaded, outcome.failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::load::LoadOutcome;
    use async_trait::async_trait;
    use futures::stream;
    use parking_lot::Mutex as SyncMutex;

    /// Extracts a fixed list of numbers, optionally failing at the end.
    struct Numbers {
        items: Vec<u32>,
        fail_after: bool,
    }

    #[async_trait]
    impl Extract for Numbers {
        type Record = u32;

        async fn extract(&self, _merge: Merge, _stats: Arc<PipelineStats>) -> Result<RecordStream<u32>> {
            let mut items: Vec<Result<u32>> = self.items.iter().copied().map(Ok).collect();
            if self.fail_after {
                items.push(Err(Error::Validation("listing broke".into())));
            }
            Ok(stream::iter(items).boxed())
        }
    }

    struct Doubling;

    impl Transform for Doubling {
        type Input = u32;
        type Output = u32;

        fn transform(&self, n: u32) -> Vec<u32> {
            vec![n, n]
        }
    }

    struct Identity;

    impl Transform for Identity {
        type Input = u32;
        type Output = u32;

        fn transform(&self, n: u32) -> Vec<u32> {
            vec![n]
        }
    }

    #[derive(Default)]
    struct Recorder {
        batches: SyncMutex<Vec<Vec<u32>>>,
        prepared: SyncMutex<bool>,
    }

    #[async_trait]
    impl Load for Recorder {
        type Item = u32;

        async fn prepare(&self) -> Result<()> {
            *self.prepared.lock() = true;
            Ok(())
        }

        async fn load(&self, batch: Vec<u32>) -> LoadOutcome {
            let loaded = batch.len();
            self.batches.lock().push(batch);
            LoadOutcome { loaded, failed: 0 }
        }
    }

    #[tokio::test]
    async fn test_sequential_batches() {
        let loader = Recorder::default();
        let extractor = Numbers { items: (1..=7).collect(), fail_after: false };

        let summary = BatchPipeline::new(1, 3).run(&extractor, &Identity, &loader).await.unwrap();

        assert!(*loader.prepared.lock());
        assert_eq!(*loader.batches.lock(), vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
        assert_eq!(summary.records_loaded, 7);
        assert_eq!(summary.batches_loaded, 3);
    }

    #[tokio::test]
    async fn test_one_to_many_transform() {
        let loader = Recorder::default();
        let extractor = Numbers { items: vec![1, 2], fail_after: false };

        BatchPipeline::new(1, 3).run(&extractor, &Doubling, &loader).await.unwrap();
        assert_eq!(*loader.batches.lock(), vec![vec![1, 1, 2], vec![2]]);
    }

    #[tokio::test]
    async fn test_parallel_workers_load_everything() {
        let loader = Recorder::default();
        let extractor = Numbers { items: (0..100).collect(), fail_after: false };

        BatchPipeline::new(4, 10).run(&extractor, &Identity, &loader).await.unwrap();

        let batches = loader.batches.lock();
        assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 10));
        let mut all: Vec<u32> = batches.iter().flatten().copied().collect();
        all.sort();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_empty_input_loads_nothing() {
        let loader = Recorder::default();
        let extractor = Numbers { items: vec![], fail_after: false };

        let summary = BatchPipeline::new(3, 5).run(&extractor, &Identity, &loader).await.unwrap();
        assert!(loader.batches.lock().is_empty());
        assert_eq!(summary.batches_loaded, 0);
    }

    #[tokio::test]
    async fn test_extraction_error_fails_run() {
        let loader = Recorder::default();
        let extractor = Numbers { items: vec![1, 2], fail_after: true };

        let err = BatchPipeline::new(2, 10)
            .run(&extractor, &Identity, &loader)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_huge_batch_size_buffers_only_records() {
        let loader = Recorder::default();
        let extractor = Numbers { items: vec![1, 2, 3], fail_after: false };

        let summary = BatchPipeline::new(1, usize::MAX / 2)
            .run(&extractor, &Identity, &loader)
            .await
            .unwrap();
        assert_eq!(*loader.batches.lock(), vec![vec![1, 2, 3]]);
        assert_eq!(summary.records_loaded, 3);
    }
}
