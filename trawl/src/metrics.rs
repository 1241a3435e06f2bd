//! Import observability metrics
//!
//! Counters and histograms for the extraction and load stages:
//! - Source objects by outcome (skipped/imported/failed)
//! - Records extracted, loaded and rejected
//! - Bulk request status, retries and duration
//! - Ledger write failures
//!
//! Nothing is exported unless the embedding process installs a recorder.

use std::time::Duration;

/// Record a source object that was already in the ledger
pub fn record_object_skipped() {
    metrics::counter!("trawl_objects_total", "outcome" => "skipped").increment(1);
}

/// Record a source object whose records were all emitted
pub fn record_object_imported(records: usize) {
    metrics::counter!("trawl_objects_total", "outcome" => "imported").increment(1);
    metrics::counter!("trawl_records_extracted_total").increment(records as u64);
}

/// Record a source object that could not be fetched or decoded
pub fn record_object_failed(reason: &str) {
    metrics::counter!(
        "trawl_objects_total",
        "outcome" => "failed",
        "reason" => reason.to_string(),
    )
    .increment(1);
}

/// Record a ledger write that did not go through
pub fn record_ledger_error() {
    metrics::counter!("trawl_ledger_errors_total").increment(1);
}

/// Record a bulk request that reached the index
pub fn record_batch_loaded(loaded: usize, failed: usize, duration: Duration) {
    metrics::counter!("trawl_batches_total", "status" => "ok").increment(1);
    metrics::counter!("trawl_records_loaded_total").increment(loaded as u64);
    if failed > 0 {
        metrics::counter!("trawl_records_failed_total").increment(failed as u64);
    }
    metrics::histogram!("trawl_bulk_duration_seconds").record(duration.as_secs_f64());
}

/// Record a batch dropped after exhausting retries
pub fn record_batch_dropped(records: usize) {
    metrics::counter!("trawl_batches_total", "status" => "dropped").increment(1);
    metrics::counter!("trawl_records_failed_total").increment(records as u64);
}

/// Record a retried bulk request
pub fn record_bulk_retry() {
    metrics::counter!("trawl_bulk_retries_total").increment(1);
}
