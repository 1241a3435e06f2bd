//! Live counters for a single import run.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared by every stage of a run.
///
/// Cheap to read while the run is in flight, which is what the CLI
/// progress spinner does.
#[derive(Debug, Default)]
pub struct PipelineStats {
    objects_listed: AtomicU64,
    objects_skipped: AtomicU64,
    objects_imported: AtomicU64,
    objects_failed: AtomicU64,
    records_extracted: AtomicU64,
    records_loaded: AtomicU64,
    records_failed: AtomicU64,
    batches_loaded: AtomicU64,
    batches_failed: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listed(&self, count: usize) {
        self.objects_listed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn object_skipped(&self) {
        self.objects_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn object_imported(&self) {
        self.objects_imported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn object_failed(&self) {
        self.objects_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_extracted(&self) {
        self.records_extracted.fetch_add(1, Ordering::Relaxed);
    }

    /// Account for one load call.
    ///
    /// A batch counts as failed only when none of its records made it.
    pub fn batch_finished(&self, loaded: usize, failed: usize) {
        self.records_loaded.fetch_add(loaded as u64, Ordering::Relaxed);
        self.records_failed.fetch_add(failed as u64, Ordering::Relaxed);
        if loaded == 0 && failed > 0 {
            self.batches_failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.batches_loaded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn records_extracted(&self) -> u64 {
        self.records_extracted.load(Ordering::Relaxed)
    }

    pub fn records_loaded(&self) -> u64 {
        self.records_loaded.load(Ordering::Relaxed)
    }

    pub fn objects_done(&self) -> u64 {
        self.objects_skipped.load(Ordering::Relaxed)
            + self.objects_imported.load(Ordering::Relaxed)
            + self.objects_failed.load(Ordering::Relaxed)
    }

    /// Snapshot the counters.
    pub fn summary(&self, elapsed: Duration) -> RunSummary {
        RunSummary {
            objects_listed: self.objects_listed.load(Ordering::Relaxed),
            objects_skipped: self.objects_skipped.load(Ordering::Relaxed),
            objects_imported: self.objects_imported.load(Ordering::Relaxed),
            objects_failed: self.objects_failed.load(Ordering::Relaxed),
            records_extracted: self.records_extracted.load(Ordering::Relaxed),
            records_loaded: self.records_loaded.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            batches_loaded: self.batches_loaded.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Final counts of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub objects_listed: u64,
    pub objects_skipped: u64,
    pub objects_imported: u64,
    pub objects_failed: u64,
    pub records_extracted: u64,
    pub records_loaded: u64,
    pub records_failed: u64,
    pub batches_loaded: u64,
    pub batches_failed: u64,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

impl RunSummary {
    /// Whether any per-item failure was absorbed during the run.
    pub fn has_failures(&self) -> bool {
        self.objects_failed > 0 || self.records_failed > 0
    }

    pub fn records_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.records_loaded as f64 / secs
        } else {
            0.0
        }
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Objects:  {} listed, {} imported, {} skipped, {} failed",
            self.objects_listed, self.objects_imported, self.objects_skipped, self.objects_failed
        )?;
        writeln!(
            f,
            "Records:  {} extracted, {} loaded, {} failed",
            self.records_extracted, self.records_loaded, self.records_failed
        )?;
        writeln!(
            f,
            "Batches:  {} loaded, {} failed",
            self.batches_loaded, self.batches_failed
        )?;
        write!(
            f,
            "Elapsed:  {:.2}s ({:.0} records/sec)",
            self.elapsed.as_secs_f64(),
            self.records_per_second()
        )
    }
}
