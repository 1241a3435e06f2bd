//! Idempotent extraction stage.
//!
//! Objects are listed page by page and handed to the merge combinator.
//! For each object a worker:
//!
//! 1. skips it if the ledger already has it,
//! 2. fetches, gunzips and validates the payload (any failure skips the
//!    object for this run without touching the ledger),
//! 3. yields its records in file order,
//! 4. writes the ledger entry once the last record was handed off.
//!
//! Only listing failures end the stream with an error.

use async_stream::{stream, try_stream};
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use trawl_storage::{gunzip, ObjectSource, SourceObject, StorageError};

use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::merge::Merge;
use crate::metrics;
use crate::stats::PipelineStats;
use crate::transform::LogRecord;

pub type RecordStream<T> = BoxStream<'static, Result<T>>;

/// Source of the records a pipeline run processes.
#[async_trait]
pub trait Extract: Send + Sync {
    type Record: Send + 'static;

    /// Prepare whatever the stage needs and return its merged record
    /// stream.
    ///
    /// Errors returned here, or yielded by the stream, are fatal to the run.
    async fn extract(&self, merge: Merge, stats: Arc<PipelineStats>) -> Result<RecordStream<Self::Record>>;
}

/// Every object under `prefix`, following continuation tokens until the
/// listing is exhausted.
pub fn list_objects(
    source: Arc<dyn ObjectSource>,
    prefix: String,
    stats: Arc<PipelineStats>,
) -> impl Stream<Item = Result<SourceObject>> + Send + 'static {
    try_stream! {
        let mut continuation: Option<String> = None;
        loop {
            let page = source.list_page(&prefix, continuation.as_deref()).await?;
            debug!(
                prefix = %prefix,
                objects = page.objects.len(),
                truncated = page.is_truncated(),
                "Listed page"
            );
            stats.add_listed(page.objects.len());

            for object in page.objects {
                yield object;
            }

            match page.continuation {
                Some(next) if continuation.as_deref() == Some(next.as_str()) => {
                    Err::<(), _>(Error::Storage(StorageError::Config(format!(
                        "listing of '{}' returned the same continuation token twice",
                        prefix
                    ))))?;
                }
                Some(next) => continuation = Some(next),
                None => break,
            }
        }
    }
}

const RECORDS: &str = "Records";

/// Parse and validate a decompressed CloudTrail log file.
pub fn parse_log(key: &str, json: &[u8]) -> Result<Vec<LogRecord>> {
    let invalid = |reason: String| Error::Decode {
        key: key.to_string(),
        reason,
    };

    if json.is_empty() {
        return Err(invalid("empty payload".to_string()));
    }
    let value: Value = serde_json::from_slice(json).map_err(|e| invalid(e.to_string()))?;
    let Value::Object(mut log) = value else {
        return Err(invalid("top level is not an object".to_string()));
    };
    let Some(Value::Array(entries)) = log.remove(RECORDS) else {
        return Err(invalid(format!("no `{}` array", RECORDS)));
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| match entry {
            Value::Object(record) => match record.get("userIdentity") {
                None | Some(Value::Null) | Some(Value::Object(_)) => Ok(record),
                Some(_) => Err(invalid(format!("record {} has a non-object userIdentity", i))),
            },
            _ => Err(invalid(format!("record {} is not an object", i))),
        })
        .collect()
}

/// Label for the `reason` of a failed object.
fn failure_reason(err: &Error) -> &'static str {
    match err {
        Error::Storage(StorageError::Decompression(_)) => "decompress",
        e if e.is_not_found() => "not_found",
        Error::Storage(_) => "fetch",
        Error::Decode { .. } => "decode",
        _ => "ledger",
    }
}

/// Extracts CloudTrail records from gzip log files.
pub struct CloudTrailExtractor {
    source: Arc<dyn ObjectSource>,
    ledger: Ledger,
    prefix: String,
}

impl CloudTrailExtractor {
    pub fn new(source: Arc<dyn ObjectSource>, ledger: Ledger, prefix: impl Into<String>) -> Self {
        Self {
            source,
            ledger,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl Extract for CloudTrailExtractor {
    type Record = LogRecord;

    async fn extract(&self, merge: Merge, stats: Arc<PipelineStats>) -> Result<RecordStream<LogRecord>> {
        self.ledger.ensure().await?;

        info!(
            container = %self.source.container(),
            prefix = %self.prefix,
            backend = self.source.backend_name(),
            ledger = %self.ledger.name(),
            concurrency = merge.concurrency(),
            "Extracting"
        );

        let worker = Arc::new(ObjectWorker {
            source: Arc::clone(&self.source),
            ledger: self.ledger.clone(),
            stats: Arc::clone(&stats),
        });
        let listed = list_objects(Arc::clone(&self.source), self.prefix.clone(), stats);

        Ok(merge
            .merge(move |object| Arc::clone(&worker).records(object), listed)
            .boxed())
    }
}

/// Per-object state machine, shared by all merge workers.
struct ObjectWorker {
    source: Arc<dyn ObjectSource>,
    ledger: Ledger,
    stats: Arc<PipelineStats>,
}

impl ObjectWorker {
    fn records(self: Arc<Self>, object: SourceObject) -> impl Stream<Item = Result<LogRecord>> + Send + 'static {
        stream! {
            if object.key.is_empty() {
                warn!(container = %object.container, "Listed object has no key, skipping");
                self.stats.object_failed();
                metrics::record_object_failed("malformed_key");
                return;
            }

            match self.ledger.is_completed(&object).await {
                Ok(true) => {
                    debug!(object = %object, "Already imported, skipping");
                    self.stats.object_skipped();
                    metrics::record_object_skipped();
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(object = %object, error = %e, "Ledger lookup failed, skipping for this run");
                    self.stats.object_failed();
                    metrics::record_object_failed(failure_reason(&e));
                    return;
                }
            }

            let records = match self.fetch(&object).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(object = %object, error = %e, "Couldn't read log, skipping for this run");
                    self.stats.object_failed();
                    metrics::record_object_failed(failure_reason(&e));
                    return;
                }
            };

            let count = records.len();
            debug!(object = %object, records = count, "Emitting records");
            for record in records {
                self.stats.record_extracted();
                yield Ok(record);
            }

            match self.ledger.mark_completed(&object).await {
                Ok(entry) => debug!(object = %object, at = %entry.timestamp, "Marked as imported"),
                Err(e) => {
                    warn!(object = %object, error = %e, "Couldn't write ledger entry, object will be imported again next run");
                    metrics::record_ledger_error();
                }
            }
            self.stats.object_imported();
            metrics::record_object_imported(count);
        }
    }

    async fn fetch(&self, object: &SourceObject) -> Result<Vec<LogRecord>> {
        let payload = self.source.get(&object.key).await?;
        if payload.is_empty() {
            return Err(Error::Decode {
                key: object.key.clone(),
                reason: "object is empty".to_string(),
            });
        }
        let json = gunzip(&payload)?;
        parse_log(&object.key, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{MemoryIndex, SearchIndex};
    use crate::ledger::fingerprint;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use trawl_storage::object_store::memory::InMemory;
    use trawl_storage::object_store::path::Path;
    use trawl_storage::object_store::{ObjectStore, PutPayload};
    use trawl_storage::ObjectStoreSource;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    async fn source(objects: &[(&str, Vec<u8>)]) -> Arc<dyn ObjectSource> {
        let store = Arc::new(InMemory::new());
        for (key, data) in objects {
            store.put(&Path::from(*key), PutPayload::from(data.clone())).await.unwrap();
        }
        Arc::new(ObjectStoreSource::from_store("trail-bucket", store).with_page_size(2))
    }

    async fn extract_all(extractor: &CloudTrailExtractor) -> (Vec<LogRecord>, Arc<PipelineStats>) {
        let stats = Arc::new(PipelineStats::new());
        let stream = extractor.extract(Merge::sequential(), stats.clone()).await.unwrap();
        let records: Vec<LogRecord> = stream.map(Result::unwrap).collect().await;
        (records, stats)
    }

    #[test]
    fn test_parse_log() {
        let records = parse_log("k", br#"{"Records":[{"eventID":"1"},{"eventID":"2","userIdentity":null}]}"#).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["eventID"], "1");

        assert!(parse_log("k", br#"{"Records":[]}"#).unwrap().is_empty());
    }

    #[test]
    fn test_parse_log_rejects_malformed() {
        for bad in [
            &b""[..],
            b"not json",
            br#"[1,2]"#,
            br#"{"records":[]}"#,
            br#"{"Records":{}}"#,
            br#"{"Records":[1]}"#,
            br#"{"Records":[{"userIdentity":"root"}]}"#,
        ] {
            let err = parse_log("logs/bad.json.gz", bad).unwrap_err();
            assert!(matches!(err, Error::Decode { ref key, .. } if key == "logs/bad.json.gz"), "{:?}", err);
        }
    }

    #[test]
    fn test_failure_reason() {
        assert_eq!(failure_reason(&StorageError::Decompression("x".into()).into()), "decompress");
        assert_eq!(failure_reason(&StorageError::NotFound("x".into()).into()), "not_found");
        assert_eq!(failure_reason(&StorageError::InvalidKey("x".into()).into()), "fetch");
        assert_eq!(
            failure_reason(&Error::Index { status: 404, reason: "index_not_found_exception".into() }),
            "not_found"
        );
        assert_eq!(
            failure_reason(&Error::Decode { key: "k".into(), reason: "r".into() }),
            "decode"
        );
    }

    #[tokio::test]
    async fn test_list_objects_chains_pages() {
        let objects: Vec<(String, Vec<u8>)> = (0..5).map(|i| (format!("logs/{}", i), vec![])).collect();
        let refs: Vec<(&str, Vec<u8>)> = objects.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        let source = source(&refs).await;
        let stats = Arc::new(PipelineStats::new());

        let keys: Vec<String> = list_objects(source, "logs/".to_string(), stats.clone())
            .map(|obj| obj.unwrap().key)
            .collect()
            .await;
        assert_eq!(keys, vec!["logs/0", "logs/1", "logs/2", "logs/3", "logs/4"]);
        assert_eq!(stats.summary(Default::default()).objects_listed, 5);
    }

    #[tokio::test]
    async fn test_extract_marks_and_skips() {
        let log = gzip(br#"{"Records":[{"eventID":"1"},{"eventID":"2"}]}"#);
        let source = source(&[("logs/a.json.gz", log)]).await;
        let index = Arc::new(MemoryIndex::new());
        let ledger = Ledger::new(index.clone(), "ledger");
        let extractor = CloudTrailExtractor::new(source, ledger, "logs/");

        let (records, stats) = extract_all(&extractor).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["eventID"], "2");
        assert_eq!(stats.summary(Default::default()).objects_imported, 1);
        assert!(index
            .get_document("ledger", &fingerprint("trail-bucket", "logs/a.json.gz"))
            .await
            .unwrap()
            .is_some());

        let (records, stats) = extract_all(&extractor).await;
        assert!(records.is_empty());
        assert_eq!(stats.summary(Default::default()).objects_skipped, 1);
    }

    #[tokio::test]
    async fn test_bad_objects_are_skipped_without_ledger_entry() {
        let source = source(&[
            ("logs/empty", vec![]),
            ("logs/plain", br#"{"Records":[]}"#.to_vec()),
            ("logs/invalid", gzip(b"{\"Records\": 5}")),
            ("logs/good", gzip(br#"{"Records":[{"eventID":"g"}]}"#)),
            ("logs/none", gzip(br#"{"Records":[]}"#)),
        ])
        .await;
        let index = Arc::new(MemoryIndex::new());
        let extractor = CloudTrailExtractor::new(source, Ledger::new(index.clone(), "ledger"), "logs/");

        let (records, stats) = extract_all(&extractor).await;
        assert_eq!(records.len(), 1);

        let summary = stats.summary(Default::default());
        assert_eq!(summary.objects_failed, 3);
        assert_eq!(summary.objects_imported, 2);

        let ledger_keys: Vec<String> = index
            .documents("ledger")
            .into_iter()
            .map(|(_, doc)| doc["key"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ledger_keys.len(), 2);
        assert!(ledger_keys.contains(&"logs/good".to_string()));
        assert!(ledger_keys.contains(&"logs/none".to_string()));
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        struct Unreachable;

        #[async_trait]
        impl ObjectSource for Unreachable {
            fn container(&self) -> &str {
                "gone"
            }
            async fn list_page(&self, _: &str, _: Option<&str>) -> trawl_storage::Result<trawl_storage::ListPage> {
                Err(StorageError::Config("connection refused".into()))
            }
            async fn get(&self, key: &str) -> trawl_storage::Result<trawl_storage::Bytes> {
                Err(StorageError::NotFound(key.into()))
            }
            fn backend_name(&self) -> &'static str {
                "unreachable"
            }
        }

        let extractor = CloudTrailExtractor::new(
            Arc::new(Unreachable),
            Ledger::new(Arc::new(MemoryIndex::new()), "ledger"),
            "",
        );
        let stream = extractor
            .extract(Merge::new(3), Arc::new(PipelineStats::new()))
            .await
            .unwrap();
        let results: Vec<_> = stream.collect().await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_object_without_key_is_skipped() {
        struct Keyless;

        #[async_trait]
        impl ObjectSource for Keyless {
            fn container(&self) -> &str {
                "b"
            }
            async fn list_page(&self, _: &str, _: Option<&str>) -> trawl_storage::Result<trawl_storage::ListPage> {
                Ok(trawl_storage::ListPage {
                    objects: vec![SourceObject::new("b", "")],
                    continuation: None,
                })
            }
            async fn get(&self, key: &str) -> trawl_storage::Result<trawl_storage::Bytes> {
                Err(StorageError::NotFound(key.into()))
            }
            fn backend_name(&self) -> &'static str {
                "keyless"
            }
        }

        let index = Arc::new(MemoryIndex::new());
        let extractor = CloudTrailExtractor::new(Arc::new(Keyless), Ledger::new(index.clone(), "ledger"), "");

        let (records, stats) = extract_all(&extractor).await;
        assert!(records.is_empty());

        let summary = stats.summary(Default::default());
        assert_eq!(summary.objects_listed, 1);
        assert_eq!(summary.objects_failed, 1);
        assert_eq!(summary.objects_imported, 0);
        assert_eq!(index.document_count("ledger"), 0);
    }
}
