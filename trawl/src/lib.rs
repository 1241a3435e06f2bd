//! Trawl - incremental CloudTrail to Elasticsearch importer
//!
//! Lists gzip CloudTrail logs in an S3 bucket, skips those already recorded
//! in a ledger index, and bulk-loads the records of the rest into a
//! destination index. Extraction, transformation and loading overlap
//! across a fixed number of workers.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use trawl::{ElasticsearchClient, ImportConfig, Importer};
//! use trawl_storage::ObjectStoreSource;
//!
//! # async fn example() -> trawl::Result<()> {
//! let mut config = ImportConfig::default();
//! config.source.bucket = "cloudtrail-logs".to_string();
//! config.source.prefix = "AWSLogs/123456789012/CloudTrail/".to_string();
//! config.elasticsearch.url = "http://localhost:9200".to_string();
//! config.validate()?;
//!
//! let source = ObjectStoreSource::s3(config.source.s3_config())?;
//! let index = ElasticsearchClient::new(&config.elasticsearch)?;
//!
//! let summary = Importer::new(config, Arc::new(source), Arc::new(index)).run().await?;
//! println!("{}", summary);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod import;
pub mod index;
pub mod ledger;
pub mod load;
pub mod merge;
pub mod metrics;
pub mod pipeline;
pub mod stats;
pub mod transform;
pub mod validation;

pub use config::ImportConfig;
pub use error::{Error, Result};
pub use extract::{CloudTrailExtractor, Extract};
pub use import::Importer;
pub use index::{ElasticsearchClient, MemoryIndex, SearchIndex};
pub use ledger::{fingerprint, Ledger, LedgerEntry};
pub use load::{BulkLoader, Load, LoadOutcome};
pub use merge::{Merge, Merged};
pub use pipeline::BatchPipeline;
pub use stats::{PipelineStats, RunSummary};
pub use transform::{CloudTrailTransform, Document, LogRecord, Transform};
