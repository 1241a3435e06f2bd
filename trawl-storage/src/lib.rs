//! Object storage source abstraction for trawl.
//!
//! This crate provides the `ObjectSource` trait the importer reads log
//! objects through, and an implementation on top of `object_store` that
//! talks to AWS S3, S3-compatible services, or an in-memory store.
//!
//! # Quick Start
//!
//! ```no_run
//! use trawl_storage::{gunzip, ObjectSource, ObjectStoreSource, S3Config};
//!
//! # async fn example() -> trawl_storage::Result<()> {
//! let source = ObjectStoreSource::s3(S3Config::aws("cloudtrail-logs", "us-east-1"))?;
//!
//! let mut continuation = None;
//! loop {
//!     let page = source.list_page("AWSLogs/", continuation.as_deref()).await?;
//!     for obj in &page.objects {
//!         let json = gunzip(&source.get(&obj.key).await?)?;
//!         println!("{} -> {} bytes", obj, json.len());
//!     }
//!     match page.continuation {
//!         Some(next) => continuation = Some(next),
//!         None => break,
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod gzip;
mod s3;
mod traits;

pub use error::{Result, StorageError};
pub use gzip::{gunzip, is_gzip};
pub use s3::{ObjectStoreSource, S3Config, DEFAULT_PAGE_SIZE};
pub use traits::{ListPage, ObjectSource, SourceObject};

// Re-export for callers constructing in-memory or custom stores
pub use bytes::Bytes;
pub use object_store;
