//! S3-compatible object source.
//!
//! Uses the `object_store` crate for S3, MinIO, and other S3-compatible
//! services. Any other `ObjectStore` (notably the in-memory one) can be
//! wrapped with [`ObjectStoreSource::from_store`].
//!
//! # Configuration
//!
//! ```toml
//! [source]
//! bucket = "cloudtrail-logs"
//! region = "us-east-1"
//! prefix = "AWSLogs/123456789012/CloudTrail/"
//!
//! # Optional: For MinIO or other S3-compatible services
//! endpoint = "http://localhost:9000"
//! allow_http = true
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{Result, StorageError};
use crate::traits::{ListPage, ObjectSource, SourceObject};

/// Default number of keys per listing page, matching S3's own page size.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Configuration for an S3 source.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// AWS region
    pub region: String,
    /// Optional custom endpoint (for MinIO, etc.)
    pub endpoint: Option<String>,
    /// Use path-style requests (required for MinIO)
    pub force_path_style: bool,
    /// Optional access key (if not using IAM/env credentials)
    pub access_key_id: Option<String>,
    /// Optional secret key
    pub secret_access_key: Option<String>,
    /// Allow HTTP (non-HTTPS) connections
    pub allow_http: bool,
}

impl S3Config {
    /// Create a new S3 configuration for AWS.
    pub fn aws(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
            allow_http: false,
        }
    }

    /// Create configuration for MinIO or other S3-compatible services.
    pub fn minio(bucket: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: "us-east-1".to_string(),
            endpoint: Some(endpoint.into()),
            force_path_style: true,
            access_key_id: None,
            secret_access_key: None,
            allow_http: true,
        }
    }

    /// Set explicit credentials.
    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }
}

/// Object source backed by any `object_store` implementation.
#[derive(Clone)]
pub struct ObjectStoreSource {
    store: Arc<dyn ObjectStore>,
    container: String,
    page_size: usize,
}

impl ObjectStoreSource {
    /// Create a source reading from an S3 bucket.
    ///
    /// Credentials not given in the config are picked up from the standard
    /// AWS environment variables.
    pub fn s3(config: S3Config) -> Result<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_allow_http(config.allow_http);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }

        if config.force_path_style {
            builder = builder.with_virtual_hosted_style_request(false);
        }

        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder
                .with_access_key_id(key_id)
                .with_secret_access_key(secret);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self::from_store(config.bucket, Arc::new(store)))
    }

    /// Create from an existing ObjectStore instance.
    pub fn from_store(container: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            container: container.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the maximum number of keys returned per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

/// Path of a raw key as listed.
///
/// Keys are taken verbatim; `ObjectPath::from` would percent-encode
/// characters such as `%` and miss the stored object.
fn object_path(key: &str) -> Result<ObjectPath> {
    ObjectPath::parse(key).map_err(|e| StorageError::InvalidKey(e.to_string()))
}

/// Directory part of a raw key prefix.
///
/// `object_store` lists by path segments, while S3 prefixes are plain string
/// prefixes, so listing starts at the last complete segment and keys are
/// filtered against the full prefix afterwards.
fn listing_root(prefix: &str) -> Result<Option<ObjectPath>> {
    prefix
        .rfind('/')
        .map(|i| &prefix[..i])
        .filter(|dir| !dir.is_empty())
        .map(object_path)
        .transpose()
}

impl std::fmt::Debug for ObjectStoreSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreSource")
            .field("container", &self.container)
            .field("page_size", &self.page_size)
            .finish()
    }
}

#[async_trait]
impl ObjectSource for ObjectStoreSource {
    fn container(&self) -> &str {
        &self.container
    }

    #[instrument(skip(self), fields(container = %self.container))]
    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage> {
        debug!("Listing s3://{}/{} after {:?}", self.container, prefix, continuation);

        let root = listing_root(prefix)?;
        let mut stream = match continuation {
            Some(token) => self.store.list_with_offset(root.as_ref(), &object_path(token)?),
            None => self.store.list(root.as_ref()),
        };

        let mut page = ListPage::default();
        while let Some(meta) = stream.try_next().await.map_err(StorageError::from)? {
            let key = meta.location.as_ref();
            if !key.starts_with(prefix) {
                continue;
            }
            if page.objects.len() == self.page_size {
                page.continuation = page.objects.last().map(|obj| obj.key.clone());
                break;
            }
            page.objects.push(SourceObject {
                container: self.container.clone(),
                key: key.to_string(),
                size: Some(meta.size as u64),
            });
        }

        Ok(page)
    }

    #[instrument(skip(self), fields(container = %self.container))]
    async fn get(&self, key: &str) -> Result<Bytes> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".to_string()));
        }
        debug!("Reading s3://{}/{}", self.container, key);

        match self.store.get(&object_path(key)?).await {
            Ok(result) => Ok(result.bytes().await.map_err(StorageError::from)?),
            Err(object_store::Error::NotFound { .. }) => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(StorageError::from(e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
