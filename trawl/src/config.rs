//! Import configuration.
//!
//! Every section has defaults, so a config file only needs the values that
//! differ. Command-line flags are applied on top by the CLI.
//!
//! ```toml
//! [source]
//! bucket = "cloudtrail-logs"
//! prefix = "AWSLogs/123456789012/CloudTrail/"
//!
//! [elasticsearch]
//! url = "http://localhost:9200"
//!
//! [pipeline]
//! parallelism = 8
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use trawl_storage::{S3Config, DEFAULT_PAGE_SIZE};

use crate::error::{Error, Result};
use crate::validation;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ImportConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub indices: IndexConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Bucket holding the CloudTrail logs
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Only keys starting with this prefix are imported
    #[serde(default)]
    pub prefix: String,
    /// Custom endpoint for S3-compatible services
    pub endpoint: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
    /// Explicit credentials; the AWS environment is used when absent
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            prefix: String::new(),
            endpoint: None,
            allow_http: false,
            access_key: None,
            secret_key: None,
            page_size: default_page_size(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl SourceConfig {
    pub fn s3_config(&self) -> S3Config {
        let mut config = match &self.endpoint {
            Some(endpoint) => S3Config {
                region: self.region.clone(),
                ..S3Config::minio(&self.bucket, endpoint)
            },
            None => S3Config::aws(&self.bucket, &self.region),
        };
        config.allow_http = self.allow_http;
        if let (Some(access), Some(secret)) = (&self.access_key, &self.secret_key) {
            config = config.with_credentials(access, secret);
        }
        config
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ElasticsearchConfig {
    /// Cluster URL, required
    #[serde(default)]
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Timeout applied to every request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: None,
            password: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Concurrent extraction workers, and concurrent load pipelines
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Records per bulk request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Retries of a failed bulk request before its batch is dropped
    #[serde(default = "default_bulk_max_retries")]
    pub bulk_max_retries: usize,
    /// Base delay between bulk retries, multiplied by the attempt number
    #[serde(default = "default_bulk_retry_delay_ms")]
    pub bulk_retry_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            batch_size: default_batch_size(),
            bulk_max_retries: default_bulk_max_retries(),
            bulk_retry_delay_ms: default_bulk_retry_delay_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn bulk_retry_delay(&self) -> Duration {
        Duration::from_millis(self.bulk_retry_delay_ms)
    }
}

fn default_parallelism() -> usize {
    5
}

fn default_batch_size() -> usize {
    1000
}

fn default_bulk_max_retries() -> usize {
    3
}

fn default_bulk_retry_delay_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Index recording which objects have been imported
    #[serde(default = "default_ledger_index")]
    pub ledger: String,
    /// Index receiving the CloudTrail records
    #[serde(default = "default_destination_index")]
    pub destination: String,
    /// Record field used as document id; empty to let the store assign ids
    #[serde(default = "default_document_id_field")]
    pub document_id_field: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            ledger: default_ledger_index(),
            destination: default_destination_index(),
            document_id_field: default_document_id_field(),
        }
    }
}

fn default_ledger_index() -> String {
    "cloudtrail-import-log".to_string()
}

fn default_destination_index() -> String {
    "cloudtrail".to_string()
}

fn default_document_id_field() -> String {
    "eventID".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log output format: "pretty" or "json"
    /// Override with LOG_FORMAT env var
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter string
    /// Override with RUST_LOG env var
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_level() -> String {
    "info,trawl=debug".to_string()
}

impl ImportConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check everything a run depends on before any I/O happens.
    pub fn validate(&self) -> Result<()> {
        if self.source.bucket.is_empty() {
            return Err(Error::Validation("a source bucket is required".to_string()));
        }
        validation::validate_credentials(
            self.source.access_key.as_deref(),
            self.source.secret_key.as_deref(),
        )?;
        validation::validate_pipeline(self.pipeline.parallelism, self.pipeline.batch_size)?;
        validation::validate_index_name(&self.indices.ledger)?;
        validation::validate_index_name(&self.indices.destination)?;
        if self.indices.ledger == self.indices.destination {
            return Err(Error::Validation(
                "ledger and destination indices must differ".to_string(),
            ));
        }
        if self.elasticsearch.url.is_empty() {
            return Err(Error::Validation("an Elasticsearch URL is required".to_string()));
        }
        validation::parse_elasticsearch_url(&self.elasticsearch.url)?;
        Ok(())
    }
}
