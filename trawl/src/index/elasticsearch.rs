//! Elasticsearch REST client.
//!
//! Covers the index, document and `_bulk` endpoints the importer uses.
//! Every request carries the configured timeout.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use super::{BulkOperation, BulkResponse, SearchIndex};
use crate::config::ElasticsearchConfig;
use crate::error::{Error, Result};
use crate::validation::parse_elasticsearch_url;

pub const DEFAULT_ELASTICSEARCH_PORT: u16 = 9200;

const ALREADY_EXISTS: &str = "resource_already_exists_exception";

#[derive(Clone)]
pub struct ElasticsearchClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: Option<(String, Option<String>)>,
}

impl ElasticsearchClient {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self> {
        let base_url = parse_elasticsearch_url(&config.url)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url,
            credentials: config
                .username
                .clone()
                .map(|user| (user, config.password.clone())),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| Error::Config(format!("'{}' is not a usable base URL", self.base_url)))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, password.as_deref()),
            None => builder,
        }
    }
}

impl std::fmt::Debug for ElasticsearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchClient")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}

/// Turn a non-success response into an [`Error::Index`].
async fn index_error(response: Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Error::Index {
        status,
        reason: error_reason(&body),
    }
}

/// Extract `type: reason` from an Elasticsearch error body.
fn error_reason(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    match parsed.as_ref().and_then(|v| v.get("error")) {
        Some(Value::Object(err)) => {
            let kind = err.get("type").and_then(Value::as_str).unwrap_or("unknown");
            match err.get("reason").and_then(Value::as_str) {
                Some(reason) => format!("{}: {}", kind, reason),
                None => kind.to_string(),
            }
        }
        Some(Value::String(err)) => err.clone(),
        _ if body.is_empty() => "empty response".to_string(),
        _ => body.chars().take(512).collect(),
    }
}

/// Serialize operations as an NDJSON `_bulk` body.
fn bulk_body(operations: &[BulkOperation]) -> Result<String> {
    let mut body = String::new();
    for op in operations {
        body.push_str(&serde_json::to_string(&op.action())?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&op.document)?);
        body.push('\n');
    }
    Ok(body)
}

#[async_trait]
impl SearchIndex for ElasticsearchClient {
    #[instrument(skip(self))]
    async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self
            .request(Method::HEAD, self.endpoint(&[index])?)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(index_error(response).await),
        }
    }

    #[instrument(skip(self, mappings))]
    async fn create_index(&self, index: &str, mappings: &Value) -> Result<()> {
        let response = self
            .request(Method::PUT, self.endpoint(&[index])?)
            .json(&json!({ "mappings": mappings }))
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        match index_error(response).await {
            Error::Index { reason, .. } if reason.starts_with(ALREADY_EXISTS) => {
                debug!("Index '{}' was created concurrently", index);
                Ok(())
            }
            err => Err(err),
        }
    }

    #[instrument(skip(self))]
    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let response = self
            .request(Method::GET, self.endpoint(&[index, "_doc", id])?)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: Value = response.json().await?;
                if body.get("found") == Some(&Value::Bool(false)) {
                    return Ok(None);
                }
                Ok(Some(body.get("_source").cloned().unwrap_or(Value::Null)))
            }
            _ => Err(index_error(response).await),
        }
    }

    #[instrument(skip(self, document))]
    async fn index_document(&self, index: &str, id: &str, document: &Value) -> Result<()> {
        let response = self
            .request(Method::PUT, self.endpoint(&[index, "_doc", id])?)
            .json(document)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(index_error(response).await);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(operations = operations.len()))]
    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse> {
        if operations.is_empty() {
            return Ok(BulkResponse::default());
        }

        let response = self
            .request(Method::POST, self.endpoint(&["_bulk"])?)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(bulk_body(operations)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(index_error(response).await);
        }
        let parsed: BulkResponse = response.json().await?;
        debug!(took_ms = parsed.took, errors = parsed.errors, "Bulk request done");
        Ok(parsed)
    }

    fn backend_name(&self) -> &'static str {
        "elasticsearch"
    }
}
