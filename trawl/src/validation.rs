//! Checks applied to user input before a run starts.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use crate::error::{Error, Result};
use crate::index::DEFAULT_ELASTICSEARCH_PORT;

static ACCESS_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]{20}$").expect("access key pattern"));
static SECRET_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9/+=]{40}$").expect("secret key pattern"));

/// Explicit AWS credentials must come as a well-formed pair, or not at all.
pub fn validate_credentials(access_key: Option<&str>, secret_key: Option<&str>) -> Result<()> {
    match (access_key, secret_key) {
        (None, None) => Ok(()),
        (Some(access), Some(secret)) => {
            if !ACCESS_KEY.is_match(access) {
                return Err(Error::Validation(
                    "access key must be 20 upper-case letters or digits".to_string(),
                ));
            }
            if !SECRET_KEY.is_match(secret) {
                return Err(Error::Validation(
                    "secret key must be 40 characters of base64 alphabet".to_string(),
                ));
            }
            Ok(())
        }
        (Some(_), None) => Err(Error::Validation(
            "access key given without a secret key".to_string(),
        )),
        (None, Some(_)) => Err(Error::Validation(
            "secret key given without an access key".to_string(),
        )),
    }
}

/// Elasticsearch index names: lower case, no path or wildcard characters.
pub fn validate_index_name(name: &str) -> Result<()> {
    const FORBIDDEN: &[char] = &['\\', '/', '*', '?', '"', '<', '>', '|', ' ', ',', '#', ':'];

    let invalid = |why: &str| Err(Error::Validation(format!("index name '{}' {}", name, why)));

    if name.is_empty() {
        return Err(Error::Validation("index name must not be empty".to_string()));
    }
    if name == "." || name == ".." {
        return invalid("is reserved");
    }
    if name.starts_with(['-', '_', '+']) {
        return invalid("must not start with '-', '_' or '+'");
    }
    if name.chars().any(|c| c.is_uppercase()) {
        return invalid("must be lower case");
    }
    if name.contains(FORBIDDEN) {
        return invalid("contains a forbidden character");
    }
    if name.len() > 255 {
        return invalid("is longer than 255 bytes");
    }
    Ok(())
}

pub fn validate_pipeline(parallelism: usize, batch_size: usize) -> Result<()> {
    if parallelism == 0 {
        return Err(Error::Validation("parallelism must be at least 1".to_string()));
    }
    if batch_size == 0 {
        return Err(Error::Validation("batch size must be at least 1".to_string()));
    }
    Ok(())
}

/// Parse an Elasticsearch URL, defaulting the port to 9200.
pub fn parse_elasticsearch_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| Error::Validation(format!("invalid Elasticsearch URL '{}': {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Validation(format!(
            "Elasticsearch URL '{}' must use http or https",
            raw
        )));
    }
    if url.port().is_none() {
        url.set_port(Some(DEFAULT_ELASTICSEARCH_PORT))
            .map_err(|_| Error::Validation(format!("Elasticsearch URL '{}' has no host", raw)))?;
    }
    Ok(url)
}
