//! Durable record of imported source objects.
//!
//! Each fully imported object gets one document in the ledger index, keyed
//! by a fingerprint of its container and key. The fingerprint ignores the
//! object's content: to re-import an object, delete its ledger entry.

use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use trawl_storage::SourceObject;

use crate::error::Result;
use crate::index::{ensure_index, ledger_mappings, SearchIndex};

type HmacSha256 = Hmac<Sha256>;

/// Keeps ids compatible with ledgers written by earlier importers.
const FINGERPRINT_KEY: &[u8] = b"cloudtrail-elasticsearch-import-C001D00D";

/// Ledger id of the object `key` in `container`, as lowercase hex.
pub fn fingerprint(container: &str, key: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(FINGERPRINT_KEY).expect("HMAC accepts keys of any length");
    mac.update(key.as_bytes());
    mac.update(container.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Ledger document of one imported object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub key: String,
    /// Completion time, RFC 3339 in UTC
    pub timestamp: String,
}

impl LedgerEntry {
    pub fn completed_now(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[derive(Clone)]
pub struct Ledger {
    index: Arc<dyn SearchIndex>,
    name: String,
}

impl Ledger {
    pub fn new(index: Arc<dyn SearchIndex>, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create the ledger index if it does not exist yet.
    pub async fn ensure(&self) -> Result<()> {
        ensure_index(self.index.as_ref(), &self.name, &ledger_mappings()).await
    }

    pub async fn is_completed(&self, object: &SourceObject) -> Result<bool> {
        let id = fingerprint(&object.container, &object.key);
        Ok(self.index.get_document(&self.name, &id).await?.is_some())
    }

    pub async fn mark_completed(&self, object: &SourceObject) -> Result<LedgerEntry> {
        let id = fingerprint(&object.container, &object.key);
        let entry = LedgerEntry::completed_now(&object.key);
        self.index
            .index_document(&self.name, &id, &serde_json::to_value(&entry)?)
            .await?;
        Ok(entry)
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("name", &self.name)
            .field("backend", &self.index.backend_name())
            .finish()
    }
}
