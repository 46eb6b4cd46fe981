use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::pipeline::ingestion::IngestEntry;

/// Content-addressed storage for raw payloads
#[async_trait]
pub trait PayloadStorePort: Send + Sync {
    /// Store bytes unmodified; returns the payload ref and whether the
    /// same bytes were already present.
    async fn put(&self, bytes: &[u8]) -> Result<StoredPayload>;
    async fn get(&self, payload_ref: &str) -> Result<Vec<u8>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredPayload {
    pub payload_ref: String,
    pub already_present: bool,
}

/// Append-only log of every raw payload fetched
#[async_trait]
pub trait IngestLogPort: Send + Sync {
    async fn append(&self, entry: &IngestEntry) -> Result<()>;
    async fn entries(&self) -> Result<Vec<IngestEntry>>;
}

// Ingest-side ports
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str, headers: &BTreeMap<String, String>) -> Result<HttpGetResult>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait RateLimiterPort: Send + Sync {
    async fn acquire(&self, cost: u64);
}
