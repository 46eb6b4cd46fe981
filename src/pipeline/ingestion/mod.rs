//! Raw layer: fetching feedback payloads and recording where they came from.

pub mod rate_limiter;
pub mod sources;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use indexmap::IndexMap;

use crate::config::{SourceConfig, SourceKind};

/// How to turn a stored payload into records. Captured at ingest time so the
/// raw layer can be re-parsed after the source configuration changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsePlan {
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_pointer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_selector: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub fields: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_title: Option<String>,
}

impl From<&SourceConfig> for ParsePlan {
    fn from(source: &SourceConfig) -> Self {
        Self {
            kind: source.kind,
            records_pointer: source.records_pointer.clone(),
            item_selector: source.item_selector.clone(),
            fields: source.fields.clone(),
            episode_title: source.episode_title.clone(),
        }
    }
}

/// One line of the ingest log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestEntry {
    pub envelope_id: String,
    pub source_id: String,
    /// Location as configured, before placeholder expansion
    pub location: String,
    pub payload_ref: String,
    pub content_type: String,
    pub bytes: u64,
    pub ingested_at: DateTime<Utc>,
    /// The same bytes had already been stored by an earlier fetch
    pub duplicate: bool,
    pub parse_plan: ParsePlan,
}
