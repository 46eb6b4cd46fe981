use anyhow::Result;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::app::ports::{IngestLogPort, PayloadStorePort};
use crate::observability::metrics;
use crate::pipeline::ingestion::IngestEntry;
use crate::pipeline::orchestrator::StageReport;
use crate::pipeline::pipeline_config::{ErrorHandlingStrategy, Stage};
use crate::pipeline::processing::parser::{parse_payload, write_bronze, BronzeRecord};

/// Use case for turning the raw layer into the bronze file
pub struct ParseUseCase {
    store: Arc<dyn PayloadStorePort>,
    log: Arc<dyn IngestLogPort>,
    output: PathBuf,
    on_error: ErrorHandlingStrategy,
}

impl ParseUseCase {
    pub fn new(
        store: Arc<dyn PayloadStorePort>,
        log: Arc<dyn IngestLogPort>,
        output: PathBuf,
        on_error: ErrorHandlingStrategy,
    ) -> Self {
        Self { store, log, output, on_error }
    }

    async fn parse_entry(&self, entry: &IngestEntry) -> Result<Vec<BronzeRecord>> {
        let bytes = self.store.get(&entry.payload_ref).await?;
        let records = parse_payload(entry, &bytes)?;
        metrics::parse::records_extracted(&entry.source_id, records.len());
        debug!("{} records from {}", records.len(), entry.payload_ref);
        Ok(records)
    }

    /// Parse every distinct payload in the ingest log, in log order, and
    /// replace the bronze file with the result.
    pub async fn run(&self) -> Result<StageReport> {
        let mut report = StageReport::new(Stage::Parse);
        let entries = self.log.entries().await?;
        report.input = entries.len();

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for entry in &entries {
            if !seen.insert(entry.payload_ref.as_str()) {
                report.skipped += 1;
                continue;
            }
            match self.parse_entry(entry).await {
                Ok(parsed) => records.extend(parsed),
                Err(e) => {
                    metrics::parse::error(&entry.source_id);
                    if self.on_error.should_stop() {
                        return Err(e.context(format!("parsing {}", entry.payload_ref)));
                    }
                    warn!("Skipping payload {} from '{}': {:#}", entry.payload_ref, entry.source_id, e);
                    report.errors.push(format!("{} ({}): {:#}", entry.source_id, entry.payload_ref, e));
                }
            }
        }

        write_bronze(&self.output, &records)?;
        info!("Wrote {} bronze records to {}", records.len(), self.output.display());
        report.output = records.len();
        report.output_path = Some(self.output.clone());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceKind;
    use crate::infra::ingest_log_adapter::FileIngestLog;
    use crate::infra::payload_store::FsPayloadStore;
    use crate::pipeline::ingestion::ParsePlan;
    use crate::pipeline::processing::parser::read_bronze;
    use chrono::Utc;
    use indexmap::IndexMap;

    async fn log_payload(
        store: &FsPayloadStore,
        log: &FileIngestLog,
        source_id: &str,
        kind: SourceKind,
        bytes: &[u8],
    ) {
        let stored = store.put(bytes).await.unwrap();
        log.append(&IngestEntry {
            envelope_id: format!("env-{}", source_id),
            source_id: source_id.to_string(),
            location: format!("{}.data", source_id),
            payload_ref: stored.payload_ref,
            content_type: kind.default_content_type().to_string(),
            bytes: bytes.len() as u64,
            ingested_at: Utc::now(),
            duplicate: stored.already_present,
            parse_plan: ParsePlan {
                kind,
                records_pointer: None,
                item_selector: None,
                fields: IndexMap::new(),
                episode_title: None,
            },
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn parses_each_payload_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsPayloadStore::new(dir.path().join("raw")));
        let log = Arc::new(FileIngestLog::new(dir.path().join("raw/ingest_log.ndjson")));

        log_payload(&store, &log, "csv", SourceKind::Csv, b"author,text\nann,hello\nbob,bye\n").await;
        log_payload(&store, &log, "csv", SourceKind::Csv, b"author,text\nann,hello\nbob,bye\n").await;
        log_payload(&store, &log, "broken", SourceKind::Json, b"{not json").await;
        log_payload(&store, &log, "json", SourceKind::Json, br#"[{"text": "nested", "user": {"name": "cy"}}]"#).await;

        let output = dir.path().join("bronze/feedback.csv");
        let use_case = ParseUseCase::new(store, log, output.clone(), ErrorHandlingStrategy::Continue);
        let report = use_case.run().await.unwrap();

        assert_eq!(report.input, 4);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.output, 3);

        let bronze = read_bronze(&output).unwrap();
        assert_eq!(bronze.len(), 3);
        assert_eq!(bronze[2].fields.get("user.name").map(String::as_str), Some("cy"));
    }

    #[tokio::test]
    async fn stop_policy_fails_on_bad_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsPayloadStore::new(dir.path().join("raw")));
        let log = Arc::new(FileIngestLog::new(dir.path().join("raw/ingest_log.ndjson")));
        log_payload(&store, &log, "broken", SourceKind::Json, b"{not json").await;

        let output = dir.path().join("bronze/feedback.csv");
        let use_case = ParseUseCase::new(store, log, output.clone(), ErrorHandlingStrategy::Stop);
        assert!(use_case.run().await.is_err());
        assert!(!output.exists());
    }
}
