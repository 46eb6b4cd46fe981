use anyhow::{anyhow, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::app::ports::{IngestLogPort, PayloadStorePort};
use crate::config::SourceConfig;
use crate::observability::metrics;
use crate::pipeline::ingestion::sources::FeedbackSource;
use crate::pipeline::ingestion::IngestEntry;
use crate::pipeline::orchestrator::StageReport;
use crate::pipeline::pipeline_config::{ErrorHandlingStrategy, Stage};

/// Pick the sources for a run: all enabled ones, or exactly those named.
pub fn select_sources(configured: &[SourceConfig], only: Option<&[String]>) -> Result<Vec<SourceConfig>> {
    let Some(names) = only else {
        return Ok(configured.iter().filter(|s| s.enabled).cloned().collect());
    };
    let mut selected = Vec::with_capacity(names.len());
    for name in names {
        let source = configured
            .iter()
            .find(|s| &s.id == name)
            .ok_or_else(|| anyhow!("Unknown source '{}'", name))?;
        if !source.enabled {
            return Err(anyhow!("Source '{}' is disabled", name));
        }
        selected.push(source.clone());
    }
    Ok(selected)
}

/// Use case for fetching sources into the raw layer
pub struct IngestUseCase {
    store: Arc<dyn PayloadStorePort>,
    log: Arc<dyn IngestLogPort>,
    on_error: ErrorHandlingStrategy,
}

impl IngestUseCase {
    pub fn new(
        store: Arc<dyn PayloadStorePort>,
        log: Arc<dyn IngestLogPort>,
        on_error: ErrorHandlingStrategy,
    ) -> Self {
        Self { store, log, on_error }
    }

    /// Fetch one source, store its bytes and log the envelope
    #[instrument(skip(self, source), fields(source = %source.source_id()))]
    pub async fn ingest_source(&self, source: &dyn FeedbackSource) -> Result<IngestEntry> {
        let started = Instant::now();
        let payload = source.fetch().await?;
        metrics::ingest::fetch_duration(source.source_id(), started.elapsed().as_secs_f64());

        let stored = self.store.put(&payload.bytes).await?;
        metrics::ingest::payload_stored(source.source_id(), payload.bytes.len(), stored.already_present);

        let entry = IngestEntry {
            envelope_id: Uuid::new_v4().to_string(),
            source_id: source.source_id().to_string(),
            location: source.location().to_string(),
            payload_ref: stored.payload_ref,
            content_type: payload.content_type,
            bytes: payload.bytes.len() as u64,
            ingested_at: Utc::now(),
            duplicate: stored.already_present,
            parse_plan: source.parse_plan(),
        };
        self.log.append(&entry).await?;

        if entry.duplicate {
            info!("Payload unchanged since last fetch ({})", entry.payload_ref);
        } else {
            info!("Stored {} bytes as {}", entry.bytes, entry.payload_ref);
        }
        Ok(entry)
    }

    pub async fn run(&self, sources: &[Box<dyn FeedbackSource>]) -> Result<StageReport> {
        let mut report = StageReport::new(Stage::Ingest);
        report.input = sources.len();

        for source in sources {
            match self.ingest_source(source.as_ref()).await {
                Ok(entry) => {
                    report.output += 1;
                    if entry.duplicate {
                        report.skipped += 1;
                    }
                }
                Err(e) => {
                    metrics::ingest::error(source.source_id());
                    if self.on_error.should_stop() {
                        return Err(e.context(format!("ingesting source '{}'", source.source_id())));
                    }
                    warn!("Skipping source '{}': {:#}", source.source_id(), e);
                    report.errors.push(format!("{}: {:#}", source.source_id(), e));
                }
            }
        }
        Ok(report)
    }
}
