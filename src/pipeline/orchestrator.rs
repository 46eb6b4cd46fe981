//! Wires configuration to the stage use cases and runs them in order.

use anyhow::{Context, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::app::enrich_use_case::EnrichUseCase;
use crate::app::ingest_use_case::{select_sources, IngestUseCase};
use crate::app::normalize_use_case::NormalizeUseCase;
use crate::app::parse_use_case::ParseUseCase;
use crate::app::ports::{HttpClientPort, IngestLogPort, PayloadStorePort};
use crate::config::{Config, EnrichProvider};
use crate::infra::http_client::ReqwestHttp;
use crate::infra::ingest_log_adapter::FileIngestLog;
use crate::infra::payload_store::FsPayloadStore;
use crate::observability::metrics;
use crate::pipeline::ingestion::rate_limiter::{Limits, RateLimiter};
use crate::pipeline::ingestion::sources::{ConfiguredSource, FeedbackSource};
use crate::pipeline::pipeline_config::{validate_plan, Stage};
use crate::pipeline::processing::enrich::{Enricher, LexiconEnricher, LlmEnricher};
use crate::pipeline::storage::{Layer, LayerPaths};

/// Outcome of one stage
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: Stage,
    /// Units read: sources, payloads or records depending on the stage
    pub input: usize,
    /// Units written to the stage's output
    pub output: usize,
    /// Units deliberately passed over (duplicates, quarantined, reused)
    pub skipped: usize,
    pub errors: Vec<String>,
    pub output_path: Option<PathBuf>,
    pub duration: Duration,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            input: 0,
            output: 0,
            skipped: 0,
            errors: Vec::new(),
            output_path: None,
            duration: Duration::ZERO,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10} in={:<6} out={:<6} skipped={:<6} errors={:<4} {:>8.2}s",
            self.stage.step_name(),
            self.input,
            self.output,
            self.skipped,
            self.errors.len(),
            self.duration.as_secs_f64()
        )?;
        if let Some(path) = &self.output_path {
            write!(f, "  -> {}", path.display())?;
        }
        Ok(())
    }
}

/// Per-run overrides from the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict ingestion to these source ids
    pub sources: Option<Vec<String>>,
    pub provider: Option<EnrichProvider>,
    /// Re-enrich every record even when previous gold labels could be reused
    pub force: bool,
}

pub struct PipelineRunner {
    config: Config,
    options: RunOptions,
    paths: LayerPaths,
}

impl PipelineRunner {
    pub fn new(config: Config, options: RunOptions) -> Self {
        let paths = LayerPaths::new(&config.storage.data_dir);
        Self { config, options, paths }
    }

    pub fn paths(&self) -> &LayerPaths {
        &self.paths
    }

    /// Run `stages` in order, stopping at the first stage that fails outright.
    pub async fn run(&self, stages: &[Stage]) -> Result<Vec<StageReport>> {
        validate_plan(stages)?;
        let mut reports = Vec::with_capacity(stages.len());
        for stage in stages {
            let report = self.run_stage(*stage).await?;
            reports.push(report);
        }
        Ok(reports)
    }

    pub async fn run_stage(&self, stage: Stage) -> Result<StageReport> {
        info!("Starting stage {}", stage);
        let started = Instant::now();
        let result = match stage {
            Stage::Ingest => self.ingest().await,
            Stage::Parse => self.parse().await,
            Stage::Normalize => self.normalize(),
            Stage::Enrich => self.enrich().await,
        };
        let elapsed = started.elapsed();
        metrics::pipeline::stage_duration(stage.step_name(), elapsed.as_secs_f64());

        match result {
            Ok(mut report) => {
                report.duration = elapsed;
                info!(
                    "Finished stage {}: in={} out={} skipped={} errors={}",
                    stage,
                    report.input,
                    report.output,
                    report.skipped,
                    report.errors.len()
                );
                Ok(report)
            }
            Err(e) => {
                error!("Stage {} failed: {:#}", stage, e);
                Err(e.context(format!("stage '{}' failed", stage)))
            }
        }
    }

    fn payload_store(&self) -> Arc<dyn PayloadStorePort> {
        Arc::new(FsPayloadStore::new(self.paths.layer_dir(Layer::Raw)))
    }

    fn ingest_log(&self) -> Arc<dyn IngestLogPort> {
        Arc::new(FileIngestLog::new(self.paths.ingest_log()))
    }

    async fn ingest(&self) -> Result<StageReport> {
        let selected = select_sources(&self.config.sources, self.options.sources.as_deref())?;
        let settings = &self.config.pipeline;
        let limiter = RateLimiter::new(Limits {
            requests_per_min: settings.fetch_requests_per_min,
            units_per_min: None,
        });
        let http: Arc<dyn HttpClientPort> = Arc::new(
            ReqwestHttp::new(Duration::from_secs(settings.fetch_timeout_secs))?
                .with_rate_limiter(Arc::new(limiter)),
        );
        let sources: Vec<Box<dyn FeedbackSource>> = selected
            .into_iter()
            .map(|cfg| Box::new(ConfiguredSource::new(cfg, http.clone())) as Box<dyn FeedbackSource>)
            .collect();

        let use_case = IngestUseCase::new(self.payload_store(), self.ingest_log(), settings.on_error);
        let mut report = use_case.run(&sources).await?;
        report.output_path = Some(self.paths.ingest_log());
        Ok(report)
    }

    async fn parse(&self) -> Result<StageReport> {
        let use_case = ParseUseCase::new(
            self.payload_store(),
            self.ingest_log(),
            self.paths.bronze_file(),
            self.config.pipeline.on_error,
        );
        use_case.run().await
    }

    fn normalize(&self) -> Result<StageReport> {
        NormalizeUseCase::with_config(self.config.normalize.clone(), self.paths.clone()).run()
    }

    async fn enrich(&self) -> Result<StageReport> {
        let provider = self.options.provider.unwrap_or(self.config.enrich.provider);
        let primary: Arc<dyn Enricher> = match provider {
            EnrichProvider::Lexicon => Arc::new(LexiconEnricher::new()),
            EnrichProvider::Llm => Arc::new(
                LlmEnricher::from_config(&self.config.enrich).context("cannot build LLM enricher")?,
            ),
        };
        let reuse = self.config.enrich.reuse_existing && !self.options.force;
        let use_case = EnrichUseCase::new(
            primary,
            self.config.enrich.concurrency,
            self.config.pipeline.on_error,
            reuse,
            self.paths.clone(),
        );
        use_case.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_line_mentions_counts_and_path() {
        let mut report = StageReport::new(Stage::Normalize);
        report.input = 10;
        report.output = 8;
        report.skipped = 2;
        report.output_path = Some(PathBuf::from("data/silver/feedback.csv"));
        let line = report.to_string();
        assert!(line.starts_with("normalize"));
        assert!(line.contains("in=10"));
        assert!(line.contains("out=8"));
        assert!(line.ends_with("-> data/silver/feedback.csv"));
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn rejects_out_of_order_plan() {
        let runner = PipelineRunner::new(Config::default(), RunOptions::default());
        assert!(runner.run(&[Stage::Enrich, Stage::Parse]).await.is_err());
    }
}
