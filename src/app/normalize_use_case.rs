use anyhow::{Context, Result};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::config::NormalizeConfig;
use crate::domain::FeedbackRecord;
use crate::observability::metrics;
use crate::pipeline::orchestrator::StageReport;
use crate::pipeline::pipeline_config::Stage;
use crate::pipeline::processing::normalize::{DefaultNormalizer, Normalizer};
use crate::pipeline::processing::parser::{read_bronze, BronzeRecord};
use crate::pipeline::processing::quality_gate::{
    DefaultQualityGate, QualityDecision, QualityGate, QuarantinedRecord,
};
use crate::pipeline::storage::{self, LayerPaths};

/// Result of normalizing one bronze batch
#[derive(Debug, Default)]
pub struct NormalizeOutcome {
    /// Records for the silver file, in bronze order
    pub accepted: Vec<FeedbackRecord>,
    pub quarantined: Vec<QuarantinedRecord>,
    /// Accepted records dropped because an earlier one had the same id
    pub duplicates: usize,
    /// Accepted records that carried warnings
    pub warned: usize,
}

/// Use case for typing bronze records and gating them into the silver layer
pub struct NormalizeUseCase {
    normalizer: Box<dyn Normalizer + Send + Sync>,
    gate: Box<dyn QualityGate + Send + Sync>,
    paths: LayerPaths,
}

impl NormalizeUseCase {
    pub fn new(
        normalizer: Box<dyn Normalizer + Send + Sync>,
        gate: Box<dyn QualityGate + Send + Sync>,
        paths: LayerPaths,
    ) -> Self {
        Self { normalizer, gate, paths }
    }

    /// Create a use case with the default normalizer and quality gate
    pub fn with_config(config: NormalizeConfig, paths: LayerPaths) -> Self {
        Self {
            normalizer: Box::new(DefaultNormalizer::new(config.clone())),
            gate: Box::new(DefaultQualityGate::with_config(config)),
            paths,
        }
    }

    pub fn normalize_batch(&self, bronze: &[BronzeRecord]) -> NormalizeOutcome {
        let mut outcome = NormalizeOutcome::default();
        let mut seen_ids = HashSet::new();

        for record in bronze {
            let assessed = self.gate.assess(self.normalizer.normalize(record));
            for issue in &assessed.quality_assessment.issues {
                metrics::normalize::issue_detected(issue.issue_type.as_str(), issue.severity.as_str());
            }

            match assessed.quality_assessment.decision {
                QualityDecision::Quarantine => {
                    metrics::normalize::quarantined();
                    outcome.quarantined.push(QuarantinedRecord::from_assessed(&assessed));
                }
                decision => {
                    let feedback = assessed.normalized_record.record;
                    if !seen_ids.insert(feedback.record_id.clone()) {
                        metrics::normalize::duplicated();
                        outcome.duplicates += 1;
                        continue;
                    }
                    if decision == QualityDecision::AcceptWithWarnings {
                        outcome.warned += 1;
                    }
                    metrics::normalize::accepted();
                    outcome.accepted.push(feedback);
                }
            }
        }
        outcome
    }

    /// Read the bronze file, write the silver file and quarantine log
    pub fn run(&self) -> Result<StageReport> {
        let bronze_path = self.paths.bronze_file();
        let bronze = read_bronze(&bronze_path)
            .with_context(|| format!("reading bronze layer {}", bronze_path.display()))?;

        let outcome = self.normalize_batch(&bronze);
        let silver_path = self.paths.silver_file();
        storage::write_csv_with_header(&silver_path, &FeedbackRecord::COLUMNS, &outcome.accepted)?;
        storage::write_ndjson(&self.paths.quarantine_file(), &outcome.quarantined)?;

        if !outcome.quarantined.is_empty() {
            warn!(
                "{} records quarantined, see {}",
                outcome.quarantined.len(),
                self.paths.quarantine_file().display()
            );
        }
        info!(
            "Silver: {} accepted ({} with warnings), {} duplicates dropped",
            outcome.accepted.len(),
            outcome.warned,
            outcome.duplicates
        );

        let mut report = StageReport::new(Stage::Normalize);
        report.input = bronze.len();
        report.output = outcome.accepted.len();
        report.skipped = outcome.quarantined.len() + outcome.duplicates;
        report.output_path = Some(silver_path);
        Ok(report)
    }
}
