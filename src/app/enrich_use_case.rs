use anyhow::{anyhow, Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::FeedbackRecord;
use crate::observability::metrics;
use crate::pipeline::orchestrator::StageReport;
use crate::pipeline::pipeline_config::{ErrorHandlingStrategy, Stage};
use crate::pipeline::processing::enrich::{
    apply_labels, apply_lexicon, can_reuse, Enricher, LexiconEnricher, FALLBACK_MODEL,
};
use crate::pipeline::storage::{self, LayerPaths};

/// How a gold record got its labels
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Enriched,
    Reused,
    /// The provider failed; lexicon labels were used instead
    Fallback(String),
}

#[derive(Debug, Default)]
pub struct EnrichOutcome {
    /// Gold records, in silver order
    pub records: Vec<FeedbackRecord>,
    pub reused: usize,
    pub fallbacks: Vec<String>,
}

/// Use case for labelling silver records into the gold layer
pub struct EnrichUseCase {
    primary: Arc<dyn Enricher>,
    lexicon: LexiconEnricher,
    concurrency: usize,
    on_error: ErrorHandlingStrategy,
    reuse_existing: bool,
    paths: LayerPaths,
}

impl EnrichUseCase {
    pub fn new(
        primary: Arc<dyn Enricher>,
        concurrency: usize,
        on_error: ErrorHandlingStrategy,
        reuse_existing: bool,
        paths: LayerPaths,
    ) -> Self {
        Self {
            primary,
            lexicon: LexiconEnricher::new(),
            concurrency: concurrency.max(1),
            on_error,
            reuse_existing,
            paths,
        }
    }

    async fn enrich_record(
        &self,
        mut record: FeedbackRecord,
        previous: Option<&FeedbackRecord>,
    ) -> Result<(FeedbackRecord, Disposition)> {
        let lexicon = self.lexicon.score(&record.text);
        apply_lexicon(&mut record, &lexicon);

        let model = self.primary.name();
        if let Some(prev) = previous.filter(|p| self.reuse_existing && can_reuse(p, &record, model)) {
            record.sentiment = prev.sentiment;
            record.sentiment_score = prev.sentiment_score;
            record.emotion = prev.emotion;
            record.confidence = prev.confidence;
            record.model = prev.model.clone();
            return Ok((record, Disposition::Reused));
        }

        match self.primary.enrich(&record.text).await {
            Ok(labels) => {
                apply_labels(&mut record, &labels, model);
                Ok((record, Disposition::Enriched))
            }
            Err(e) if !self.on_error.should_stop() => {
                warn!("Enrichment failed for {}, using lexicon labels: {}", record.record_id, e);
                apply_labels(&mut record, &lexicon, FALLBACK_MODEL);
                let reason = format!("{}: {}", record.record_id, e);
                Ok((record, Disposition::Fallback(reason)))
            }
            Err(e) => Err(anyhow!(e).context(format!("enriching record {}", record.record_id))),
        }
    }

    /// Label `records` with at most `concurrency` calls in flight. Output
    /// order matches input order.
    pub async fn enrich_batch(
        &self,
        records: Vec<FeedbackRecord>,
        previous: &HashMap<String, FeedbackRecord>,
    ) -> Result<EnrichOutcome> {
        let results: Vec<(FeedbackRecord, Disposition)> = stream::iter(records)
            .map(|record| {
                let prev = previous.get(&record.record_id);
                self.enrich_record(record, prev)
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let mut outcome = EnrichOutcome::default();
        for (record, disposition) in results {
            match disposition {
                Disposition::Enriched => {
                    metrics::enrich::record_enriched(record.model.as_deref().unwrap_or_default());
                }
                Disposition::Reused => {
                    metrics::enrich::record_reused();
                    outcome.reused += 1;
                }
                Disposition::Fallback(reason) => {
                    metrics::enrich::fallback();
                    outcome.fallbacks.push(reason);
                }
            }
            outcome.records.push(record);
        }
        Ok(outcome)
    }

    fn load_previous(&self) -> HashMap<String, FeedbackRecord> {
        if !self.reuse_existing {
            return HashMap::new();
        }
        match storage::read_csv_if_exists::<FeedbackRecord>(&self.paths.gold_file()) {
            Ok(rows) => rows.into_iter().map(|r| (r.record_id.clone(), r)).collect(),
            Err(e) => {
                warn!("Ignoring unreadable previous gold file: {}", e);
                HashMap::new()
            }
        }
    }

    /// Read the silver file and replace the gold file
    pub async fn run(&self) -> Result<StageReport> {
        let silver_path = self.paths.silver_file();
        let silver: Vec<FeedbackRecord> = storage::read_csv(&silver_path)
            .with_context(|| format!("reading silver layer {}", silver_path.display()))?;
        let previous = self.load_previous();
        info!(
            "Enriching {} records with {} (concurrency {}, {} previous labels)",
            silver.len(),
            self.primary.name(),
            self.concurrency,
            previous.len()
        );

        let input = silver.len();
        let outcome = self.enrich_batch(silver, &previous).await?;
        let gold_path = self.paths.gold_file();
        storage::write_csv_with_header(&gold_path, &FeedbackRecord::COLUMNS, &outcome.records)?;

        let mut report = StageReport::new(Stage::Enrich);
        report.input = input;
        report.output = outcome.records.len();
        report.skipped = outcome.reused;
        report.errors = outcome.fallbacks;
        report.output_path = Some(gold_path);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Emotion, SentimentLabel};
    use crate::error::PipelineError;
    use crate::pipeline::processing::enrich::EnrichmentLabels;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers after a delay that shrinks with position, so completions
    /// arrive out of order; texts containing "fail" error out.
    struct ScriptedEnricher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Enricher for ScriptedEnricher {
        fn name(&self) -> &str {
            "scripted-model"
        }

        async fn enrich(&self, text: &str) -> crate::error::Result<EnrichmentLabels> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(n as u64 * 10))).await;
            if text.contains("fail") {
                return Err(PipelineError::Api { message: "HTTP 400".into() });
            }
            Ok(EnrichmentLabels {
                sentiment: SentimentLabel::Neutral,
                score: 0.0,
                emotion: Emotion::Surprise,
                confidence: 0.9,
            })
        }
    }

    fn silver(id: &str, text: &str) -> FeedbackRecord {
        FeedbackRecord {
            record_id: id.into(),
            source_id: "s".into(),
            episode_title: None,
            author: None,
            text: text.into(),
            published_at: None,
            like_count: None,
            ingested_at: Utc::now(),
            sentiment: None,
            sentiment_score: None,
            emotion: None,
            confidence: None,
            lexicon_label: None,
            lexicon_score: None,
            model: None,
        }
    }

    fn use_case(on_error: ErrorHandlingStrategy, reuse: bool) -> (EnrichUseCase, Arc<ScriptedEnricher>) {
        let enricher = Arc::new(ScriptedEnricher { calls: AtomicUsize::new(0) });
        let use_case = EnrichUseCase::new(enricher.clone(), 4, on_error, reuse, LayerPaths::new("unused"));
        (use_case, enricher)
    }

    #[tokio::test]
    async fn keeps_input_order_and_always_runs_lexicon() {
        let (use_case, _) = use_case(ErrorHandlingStrategy::Continue, true);
        let records = (0..4).map(|i| silver(&format!("r{}", i), "loved it")).collect();
        let outcome = use_case.enrich_batch(records, &HashMap::new()).await.unwrap();

        let ids: Vec<_> = outcome.records.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["r0", "r1", "r2", "r3"]);
        for r in &outcome.records {
            assert_eq!(r.sentiment, Some(SentimentLabel::Neutral));
            assert_eq!(r.model.as_deref(), Some("scripted-model"));
            assert_eq!(r.lexicon_label, Some(SentimentLabel::Positive));
        }
    }

    #[tokio::test]
    async fn failed_calls_fall_back_to_lexicon() {
        let (use_case, _) = use_case(ErrorHandlingStrategy::Continue, true);
        let outcome = use_case
            .enrich_batch(vec![silver("a", "great, fail"), silver("b", "fine")], &HashMap::new())
            .await
            .unwrap();
        assert_eq!(outcome.fallbacks.len(), 1);
        let fallback = &outcome.records[0];
        assert_eq!(fallback.model.as_deref(), Some(FALLBACK_MODEL));
        assert_eq!(fallback.sentiment, fallback.lexicon_label);
        assert!(outcome.records.iter().all(|r| r.sentiment.is_some()));
    }

    #[tokio::test]
    async fn stop_policy_fails_the_batch() {
        let (use_case, _) = use_case(ErrorHandlingStrategy::Stop, true);
        let result = use_case.enrich_batch(vec![silver("a", "fail")], &HashMap::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reuses_matching_previous_labels() {
        let (use_case, enricher) = use_case(ErrorHandlingStrategy::Continue, true);
        let mut prev = silver("a", "same text");
        prev.sentiment = Some(SentimentLabel::Negative);
        prev.sentiment_score = Some(-0.4);
        prev.emotion = Some(Emotion::Anger);
        prev.confidence = Some(0.8);
        prev.model = Some("scripted-model".into());
        let previous = HashMap::from([("a".to_string(), prev)]);

        let outcome = use_case
            .enrich_batch(vec![silver("a", "same text"), silver("b", "new one")], &previous)
            .await
            .unwrap();
        assert_eq!(outcome.reused, 1);
        assert_eq!(outcome.records[0].sentiment, Some(SentimentLabel::Negative));
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_ignores_previous_labels() {
        let (use_case, enricher) = use_case(ErrorHandlingStrategy::Continue, false);
        let mut prev = silver("a", "same text");
        prev.sentiment = Some(SentimentLabel::Negative);
        prev.model = Some("scripted-model".into());
        let previous = HashMap::from([("a".to_string(), prev)]);

        let outcome = use_case.enrich_batch(vec![silver("a", "same text")], &previous).await.unwrap();
        assert_eq!(outcome.reused, 0);
        assert_eq!(outcome.records[0].sentiment, Some(SentimentLabel::Neutral));
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 1);
    }
}
