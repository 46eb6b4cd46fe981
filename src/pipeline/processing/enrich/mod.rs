//! Gold layer: sentiment and emotion labels for silver records.
//!
//! The lexicon scorer runs on every record and fills `lexicon_label` and
//! `lexicon_score`. The configured provider (lexicon or an LLM) fills the
//! primary `sentiment`, `sentiment_score`, `emotion` and `confidence`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Emotion, FeedbackRecord, SentimentLabel};
use crate::error::Result;

pub mod lexicon;
pub mod llm;

pub use lexicon::LexiconEnricher;
pub use llm::LlmEnricher;

/// Model name written to gold when an AI call failed and the lexicon labels stood in
pub const FALLBACK_MODEL: &str = "lexicon-fallback";

/// Labels produced by one enricher for one piece of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentLabels {
    pub sentiment: SentimentLabel,
    /// Signed polarity in [-1, 1]
    pub score: f64,
    pub emotion: Emotion,
    /// In [0, 1]
    pub confidence: f64,
}

#[async_trait]
pub trait Enricher: Send + Sync {
    /// Identifier stored in the gold `model` column
    fn name(&self) -> &str;
    async fn enrich(&self, text: &str) -> Result<EnrichmentLabels>;
}

/// Copy primary labels onto a record
pub fn apply_labels(record: &mut FeedbackRecord, labels: &EnrichmentLabels, model: &str) {
    record.sentiment = Some(labels.sentiment);
    record.sentiment_score = Some(labels.score);
    record.emotion = Some(labels.emotion);
    record.confidence = Some(labels.confidence);
    record.model = Some(model.to_string());
}

pub fn apply_lexicon(record: &mut FeedbackRecord, labels: &EnrichmentLabels) {
    record.lexicon_label = Some(labels.sentiment);
    record.lexicon_score = Some(labels.score);
}

/// Whether a previously enriched record can be carried over unchanged
pub fn can_reuse(previous: &FeedbackRecord, current: &FeedbackRecord, model: &str) -> bool {
    previous.is_enriched()
        && previous.record_id == current.record_id
        && previous.text == current.text
        && previous.model.as_deref() == Some(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn silver(text: &str) -> FeedbackRecord {
        FeedbackRecord {
            record_id: "abc".into(),
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

    #[test]
    fn reuse_requires_same_text_and_model() {
        let labels = EnrichmentLabels {
            sentiment: SentimentLabel::Positive,
            score: 0.6,
            emotion: Emotion::Joy,
            confidence: 0.9,
        };
        let mut previous = silver("great show");
        apply_labels(&mut previous, &labels, "gpt-4o-mini");

        assert!(can_reuse(&previous, &silver("great show"), "gpt-4o-mini"));
        assert!(!can_reuse(&previous, &silver("great show!"), "gpt-4o-mini"));
        assert!(!can_reuse(&previous, &silver("great show"), "lexicon"));
        assert!(!can_reuse(&silver("great show"), &silver("great show"), "gpt-4o-mini"));
    }
}
