//! Feedback records and the labels attached to them as they move through
//! the bronze, silver and gold layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Sentiment polarity attached during enrichment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub const ALL: [SentimentLabel; 3] = [
        SentimentLabel::Positive,
        SentimentLabel::Neutral,
        SentimentLabel::Negative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }

    /// Parse the many spellings classifiers and annotators use for polarity.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let value = raw.trim().to_lowercase().replace(['-', '_'], " ");
        let value = value.trim();
        match value {
            "positive" | "pos" | "very positive" | "label 2" | "4 stars" | "5 stars" => {
                Some(SentimentLabel::Positive)
            }
            "neutral" | "neu" | "mixed" | "label 1" | "3 stars" => Some(SentimentLabel::Neutral),
            "negative" | "neg" | "very negative" | "label 0" | "1 star" | "2 stars" => {
                Some(SentimentLabel::Negative)
            }
            _ => None,
        }
    }

    /// Label for a signed score using the conventional ±0.05 dead zone.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.05 {
            SentimentLabel::Positive
        } else if score <= -0.05 {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Basic emotion categories plus neutral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Joy,
    Sadness,
    Anger,
    Fear,
    Surprise,
    Disgust,
    Neutral,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Joy => "joy",
            Emotion::Sadness => "sadness",
            Emotion::Anger => "anger",
            Emotion::Fear => "fear",
            Emotion::Surprise => "surprise",
            Emotion::Disgust => "disgust",
            Emotion::Neutral => "neutral",
        }
    }

    pub fn parse_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "joy" | "happiness" | "happy" | "love" | "excitement" => Some(Emotion::Joy),
            "sadness" | "sad" | "grief" | "disappointment" => Some(Emotion::Sadness),
            "anger" | "angry" | "annoyance" | "frustration" => Some(Emotion::Anger),
            "fear" | "anxiety" | "worry" => Some(Emotion::Fear),
            "surprise" | "surprised" | "amazement" => Some(Emotion::Surprise),
            "disgust" | "disgusted" | "contempt" => Some(Emotion::Disgust),
            "neutral" | "none" | "" => Some(Emotion::Neutral),
            _ => None,
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of audience feedback.
///
/// The record is flat so that every layer can be stored as CSV. Fields
/// after `ingested_at` stay empty until the enrichment stage fills them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub record_id: String,
    pub source_id: String,
    pub episode_title: Option<String>,
    pub author: Option<String>,
    pub text: String,
    pub published_at: Option<DateTime<Utc>>,
    pub like_count: Option<u64>,
    pub ingested_at: DateTime<Utc>,
    pub sentiment: Option<SentimentLabel>,
    pub sentiment_score: Option<f64>,
    pub emotion: Option<Emotion>,
    pub confidence: Option<f64>,
    pub lexicon_label: Option<SentimentLabel>,
    pub lexicon_score: Option<f64>,
    pub model: Option<String>,
}

impl FeedbackRecord {
    /// CSV header, in field order
    pub const COLUMNS: [&'static str; 15] = [
        "record_id",
        "source_id",
        "episode_title",
        "author",
        "text",
        "published_at",
        "like_count",
        "ingested_at",
        "sentiment",
        "sentiment_score",
        "emotion",
        "confidence",
        "lexicon_label",
        "lexicon_score",
        "model",
    ];

    pub fn is_enriched(&self) -> bool {
        self.sentiment.is_some()
    }
}

/// Stable identifier for a feedback record.
///
/// Uses the id the source assigned when there is one, otherwise the
/// author, timestamp and text of the comment.
pub fn record_id(
    source_id: &str,
    native_id: Option<&str>,
    author: Option<&str>,
    published_at: Option<&DateTime<Utc>>,
    text: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0u8]);
    match native_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => {
            hasher.update(b"id:");
            hasher.update(id.trim().as_bytes());
        }
        None => {
            hasher.update(author.unwrap_or_default().as_bytes());
            hasher.update([0u8]);
            if let Some(ts) = published_at {
                hasher.update(ts.to_rfc3339().as_bytes());
            }
            hasher.update([0u8]);
            hasher.update(text.as_bytes());
        }
    }
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}
