//! Silver layer: standardize column names and coerce bronze fields into
//! typed `FeedbackRecord`s.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::NormalizeConfig;
use crate::domain::{record_id, FeedbackRecord};
use crate::pipeline::processing::parser::{BronzeRecord, Fields};
use crate::pipeline::processing::quality_gate::{QualityIssue, QualityIssueType, QualitySeverity};

const TEXT_ALIASES: &[&str] = &[
    "text",
    "comment",
    "comment_text",
    "body",
    "text_display",
    "text_original",
    "snippet_text_display",
    "snippet_text_original",
    "content",
    "message",
    "review",
];
const TEXT_SUFFIXES: &[&str] = &["_text_display", "_text_original"];
const AUTHOR_ALIASES: &[&str] = &[
    "author",
    "author_display_name",
    "author_name",
    "user",
    "username",
    "snippet_author_display_name",
];
const PUBLISHED_ALIASES: &[&str] =
    &["published_at", "snippet_published_at", "timestamp", "created_at", "created", "date"];
const LIKE_ALIASES: &[&str] = &["like_count", "likes", "snippet_like_count", "upvotes", "score"];
const EPISODE_ALIASES: &[&str] = &["episode_title", "episode", "video_title"];
const TIMESTAMP_FORMATS: &str = "RFC 3339, YYYY-MM-DD HH:MM:SS, YYYY-MM-DD or unix seconds";
const ID_ALIASES: &[&str] = &["id", "comment_id", "record_id", "top_level_comment_id"];

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</?[a-z][^>]*>").expect("valid tag regex"));
static NUMERIC_ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&#(x?[0-9a-fA-F]+);").expect("valid entity regex"));

/// Lineage of a silver record back to its raw payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordProvenance {
    pub envelope_id: String,
    pub source_id: String,
    pub payload_ref: String,
    pub record_path: String,
}

/// A typed record plus everything the quality gate needs to judge it
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub record: FeedbackRecord,
    pub provenance: RecordProvenance,
    /// Bronze fields under their standardized names
    pub fields: Fields,
    /// Coercion problems found while typing fields
    pub issues: Vec<QualityIssue>,
}

/// Trait for normalizing bronze records into feedback records
pub trait Normalizer {
    fn normalize(&self, record: &BronzeRecord) -> NormalizedRecord;
}

/// Alias-driven normalizer covering CSV exports, comment APIs and scraped pages
pub struct DefaultNormalizer {
    pub config: NormalizeConfig,
    now: fn() -> DateTime<Utc>,
}

impl DefaultNormalizer {
    pub fn new(config: NormalizeConfig) -> Self {
        Self { config, now: Utc::now }
    }

    #[cfg(test)]
    fn with_clock(config: NormalizeConfig, now: fn() -> DateTime<Utc>) -> Self {
        Self { config, now }
    }
}

impl Default for DefaultNormalizer {
    fn default() -> Self {
        Self::new(NormalizeConfig::default())
    }
}

impl Normalizer for DefaultNormalizer {
    fn normalize(&self, bronze: &BronzeRecord) -> NormalizedRecord {
        let mut fields = Fields::new();
        // first field in source order wins when two names standardize alike
        for (key, value) in &bronze.fields {
            let name = standardize_column_name(key);
            if !name.is_empty() {
                fields.entry(name).or_insert_with(|| value.clone());
            }
        }

        let mut issues = Vec::new();

        let text = pick_text(&fields).map(|s| clean_text(s)).unwrap_or_default();
        let author = pick(&fields, AUTHOR_ALIASES)
            .map(|s| clean_text(s))
            .filter(|s| !s.is_empty());
        if author.is_none() {
            issues.push(issue(
                QualityIssueType::MissingData,
                QualitySeverity::Info,
                "No author",
                "author",
            ));
        }

        let published_at = match pick(&fields, PUBLISHED_ALIASES) {
            None => None,
            Some(raw) => match parse_timestamp(raw) {
                None => {
                    let mut unparseable = issue(
                        QualityIssueType::InvalidFormat,
                        QualitySeverity::Warning,
                        &format!("Unparseable timestamp '{}'", raw),
                        "published_at",
                    );
                    unparseable.suggestion = Some(TIMESTAMP_FORMATS.to_string());
                    issues.push(unparseable);
                    None
                }
                Some(ts) if ts > (self.now)() + Duration::hours(self.config.max_future_skew_hours) => {
                    issues.push(issue(
                        QualityIssueType::TemporalInconsistency,
                        QualitySeverity::Warning,
                        &format!("Timestamp {} is in the future", ts.to_rfc3339()),
                        "published_at",
                    ));
                    None
                }
                Some(ts) => Some(ts),
            },
        };

        let like_count = match pick(&fields, LIKE_ALIASES) {
            None => None,
            Some(raw) => {
                let parsed = parse_count(raw);
                if parsed.is_none() {
                    issues.push(issue(
                        QualityIssueType::InvalidFormat,
                        QualitySeverity::Info,
                        &format!("Unparseable like count '{}'", raw),
                        "like_count",
                    ));
                }
                parsed
            }
        };

        let episode_title = pick(&fields, EPISODE_ALIASES)
            .map(|s| clean_text(s))
            .filter(|s| !s.is_empty());

        let id = record_id(
            &bronze.source_id,
            pick(&fields, ID_ALIASES),
            author.as_deref(),
            published_at.as_ref(),
            &text,
        );

        NormalizedRecord {
            record: FeedbackRecord {
                record_id: id,
                source_id: bronze.source_id.clone(),
                episode_title,
                author,
                text,
                published_at,
                like_count,
                ingested_at: bronze.ingested_at,
                sentiment: None,
                sentiment_score: None,
                emotion: None,
                confidence: None,
                lexicon_label: None,
                lexicon_score: None,
                model: None,
            },
            provenance: RecordProvenance {
                envelope_id: bronze.envelope_id.clone(),
                source_id: bronze.source_id.clone(),
                payload_ref: bronze.payload_ref.clone(),
                record_path: bronze.record_path.clone(),
            },
            fields,
            issues,
        }
    }
}

fn issue(issue_type: QualityIssueType, severity: QualitySeverity, description: &str, field: &str) -> QualityIssue {
    QualityIssue {
        issue_type,
        severity,
        description: description.to_string(),
        field: Some(field.to_string()),
        suggestion: None,
    }
}

fn pick<'a>(fields: &'a Fields, aliases: &[&str]) -> Option<&'a str> {
    aliases
        .iter()
        .find_map(|alias| fields.get(*alias))
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

fn pick_text(fields: &Fields) -> Option<&str> {
    pick(fields, TEXT_ALIASES).or_else(|| {
        fields
            .iter()
            .find(|(k, v)| TEXT_SUFFIXES.iter().any(|s| k.ends_with(s)) && !v.trim().is_empty())
            .map(|(_, v)| v.as_str())
    })
}

/// `snippet.textDisplay` → `snippet_text_display`, `Comment Text` → `comment_text`
pub fn standardize_column_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower_or_digit = false;
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_lower_or_digit {
                pending_sep = true;
            }
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
            prev_lower_or_digit = c.is_lowercase() || c.is_ascii_digit();
        } else {
            pending_sep = true;
            prev_lower_or_digit = false;
        }
    }
    out
}

/// Strip markup, decode common entities and collapse whitespace
pub fn clean_text(raw: &str) -> String {
    let without_tags = TAG.replace_all(raw, " ");
    let decoded = decode_entities(&without_tags);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(s: &str) -> String {
    let named = s
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    let numeric = NUMERIC_ENTITY.replace_all(&named, |caps: &regex::Captures| {
        let code = &caps[1];
        let value = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        value
            .and_then(char::from_u32)
            .map(|c| c.to_string())
            .unwrap_or_else(|| caps[0].to_string())
    });
    // `&amp;` last so that `&amp;lt;` stays literal
    numeric.replace("&amp;", "&")
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD` and unix seconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%m/%d/%Y %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    if raw.len() >= 9 && raw.chars().all(|c| c.is_ascii_digit()) {
        let secs: i64 = raw.parse().ok()?;
        // millisecond epochs have 13 digits
        let secs = if raw.len() >= 13 { secs / 1000 } else { secs };
        return DateTime::from_timestamp(secs, 0);
    }
    None
}

/// Accepts `42`, `1,234`, `1.2k`, `3M`
pub fn parse_count(raw: &str) -> Option<u64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',' && *c != '_').collect();
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(n) = cleaned.parse::<u64>() {
        return Some(n);
    }
    let lower = cleaned.to_lowercase();
    let (number, multiplier) = match lower.chars().last()? {
        'k' => (&lower[..lower.len() - 1], 1_000.0),
        'm' => (&lower[..lower.len() - 1], 1_000_000.0),
        _ => (lower.as_str(), 1.0),
    };
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}
