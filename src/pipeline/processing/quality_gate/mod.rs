use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::NormalizeConfig;
use crate::pipeline::processing::normalize::{NormalizedRecord, RecordProvenance};
use crate::pipeline::processing::parser::Fields;

/// A silver candidate together with the gate's verdict
#[derive(Debug, Clone)]
pub struct QualityAssessedRecord {
    /// The normalized record, with any repairs the gate applied
    pub normalized_record: NormalizedRecord,
    pub quality_assessment: QualityAssessment,
}

/// Quality assessment result from the quality gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub decision: QualityDecision,
    /// Specific quality issues found, including those raised during normalization
    pub issues: Vec<QualityIssue>,
}

/// Quality gate decision for a record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum QualityDecision {
    /// Clean; written to the silver file
    Accept,
    /// Written to the silver file; the issues are logged and counted
    AcceptWithWarnings,
    /// Written to the quarantine file instead of silver
    Quarantine,
}

/// One finding against a record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityIssue {
    pub issue_type: QualityIssueType,
    pub severity: QualitySeverity,
    pub description: String,
    /// Silver field the finding is about
    pub field: Option<String>,
    /// What a valid value would look like, when that is knowable
    pub suggestion: Option<String>,
}

/// Finding categories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QualityIssueType {
    MissingData,
    /// Value present but not parseable
    InvalidFormat,
    /// Text too short or too long
    OutOfRange,
    /// Timestamp too far in the future
    TemporalInconsistency,
}

/// Ordered: the worst severity on a record decides its fate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum QualitySeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl QualitySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualitySeverity::Info => "info",
            QualitySeverity::Warning => "warning",
            QualitySeverity::Error => "error",
            QualitySeverity::Critical => "critical",
        }
    }
}

impl QualityIssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityIssueType::MissingData => "missing_data",
            QualityIssueType::InvalidFormat => "invalid_format",
            QualityIssueType::OutOfRange => "out_of_range",
            QualityIssueType::TemporalInconsistency => "temporal_inconsistency",
        }
    }
}

/// Line written to `silver/quarantine.ndjson`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantinedRecord {
    pub record_id: String,
    pub provenance: RecordProvenance,
    pub fields: Fields,
    pub issues: Vec<QualityIssue>,
    pub quarantined_at: DateTime<Utc>,
}

impl QuarantinedRecord {
    pub fn from_assessed(assessed: &QualityAssessedRecord) -> Self {
        Self {
            record_id: assessed.normalized_record.record.record_id.clone(),
            provenance: assessed.normalized_record.provenance.clone(),
            fields: assessed.normalized_record.fields.clone(),
            issues: assessed.quality_assessment.issues.clone(),
            quarantined_at: Utc::now(),
        }
    }
}

/// Judges normalized records before they reach the silver file
pub trait QualityGate {
    fn assess(&self, record: NormalizedRecord) -> QualityAssessedRecord;
}

/// Text-length rules on top of the issues raised while typing fields
pub struct DefaultQualityGate {
    pub config: NormalizeConfig,
}

impl DefaultQualityGate {
    pub fn with_config(config: NormalizeConfig) -> Self {
        Self { config }
    }

    fn assess_text(&self, record: &mut NormalizedRecord) -> Vec<QualityIssue> {
        let mut issues = Vec::new();
        let text = &mut record.record.text;
        let chars = text.chars().count();

        if chars == 0 {
            issues.push(QualityIssue {
                issue_type: QualityIssueType::MissingData,
                severity: QualitySeverity::Critical,
                description: "Feedback text is empty".to_string(),
                field: Some("text".to_string()),
                suggestion: None,
            });
        } else if chars < self.config.min_text_chars {
            issues.push(QualityIssue {
                issue_type: QualityIssueType::OutOfRange,
                severity: QualitySeverity::Error,
                description: format!(
                    "Text has {} characters, minimum is {}",
                    chars, self.config.min_text_chars
                ),
                field: Some("text".to_string()),
                suggestion: Some(format!("at least {} characters", self.config.min_text_chars)),
            });
        } else if chars > self.config.max_text_chars {
            let cut = text
                .char_indices()
                .nth(self.config.max_text_chars)
                .map(|(i, _)| i)
                .unwrap_or(text.len());
            text.truncate(cut);
            issues.push(QualityIssue {
                issue_type: QualityIssueType::OutOfRange,
                severity: QualitySeverity::Warning,
                description: format!(
                    "Text truncated from {} to {} characters",
                    chars, self.config.max_text_chars
                ),
                field: Some("text".to_string()),
                suggestion: None,
            });
        }

        issues
    }

    fn determine_decision(&self, issues: &[QualityIssue]) -> QualityDecision {
        match issues.iter().map(|i| i.severity).max() {
            Some(s) if s >= QualitySeverity::Error => QualityDecision::Quarantine,
            Some(QualitySeverity::Warning) => QualityDecision::AcceptWithWarnings,
            _ => QualityDecision::Accept,
        }
    }
}

impl Default for DefaultQualityGate {
    fn default() -> Self {
        Self::with_config(NormalizeConfig::default())
    }
}

impl QualityGate for DefaultQualityGate {
    fn assess(&self, mut record: NormalizedRecord) -> QualityAssessedRecord {
        let mut issues = std::mem::take(&mut record.issues);
        issues.extend(self.assess_text(&mut record));
        let decision = self.determine_decision(&issues);

        QualityAssessedRecord {
            normalized_record: record,
            quality_assessment: QualityAssessment { decision, issues },
        }
    }
}
