//! Metric catalog and recording helpers for every pipeline stage.
//!
//! Names live in one enum so the recording sites and the `/metrics`
//! endpoint agree on spelling.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::fmt;
use tracing::{info, warn};

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Ingestion
    IngestPayloads,
    IngestPayloadsDeduplicated,
    IngestErrors,
    IngestPayloadBytes,
    IngestFetchDuration,

    // Parse
    ParseRecordsExtracted,
    ParseErrors,

    // Normalize
    NormalizeRecordsAccepted,
    NormalizeRecordsQuarantined,
    NormalizeRecordsDuplicated,
    NormalizeIssues,

    // Enrich
    EnrichRecords,
    EnrichRecordsReused,
    EnrichApiCalls,
    EnrichApiErrors,
    EnrichApiDuration,
    EnrichFallbacks,

    // Pipeline
    StageDuration,

    // Dashboard
    DashboardRequests,
    DashboardUploads,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::IngestPayloads => "ap_ingest_payloads_total",
            MetricName::IngestPayloadsDeduplicated => "ap_ingest_payloads_deduplicated_total",
            MetricName::IngestErrors => "ap_ingest_errors_total",
            MetricName::IngestPayloadBytes => "ap_ingest_payload_bytes",
            MetricName::IngestFetchDuration => "ap_ingest_fetch_duration_seconds",
            MetricName::ParseRecordsExtracted => "ap_parse_records_extracted_total",
            MetricName::ParseErrors => "ap_parse_errors_total",
            MetricName::NormalizeRecordsAccepted => "ap_normalize_records_accepted_total",
            MetricName::NormalizeRecordsQuarantined => "ap_normalize_records_quarantined_total",
            MetricName::NormalizeRecordsDuplicated => "ap_normalize_records_duplicated_total",
            MetricName::NormalizeIssues => "ap_normalize_issues_total",
            MetricName::EnrichRecords => "ap_enrich_records_total",
            MetricName::EnrichRecordsReused => "ap_enrich_records_reused_total",
            MetricName::EnrichApiCalls => "ap_enrich_api_calls_total",
            MetricName::EnrichApiErrors => "ap_enrich_api_errors_total",
            MetricName::EnrichApiDuration => "ap_enrich_api_duration_seconds",
            MetricName::EnrichFallbacks => "ap_enrich_fallbacks_total",
            MetricName::StageDuration => "ap_stage_duration_seconds",
            MetricName::DashboardRequests => "ap_dashboard_requests_total",
            MetricName::DashboardUploads => "ap_dashboard_uploads_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder once per process and return its handle.
pub fn init() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_try_init(|| PrometheusBuilder::new().install_recorder())
        .map(|handle| {
            info!("Metrics recorder installed");
            handle.clone()
        })
        .map_err(|e| warn!("Failed to install Prometheus recorder: {}", e))
        .ok()
}

/// Render the current metrics in Prometheus text format
pub fn render() -> String {
    HANDLE.get().map(|h| h.render()).unwrap_or_default()
}

pub mod ingest {
    use super::MetricName;

    pub fn payload_stored(source: &str, bytes: usize, duplicate: bool) {
        metrics::counter!(MetricName::IngestPayloads.as_str(), "source" => source.to_string()).increment(1);
        metrics::histogram!(MetricName::IngestPayloadBytes.as_str(), "source" => source.to_string())
            .record(bytes as f64);
        if duplicate {
            metrics::counter!(MetricName::IngestPayloadsDeduplicated.as_str(), "source" => source.to_string())
                .increment(1);
        }
    }

    pub fn fetch_duration(source: &str, secs: f64) {
        metrics::histogram!(MetricName::IngestFetchDuration.as_str(), "source" => source.to_string()).record(secs);
    }

    pub fn error(source: &str) {
        metrics::counter!(MetricName::IngestErrors.as_str(), "source" => source.to_string()).increment(1);
    }
}

pub mod parse {
    use super::MetricName;

    pub fn records_extracted(source: &str, count: usize) {
        metrics::counter!(MetricName::ParseRecordsExtracted.as_str(), "source" => source.to_string())
            .increment(count as u64);
    }

    pub fn error(source: &str) {
        metrics::counter!(MetricName::ParseErrors.as_str(), "source" => source.to_string()).increment(1);
    }
}

pub mod normalize {
    use super::MetricName;

    pub fn accepted() {
        metrics::counter!(MetricName::NormalizeRecordsAccepted.as_str()).increment(1);
    }

    pub fn quarantined() {
        metrics::counter!(MetricName::NormalizeRecordsQuarantined.as_str()).increment(1);
    }

    pub fn duplicated() {
        metrics::counter!(MetricName::NormalizeRecordsDuplicated.as_str()).increment(1);
    }

    pub fn issue_detected(issue_type: &str, severity: &str) {
        metrics::counter!(
            MetricName::NormalizeIssues.as_str(),
            "type" => issue_type.to_string(),
            "severity" => severity.to_string()
        )
        .increment(1);
    }
}

pub mod enrich {
    use super::MetricName;

    pub fn record_enriched(model: &str) {
        metrics::counter!(MetricName::EnrichRecords.as_str(), "model" => model.to_string()).increment(1);
    }

    pub fn record_reused() {
        metrics::counter!(MetricName::EnrichRecordsReused.as_str()).increment(1);
    }

    pub fn api_call(model: &str, secs: f64) {
        metrics::counter!(MetricName::EnrichApiCalls.as_str(), "model" => model.to_string()).increment(1);
        metrics::histogram!(MetricName::EnrichApiDuration.as_str(), "model" => model.to_string()).record(secs);
    }

    pub fn api_error(status: &str) {
        metrics::counter!(MetricName::EnrichApiErrors.as_str(), "status" => status.to_string()).increment(1);
    }

    pub fn fallback() {
        metrics::counter!(MetricName::EnrichFallbacks.as_str()).increment(1);
    }
}

pub mod pipeline {
    use super::MetricName;

    pub fn stage_duration(stage: &str, secs: f64) {
        metrics::histogram!(MetricName::StageDuration.as_str(), "stage" => stage.to_string()).record(secs);
    }
}

pub mod dashboard {
    use super::MetricName;

    pub fn request(route: &'static str) {
        metrics::counter!(MetricName::DashboardRequests.as_str(), "route" => route).increment(1);
    }

    pub fn upload() {
        metrics::counter!(MetricName::DashboardUploads.as_str()).increment(1);
    }
}
