use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Failed to parse payload from {source_id}: {message}")]
    Parse { source_id: String, message: String },

    #[error("API error: {message}")]
    Api { message: String },

    #[error("Enrichment failed: {0}")]
    Enrichment(String),

    #[error("No comment text column found; expected one of: {}", candidates.join(", "))]
    MissingTextColumn { candidates: Vec<String> },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
