use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::pipeline::pipeline_config::ErrorHandlingStrategy;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const CONFIG_PATH_ENV: &str = "AUDIENCE_PULSE_CONFIG";
/// Upper bound for `normalize.max_future_skew_hours` (ten years)
pub const MAX_FUTURE_SKEW_HOURS: i64 = 24 * 366 * 10;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub pipeline: PipelineSettings,
    pub sources: Vec<SourceConfig>,
    pub normalize: NormalizeConfig,
    pub enrich: EnrichConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("data") }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub on_error: ErrorHandlingStrategy,
    /// Budget for HTTP fetches across all remote sources
    pub fetch_requests_per_min: Option<u64>,
    pub fetch_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            on_error: ErrorHandlingStrategy::Continue,
            fetch_requests_per_min: Some(30),
            fetch_timeout_secs: 30,
        }
    }
}

/// Payload format of a feedback source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Csv,
    Json,
    Html,
}

impl SourceKind {
    pub fn default_content_type(&self) -> &'static str {
        match self {
            SourceKind::Csv => "text/csv",
            SourceKind::Json => "application/json",
            SourceKind::Html => "text/html",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub kind: SourceKind,
    /// URL or local path; may contain `${VAR}` placeholders
    pub location: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Applied to records that do not carry their own episode title
    pub episode_title: Option<String>,
    /// JSON pointer to the array of records (json sources)
    pub records_pointer: Option<String>,
    /// CSS selector matching one record (html sources)
    pub item_selector: Option<String>,
    /// Field name to CSS selector, evaluated inside each item (html sources);
    /// bronze columns follow this order
    #[serde(default)]
    pub fields: IndexMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl SourceConfig {
    pub fn is_remote(&self) -> bool {
        self.location.starts_with("http://") || self.location.starts_with("https://")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub min_text_chars: usize,
    pub max_text_chars: usize,
    pub max_future_skew_hours: i64,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 2,
            max_text_chars: 5000,
            max_future_skew_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichProvider {
    Lexicon,
    Llm,
}

impl std::str::FromStr for EnrichProvider {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lexicon" => Ok(EnrichProvider::Lexicon),
            "llm" | "openai" => Ok(EnrichProvider::Llm),
            other => Err(PipelineError::Config(format!("Unknown enrich provider '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub provider: EnrichProvider,
    pub model: String,
    pub endpoint: String,
    pub api_key_env: String,
    pub requests_per_min: Option<u64>,
    pub tokens_per_min: Option<u64>,
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub timeout_secs: u64,
    pub reuse_existing: bool,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            provider: EnrichProvider::Lexicon,
            model: "gpt-4o-mini".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            requests_per_min: Some(60),
            tokens_per_min: None,
            concurrency: 4,
            max_retries: 3,
            backoff_base_ms: 500,
            timeout_secs: 30,
            reuse_existing: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub bind: String,
    /// Dataset served when none is given on the command line; defaults to the gold layer
    pub dataset: Option<PathBuf>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8501".to_string(),
            dataset: None,
        }
    }
}

impl Config {
    /// Load configuration from `path`, `$AUDIENCE_PULSE_CONFIG`, or `config.toml`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var(CONFIG_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };

        if !config_path.exists() {
            if path.is_some() {
                return Err(PipelineError::Config(format!(
                    "Config file '{}' does not exist",
                    config_path.display()
                )));
            }
            warn!("No config file at {}, using defaults", config_path.display());
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(&config_path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        Self::from_toml_str(&config_content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for source in self.sources.iter().filter(|s| s.enabled) {
            if source.id.trim().is_empty() {
                return Err(PipelineError::Config("Source id must not be empty".to_string()));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(PipelineError::Config(format!("Duplicate source id '{}'", source.id)));
            }
            if source.kind == SourceKind::Html {
                if source.item_selector.is_none() {
                    return Err(PipelineError::Config(format!(
                        "HTML source '{}' needs an item_selector",
                        source.id
                    )));
                }
                if !source.fields.contains_key("text") {
                    return Err(PipelineError::Config(format!(
                        "HTML source '{}' needs a 'text' field selector",
                        source.id
                    )));
                }
            }
        }
        if self.enrich.concurrency == 0 {
            return Err(PipelineError::Config("enrich.concurrency must be at least 1".to_string()));
        }
        if !(0..=MAX_FUTURE_SKEW_HOURS).contains(&self.normalize.max_future_skew_hours) {
            return Err(PipelineError::Config(format!(
                "normalize.max_future_skew_hours must be between 0 and {}",
                MAX_FUTURE_SKEW_HOURS
            )));
        }
        if self.normalize.min_text_chars > self.normalize.max_text_chars {
            return Err(PipelineError::Config(
                "normalize.min_text_chars must not exceed max_text_chars".to_string(),
            ));
        }
        Ok(())
    }

    /// Dataset the dashboard opens by default
    pub fn dashboard_dataset(&self) -> PathBuf {
        self.dashboard
            .dataset
            .clone()
            .unwrap_or_else(|| crate::pipeline::storage::LayerPaths::new(&self.storage.data_dir).gold_file())
    }
}
