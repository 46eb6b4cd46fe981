use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::app::ports::HttpClientPort;
use crate::config::SourceConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::ingestion::ParsePlan;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"));

/// Bytes fetched from a source, exactly as delivered
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// A place feedback can be pulled from
#[async_trait]
pub trait FeedbackSource: Send + Sync {
    fn source_id(&self) -> &str;

    /// Location as configured, placeholders unexpanded
    fn location(&self) -> &str;

    fn parse_plan(&self) -> ParsePlan;

    async fn fetch(&self) -> Result<RawPayload>;
}

/// Expand `${VAR}` placeholders from the environment.
pub fn expand_env(template: &str) -> Result<String> {
    expand_with(template, |name| std::env::var(name).ok())
}

fn expand_with<F>(template: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = None;
    let expanded = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        let name = &caps[1];
        match lookup(name) {
            Some(value) => value,
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(name) => Err(PipelineError::Config(format!(
            "Environment variable '{}' referenced by a source is not set",
            name
        ))),
        None => Ok(expanded.into_owned()),
    }
}

/// Source backed by a URL (through the HTTP port) or a local file
pub struct ConfiguredSource {
    config: SourceConfig,
    http: Arc<dyn HttpClientPort>,
}

impl ConfiguredSource {
    pub fn new(config: SourceConfig, http: Arc<dyn HttpClientPort>) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

#[async_trait]
impl FeedbackSource for ConfiguredSource {
    fn source_id(&self) -> &str {
        &self.config.id
    }

    fn location(&self) -> &str {
        &self.config.location
    }

    fn parse_plan(&self) -> ParsePlan {
        ParsePlan::from(&self.config)
    }

    #[instrument(skip(self), fields(source = %self.config.id))]
    async fn fetch(&self) -> Result<RawPayload> {
        let location = expand_env(&self.config.location)?;
        let default_type = self.config.kind.default_content_type().to_string();

        if self.config.is_remote() {
            let mut headers = BTreeMap::new();
            for (name, value) in &self.config.headers {
                headers.insert(name.clone(), expand_env(value)?);
            }
            let response = self.http.get(&location, &headers).await?;
            if !(200..300).contains(&response.status) {
                return Err(PipelineError::Api {
                    message: format!(
                        "Source '{}' responded with HTTP {}",
                        self.config.id, response.status
                    ),
                });
            }
            debug!("Fetched {} bytes", response.bytes.len());
            Ok(RawPayload {
                bytes: response.bytes,
                content_type: response.content_type.unwrap_or(default_type),
            })
        } else {
            let bytes = tokio::fs::read(&location).await.map_err(|e| {
                PipelineError::Config(format!(
                    "Failed to read source '{}' from {}: {}",
                    self.config.id, location, e
                ))
            })?;
            debug!("Read {} bytes from {}", bytes.len(), location);
            Ok(RawPayload { bytes, content_type: default_type })
        }
    }
}
