use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Strategy for handling errors during pipeline execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandlingStrategy {
    /// Record the failure, skip the item and keep going
    #[default]
    Continue,
    /// Abort the stage on the first failure
    Stop,
}

impl ErrorHandlingStrategy {
    pub fn should_stop(&self) -> bool {
        matches!(self, ErrorHandlingStrategy::Stop)
    }
}

/// One step of the medallion pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingest,
    Parse,
    Normalize,
    Enrich,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Ingest, Stage::Parse, Stage::Normalize, Stage::Enrich];

    pub fn step_name(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Parse => "parse",
            Stage::Normalize => "normalize",
            Stage::Enrich => "enrich",
        }
    }

    /// The stage whose output this stage reads from disk
    pub fn dependency(&self) -> Option<Stage> {
        match self {
            Stage::Ingest => None,
            Stage::Parse => Some(Stage::Ingest),
            Stage::Normalize => Some(Stage::Parse),
            Stage::Enrich => Some(Stage::Normalize),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.step_name())
    }
}

/// Check that every stage in a plan appears after the stage it reads from.
///
/// A plan may start in the middle of the pipeline (its first stage reads an
/// existing layer from disk), but it may not skip or reorder stages.
pub fn validate_plan(stages: &[Stage]) -> Result<()> {
    if stages.is_empty() {
        return Err(anyhow::anyhow!("Pipeline must have at least one stage"));
    }
    for pair in stages.windows(2) {
        if pair[1].dependency() != Some(pair[0]) {
            return Err(anyhow::anyhow!(
                "Stage '{}' cannot follow '{}'",
                pair[1],
                pair[0]
            ));
        }
    }
    Ok(())
}
