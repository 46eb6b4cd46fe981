//! Generic CSV datasets for the dashboard.
//!
//! Any CSV with a comment text column can be explored, not only gold
//! files, so columns are detected by name instead of deserialized.

use std::io::Read;
use std::path::Path;

use crate::error::{PipelineError, Result};

pub const TEXT_CANDIDATES: [&str; 4] = ["text", "comment", "comment_text", "body"];
pub const SENTIMENT_CANDIDATES: [&str; 3] = ["bert_label_norm", "sentiment", "label"];
pub const EPISODE_COLUMN: &str = "episode_title";
pub const SINGLE_EPISODE: &str = "All comments";
pub const UNKNOWN_SENTIMENT: &str = "unknown";

/// One CSV row plus its resolved text, sentiment and episode
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub cells: Vec<String>,
    pub text: String,
    pub sentiment: String,
    pub episode: String,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    /// Where the rows came from, shown in the page header
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub text_column: String,
    pub sentiment_column: Option<String>,
    pub has_episodes: bool,
}

impl Dataset {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| PipelineError::Config(format!("Cannot open dataset {}: {}", path.display(), e)))?;
        Self::from_reader(file, &path.display().to_string())
    }

    pub fn from_bytes(bytes: &[u8], name: &str) -> Result<Self> {
        Self::from_reader(bytes, name)
    }

    pub fn from_reader<R: Read>(reader: R, name: &str) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let columns: Vec<String> = csv_reader.headers()?.iter().map(|h| h.trim().to_string()).collect();

        let find = |name: &str| columns.iter().position(|c| c == name);
        let text_idx = TEXT_CANDIDATES
            .iter()
            .find_map(|c| find(c))
            .ok_or_else(|| PipelineError::MissingTextColumn {
                candidates: TEXT_CANDIDATES.iter().map(|c| c.to_string()).collect(),
            })?;
        let sentiment_idx = SENTIMENT_CANDIDATES.iter().find_map(|c| find(c));
        let episode_idx = find(EPISODE_COLUMN);

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            let mut cells: Vec<String> = record.iter().map(str::to_string).collect();
            cells.resize(columns.len(), String::new());

            let text = cells[text_idx].clone();
            let sentiment = match sentiment_idx {
                Some(i) => normalize_sentiment(&cells[i]),
                None => UNKNOWN_SENTIMENT.to_string(),
            };
            let episode = match episode_idx {
                Some(i) => cells[i].clone(),
                None => SINGLE_EPISODE.to_string(),
            };
            rows.push(Row { cells, text, sentiment, episode });
        }

        Ok(Self {
            name: name.to_string(),
            text_column: columns[text_idx].clone(),
            sentiment_column: sentiment_idx.map(|i| columns[i].clone()),
            has_episodes: episode_idx.is_some(),
            columns,
            rows,
        })
    }

    pub fn has_sentiment(&self) -> bool {
        self.sentiment_column.is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn normalize_sentiment(raw: &str) -> String {
    let value = raw.trim().to_lowercase();
    if value.is_empty() {
        UNKNOWN_SENTIMENT.to_string()
    } else {
        value
    }
}
