//! On-disk layout of the medallion layers and the CSV/NDJSON helpers every
//! stage uses to read its input and write its output.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Data-maturity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Raw,
    Bronze,
    Silver,
    Gold,
}

impl Layer {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Layer::Raw => "raw",
            Layer::Bronze => "bronze",
            Layer::Silver => "silver",
            Layer::Gold => "gold",
        }
    }
}

/// Paths of every layer artifact under a data directory
#[derive(Debug, Clone)]
pub struct LayerPaths {
    root: PathBuf,
}

impl LayerPaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn layer_dir(&self, layer: Layer) -> PathBuf {
        self.root.join(layer.dir_name())
    }

    pub fn ingest_log(&self) -> PathBuf {
        self.layer_dir(Layer::Raw).join("ingest_log.ndjson")
    }

    pub fn bronze_file(&self) -> PathBuf {
        self.layer_dir(Layer::Bronze).join("feedback.csv")
    }

    pub fn silver_file(&self) -> PathBuf {
        self.layer_dir(Layer::Silver).join("feedback.csv")
    }

    pub fn quarantine_file(&self) -> PathBuf {
        self.layer_dir(Layer::Silver).join("quarantine.ndjson")
    }

    pub fn gold_file(&self) -> PathBuf {
        self.layer_dir(Layer::Gold).join("feedback.csv")
    }
}

/// Write `contents` through a sibling temp file and rename it into place,
/// so readers never observe a half-written layer.
pub fn write_atomically<F>(path: &Path, contents: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "layer".to_string());
    let tmp_path = dir.join(format!(".{}.tmp", file_name));

    let mut writer = BufWriter::new(File::create(&tmp_path)?);
    let written = contents(&mut writer);
    let written = written.and_then(|_| writer.flush().map_err(Into::into));
    if let Err(e) = written {
        drop(writer);
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    drop(writer);
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Serialize records to a CSV file with a header row
pub fn write_csv<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    write_atomically(path, |writer| {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for record in records {
            csv_writer.serialize(record)?;
        }
        csv_writer.flush()?;
        Ok(())
    })
}

/// Like `write_csv`, but an empty batch still gets its header row.
/// `header` must list the serialized fields in order.
pub fn write_csv_with_header<T: Serialize>(path: &Path, header: &[&str], records: &[T]) -> Result<()> {
    write_atomically(path, |writer| {
        let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
        csv_writer.write_record(header)?;
        for record in records {
            csv_writer.serialize(record)?;
        }
        csv_writer.flush()?;
        Ok(())
    })
}

/// Deserialize every row of a CSV file
pub fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

/// Like `read_csv`, but a missing file reads as empty
pub fn read_csv_if_exists<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if path.exists() {
        read_csv(path)
    } else {
        Ok(Vec::new())
    }
}

/// Replace an NDJSON file with one line per record
pub fn write_ndjson<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    write_atomically(path, |writer| {
        for record in records {
            serde_json::to_writer(&mut *writer, record)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    })
}

/// Append one record as a line to an NDJSON file
pub fn append_ndjson<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(record)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

/// Read every non-blank line of an NDJSON file; a missing file reads as empty
pub fn read_ndjson<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        count: Option<u32>,
    }

    #[test]
    fn layer_paths() {
        let paths = LayerPaths::new("data");
        assert_eq!(paths.ingest_log(), PathBuf::from("data/raw/ingest_log.ndjson"));
        assert_eq!(paths.gold_file(), PathBuf::from("data/gold/feedback.csv"));
    }

    #[test]
    fn csv_round_trip_keeps_empty_options() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/rows.csv");
        let rows = vec![
            Row { name: "a".into(), count: Some(3) },
            Row { name: "b, with comma".into(), count: None },
        ];
        write_csv(&path, &rows).unwrap();
        let back: Vec<Row> = read_csv(&path).unwrap();
        assert_eq!(back, rows);
        assert!(!dir.path().join("nested/.rows.csv.tmp").exists());
    }

    #[test]
    fn feedback_header_matches_serialized_fields() {
        use crate::domain::FeedbackRecord;
        use chrono::Utc;

        let dir = tempdir().unwrap();
        let record = FeedbackRecord {
            record_id: "r1".into(),
            source_id: "s".into(),
            episode_title: Some("Ep 1".into()),
            author: None,
            text: "hello there".into(),
            published_at: None,
            like_count: Some(2),
            ingested_at: Utc::now(),
            sentiment: None,
            sentiment_score: None,
            emotion: None,
            confidence: None,
            lexicon_label: None,
            lexicon_score: None,
            model: None,
        };
        let derived = dir.path().join("derived.csv");
        write_csv(&derived, &[record.clone()]).unwrap();
        let explicit = dir.path().join("explicit.csv");
        write_csv_with_header(&explicit, &FeedbackRecord::COLUMNS, &[record.clone()]).unwrap();
        assert_eq!(fs::read_to_string(&derived).unwrap(), fs::read_to_string(&explicit).unwrap());

        let empty = dir.path().join("empty.csv");
        write_csv_with_header::<FeedbackRecord>(&empty, &FeedbackRecord::COLUMNS, &[]).unwrap();
        assert!(fs::read_to_string(&empty).unwrap().starts_with("record_id,source_id,"));
        assert!(read_csv::<FeedbackRecord>(&empty).unwrap().is_empty());
        let back: Vec<FeedbackRecord> = read_csv(&explicit).unwrap();
        assert_eq!(back, vec![record]);
    }

    #[test]
    fn ndjson_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.ndjson");
        assert!(read_ndjson::<Row>(&path).unwrap().is_empty());
        append_ndjson(&path, &Row { name: "x".into(), count: None }).unwrap();
        append_ndjson(&path, &Row { name: "y".into(), count: Some(1) }).unwrap();
        let rows: Vec<Row> = read_ndjson(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].name, "y");
    }

    #[test]
    fn failed_write_leaves_previous_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        write_csv(&path, &[Row { name: "keep".into(), count: None }]).unwrap();
        let result = write_atomically(&path, |_| {
            Err(crate::error::PipelineError::Config("boom".into()))
        });
        assert!(result.is_err());
        let back: Vec<Row> = read_csv(&path).unwrap();
        assert_eq!(back[0].name, "keep");
    }
}
