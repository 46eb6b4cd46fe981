//! Bronze layer: turn stored payloads into flat key/value records.
//!
//! Nothing is renamed or typed here. Nested JSON is flattened with `.`
//! separators, CSV rows keep their header names, and HTML items keep the
//! field names given in the parse plan.

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::config::SourceKind;
use crate::error::{PipelineError, Result};
use crate::pipeline::ingestion::{IngestEntry, ParsePlan};
use crate::pipeline::storage;

pub const EPISODE_TITLE_FIELD: &str = "episode_title";

/// Field name to raw value, in the order the source presented them
pub type Fields = IndexMap<String, String>;

const META_COLUMNS: [&str; 5] = ["envelope_id", "source_id", "payload_ref", "record_path", "ingested_at"];

/// A flattened record extracted from one raw payload
#[derive(Debug, Clone, PartialEq)]
pub struct BronzeRecord {
    pub envelope_id: String,
    pub source_id: String,
    pub payload_ref: String,
    /// Location of the record inside its payload (`row[3]`, `/items/3`, `item[3]`)
    pub record_path: String,
    pub ingested_at: DateTime<Utc>,
    pub fields: Fields,
}

/// Parse one payload according to the plan recorded with it.
pub fn parse_payload(entry: &IngestEntry, bytes: &[u8]) -> Result<Vec<BronzeRecord>> {
    let plan = &entry.parse_plan;
    let parse_error = |message: String| PipelineError::Parse {
        source_id: entry.source_id.clone(),
        message,
    };

    let extracted = match plan.kind {
        SourceKind::Csv => parse_csv(bytes).map_err(|e| parse_error(e.to_string()))?,
        SourceKind::Json => parse_json(bytes, plan.records_pointer.as_deref()).map_err(parse_error)?,
        SourceKind::Html => parse_html(bytes, plan).map_err(parse_error)?,
    };

    Ok(extracted
        .into_iter()
        .map(|(record_path, mut fields)| {
            if let Some(episode) = &plan.episode_title {
                fields
                    .entry(EPISODE_TITLE_FIELD.to_string())
                    .or_insert_with(|| episode.clone());
            }
            BronzeRecord {
                envelope_id: entry.envelope_id.clone(),
                source_id: entry.source_id.clone(),
                payload_ref: entry.payload_ref.clone(),
                record_path,
                ingested_at: entry.ingested_at,
                fields,
            }
        })
        .collect())
}

type Extracted = Vec<(String, Fields)>;

fn parse_csv(bytes: &[u8]) -> csv::Result<Extracted> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
    let headers = reader.headers()?.clone();
    let mut records = Vec::new();
    for (i, row) in reader.records().enumerate() {
        let row = row?;
        let fields = headers
            .iter()
            .zip(row.iter())
            .filter(|(name, value)| !name.trim().is_empty() && !value.is_empty())
            .map(|(name, value)| (name.trim().to_string(), value.to_string()))
            .collect();
        records.push((format!("row[{}]", i), fields));
    }
    Ok(records)
}

fn parse_json(bytes: &[u8], records_pointer: Option<&str>) -> std::result::Result<Extracted, String> {
    let document: Value = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    let pointer = records_pointer.unwrap_or("");
    let target = document
        .pointer(pointer)
        .ok_or_else(|| format!("records_pointer '{}' does not match the document", pointer))?;

    match target {
        Value::Array(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(i, item)| (format!("{}/{}", pointer, i), flatten_json(item)))
            .collect()),
        Value::Object(_) => Ok(vec![(pointer.to_string(), flatten_json(target))]),
        other => Err(format!("records_pointer '{}' points at a scalar: {}", pointer, other)),
    }
}

/// Flatten nested objects and arrays into dotted keys; nulls are dropped.
pub fn flatten_json(value: &Value) -> Fields {
    let mut out = Fields::new();
    flatten_into(value, "", &mut out);
    out
}

fn flatten_into(value: &Value, prefix: &str, out: &mut Fields) {
    let key_for = |segment: &str| {
        if prefix.is_empty() {
            segment.to_string()
        } else {
            format!("{}.{}", prefix, segment)
        }
    };
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (k, v) in map {
                flatten_into(v, &key_for(k), out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_into(v, &key_for(&i.to_string()), out);
            }
        }
        Value::String(s) => {
            out.insert(prefix_or_value(prefix), s.clone());
        }
        Value::Bool(b) => {
            out.insert(prefix_or_value(prefix), b.to_string());
        }
        Value::Number(n) => {
            out.insert(prefix_or_value(prefix), n.to_string());
        }
    }
}

fn prefix_or_value(prefix: &str) -> String {
    if prefix.is_empty() {
        "value".to_string()
    } else {
        prefix.to_string()
    }
}

fn parse_html(bytes: &[u8], plan: &ParsePlan) -> std::result::Result<Extracted, String> {
    let item_selector_src = plan
        .item_selector
        .as_deref()
        .ok_or_else(|| "html parse plan has no item_selector".to_string())?;
    let item_selector = parse_selector(item_selector_src)?;

    let mut field_selectors = Vec::new();
    for (name, field_src) in &plan.fields {
        let (css, attr) = match field_src.rsplit_once('@') {
            Some((css, attr)) => (css.trim(), Some(attr.trim().to_string())),
            None => (field_src.trim(), None),
        };
        let selector = if css.is_empty() || css == "." {
            None
        } else {
            Some(parse_selector(css)?)
        };
        field_selectors.push((name.clone(), selector, attr));
    }

    let html = String::from_utf8_lossy(bytes);
    let document = Html::parse_document(&html);
    let mut records = Vec::new();
    for (i, item) in document.select(&item_selector).enumerate() {
        let mut fields = Fields::new();
        for (name, selector, attr) in &field_selectors {
            let element = match selector {
                Some(sel) => item.select(sel).next(),
                None => Some(item),
            };
            let value = element.and_then(|el| match attr {
                Some(attr) => el.value().attr(attr).map(|v| v.trim().to_string()),
                None => Some(element_text(&el)),
            });
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                fields.insert(name.clone(), value);
            }
        }
        records.push((format!("item[{}]", i), fields));
    }
    Ok(records)
}

fn parse_selector(css: &str) -> std::result::Result<Selector, String> {
    Selector::parse(css).map_err(|e| format!("invalid CSS selector '{}': {:?}", css, e))
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Write bronze records as one wide CSV: metadata columns, then the union
/// of field keys in first-seen order.
pub fn write_bronze(path: &Path, records: &[BronzeRecord]) -> Result<()> {
    let columns: IndexSet<&String> = records
        .iter()
        .flat_map(|r| r.fields.keys())
        .filter(|key| !META_COLUMNS.contains(&key.as_str()))
        .collect();

    storage::write_atomically(path, |writer: &mut BufWriter<File>| {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(META_COLUMNS.iter().copied().chain(columns.iter().map(|c| c.as_str())))?;
        for record in records {
            let ingested_at = record.ingested_at.to_rfc3339();
            let meta = [
                record.envelope_id.as_str(),
                record.source_id.as_str(),
                record.payload_ref.as_str(),
                record.record_path.as_str(),
                ingested_at.as_str(),
            ];
            let values = columns
                .iter()
                .map(|c| record.fields.get(*c).map(String::as_str).unwrap_or(""));
            csv_writer.write_record(meta.into_iter().chain(values))?;
        }
        csv_writer.flush()?;
        Ok(())
    })
}

/// Read the bronze CSV back; empty cells are treated as absent fields.
pub fn read_bronze(path: &Path) -> Result<Vec<BronzeRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let mut meta: BTreeMap<&str, String> = BTreeMap::new();
        let mut fields = Fields::new();
        for (name, value) in headers.iter().zip(row.iter()) {
            if META_COLUMNS.contains(&name) {
                meta.insert(name, value.to_string());
            } else if !value.is_empty() {
                fields.insert(name.to_string(), value.to_string());
            }
        }
        let ingested_raw = take_meta(&mut meta, "ingested_at")?;
        let ingested_at = DateTime::parse_from_rfc3339(&ingested_raw)
            .map_err(|e| PipelineError::MissingField(format!("bronze ingested_at '{}': {}", ingested_raw, e)))?
            .with_timezone(&Utc);
        records.push(BronzeRecord {
            envelope_id: take_meta(&mut meta, "envelope_id")?,
            source_id: take_meta(&mut meta, "source_id")?,
            payload_ref: take_meta(&mut meta, "payload_ref")?,
            record_path: take_meta(&mut meta, "record_path")?,
            ingested_at,
            fields,
        });
    }
    Ok(records)
}

fn take_meta(meta: &mut BTreeMap<&str, String>, key: &str) -> Result<String> {
    meta.remove(key)
        .ok_or_else(|| PipelineError::MissingField(format!("bronze column '{}'", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(kind: SourceKind) -> IngestEntry {
        IngestEntry {
            envelope_id: "env-1".into(),
            source_id: "demo".into(),
            location: "demo".into(),
            payload_ref: "cas:sha256:00".into(),
            content_type: kind.default_content_type().into(),
            bytes: 0,
            ingested_at: Utc::now(),
            duplicate: false,
            parse_plan: ParsePlan {
                kind,
                records_pointer: None,
                item_selector: None,
                fields: IndexMap::new(),
                episode_title: None,
            },
        }
    }

    #[test]
    fn flattens_nested_json() {
        let flat = flatten_json(&json!({
            "id": "c1",
            "snippet": {"textDisplay": "Loved it", "likeCount": 4, "author": null},
            "tags": ["a", "b"],
            "pinned": false
        }));
        assert_eq!(flat["id"], "c1");
        assert_eq!(flat["snippet.textDisplay"], "Loved it");
        assert_eq!(flat["snippet.likeCount"], "4");
        assert_eq!(flat["tags.1"], "b");
        assert_eq!(flat["pinned"], "false");
        assert!(!flat.contains_key("snippet.author"));
    }

    #[test]
    fn parses_json_with_pointer() {
        let mut e = entry(SourceKind::Json);
        e.parse_plan.records_pointer = Some("/items".into());
        e.parse_plan.episode_title = Some("Ep 1".into());
        let body = json!({"items": [{"text": "a"}, {"text": "b", "episode_title": "Ep 2"}]});
        let records = parse_payload(&e, body.to_string().as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].record_path, "/items/1");
        assert_eq!(records[0].fields[EPISODE_TITLE_FIELD], "Ep 1");
        assert_eq!(records[1].fields[EPISODE_TITLE_FIELD], "Ep 2");
    }

    #[test]
    fn bad_pointer_is_a_parse_error() {
        let mut e = entry(SourceKind::Json);
        e.parse_plan.records_pointer = Some("/missing".into());
        let err = parse_payload(&e, b"{\"items\": []}").unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn parses_csv_rows() {
        let e = entry(SourceKind::Csv);
        let body = "author,Comment Text,likes\nann,\"Great, episode\",3\nbob,,\n";
        let records = parse_payload(&e, body.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fields["Comment Text"], "Great, episode");
        assert_eq!(records[0].record_path, "row[0]");
        assert!(!records[1].fields.contains_key("likes"));
    }

    #[test]
    fn parses_html_items() {
        let mut e = entry(SourceKind::Html);
        e.parse_plan.item_selector = Some("div.comment".into());
        e.parse_plan.fields = IndexMap::from([
            ("text".to_string(), "p.body".to_string()),
            ("author".to_string(), "span.author".to_string()),
            ("published_at".to_string(), "time@datetime".to_string()),
            ("id".to_string(), ".@data-id".to_string()),
        ]);
        let html = r#"
            <div class="comment" data-id="7">
              <span class="author">Ann</span>
              <time datetime="2024-03-01T10:00:00Z">March 1</time>
              <p class="body">Loved   the
                 guest!</p>
            </div>
            <div class="comment"><p class="body">Too long</p></div>
        "#;
        let records = parse_payload(&e, html.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fields["text"], "Loved the guest!");
        assert_eq!(records[0].fields["author"], "Ann");
        assert_eq!(records[0].fields["published_at"], "2024-03-01T10:00:00Z");
        assert_eq!(records[0].fields["id"], "7");
        assert!(!records[1].fields.contains_key("author"));
        let names: Vec<_> = records[0].fields.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["text", "author", "published_at", "id"]);
    }

    #[test]
    fn fields_keep_source_order() {
        let e = entry(SourceKind::Json);
        let records = parse_payload(&e, br#"{"zeta": "z", "alpha": {"y": 1, "b": 2}, "mid": "m"}"#).unwrap();
        let names: Vec<_> = records[0].fields.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["zeta", "alpha.y", "alpha.b", "mid"]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bronze.csv");
        let mut csv_entry = entry(SourceKind::Csv);
        csv_entry.parse_plan.episode_title = Some("Ep 1".into());
        let mut records = parse_payload(&csv_entry, b"text,author\nhi,ann\n").unwrap();
        records.extend(parse_payload(&csv_entry, b"likes,text\n3,yo\n").unwrap());
        write_bronze(&path, &records).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let header = written.lines().next().unwrap();
        assert!(header.ends_with(",ingested_at,text,author,episode_title,likes"));
    }

    #[test]
    fn bronze_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bronze.csv");
        let e = entry(SourceKind::Csv);
        let records = parse_payload(&e, b"b,a\n1,2\n,3\n").unwrap();
        write_bronze(&path, &records).unwrap();

        let header = std::fs::read_to_string(&path).unwrap();
        assert!(header.starts_with("envelope_id,source_id,payload_ref,record_path,ingested_at,b,a\n"));

        let back = read_bronze(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].fields, records[0].fields);
        assert_eq!(back[1].fields.get("b"), None);
        assert_eq!(back[1].record_path, "row[1]");
    }
}
