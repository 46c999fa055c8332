//! File-type dispatch: CSV rows, flattened JSON, or plain text.

use std::path::Path;

use bankflow::{Chunk, Error, Result};
use serde_json::Value;

use crate::Chunker;

/// File kinds the chunker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Json,
    Text,
}

/// Classify a path by extension. Unknown extensions take the text path.
pub fn detect_file_kind(path: &Path) -> FileKind {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("csv") => FileKind::Csv,
        Some("json") => FileKind::Json,
        _ => FileKind::Text,
    }
}

pub(crate) fn chunk_file(chunker: &Chunker, path: &Path) -> Result<Vec<Chunk>> {
    let source = path.to_string_lossy().to_string();
    match detect_file_kind(path) {
        FileKind::Csv => chunk_csv(chunker, path, &source),
        FileKind::Json => chunk_json(chunker, path, &source),
        FileKind::Text => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| Error::data(format!("Failed to read {}: {e}", path.display())))?;
            Ok(chunker
                .chunk_text(&text, &source)
                .into_iter()
                .map(|c| c.with_metadata("file_type", "text"))
                .collect())
        }
    }
}

/// One chunk per row, columns rendered as `"col: val | col: val"`.
fn chunk_csv(chunker: &Chunker, path: &Path, source: &str) -> Result<Vec<Chunk>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::data(format!("Failed to open CSV {}: {e}", path.display())))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| Error::data(format!("Failed to read CSV headers: {e}")))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut chunks = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| Error::data(format!("Malformed CSV row {row_idx}: {e}")))?;
        let rendered: Vec<String> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| format!("{h}: {}", v.trim()))
            .collect();
        let text = rendered.join(" | ");
        if text.trim().is_empty() {
            continue;
        }
        let count = chunker.tokens().count(&text);
        let chunk = Chunk::new(source, chunks.len(), text, count)
            .with_metadata("file_type", "csv")
            .with_metadata("row", row_idx as i64);
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// Flatten nested keys with `_`, render as `key: value` lines, greedy-pack.
fn chunk_json(chunker: &Chunker, path: &Path, source: &str) -> Result<Vec<Chunk>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::data(format!("Failed to read {}: {e}", path.display())))?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|e| Error::data(format!("Invalid JSON in {}: {e}", path.display())))?;

    let mut lines = Vec::new();
    flatten(&value, String::new(), &mut lines);
    Ok(chunker.pack_lines(&lines, source, "json"))
}

fn flatten(value: &Value, prefix: String, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                let next = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}_{key}")
                };
                flatten(v, next, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                let next = if prefix.is_empty() {
                    i.to_string()
                } else {
                    format!("{prefix}_{i}")
                };
                flatten(v, next, out);
            }
        }
        Value::Null => out.push(format!("{prefix}: null")),
        Value::Bool(b) => out.push(format!("{prefix}: {b}")),
        Value::Number(n) => out.push(format!("{prefix}: {n}")),
        Value::String(s) => out.push(format!("{prefix}: {s}")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ChunkStrategy;
    use std::io::Write;

    fn chunker() -> Chunker {
        Chunker::new(ChunkStrategy::Fixed, 128, 16)
    }

    #[test]
    fn test_detect_file_kind() {
        assert_eq!(detect_file_kind(Path::new("a.CSV")), FileKind::Csv);
        assert_eq!(detect_file_kind(Path::new("a.json")), FileKind::Json);
        assert_eq!(detect_file_kind(Path::new("a.md")), FileKind::Text);
        assert_eq!(detect_file_kind(Path::new("noext")), FileKind::Text);
    }

    #[test]
    fn test_csv_rows_become_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("txns.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "account,amount,status").unwrap();
        writeln!(f, "1001,250.00,cleared").unwrap();
        writeln!(f, "1002,75.50,flagged").unwrap();

        let chunks = chunker().chunk_file(&path).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "account: 1001 | amount: 250.00 | status: cleared");
        assert_eq!(
            chunks[1].metadata.get("row").and_then(serde_json::Value::as_i64),
            Some(1)
        );
        assert_eq!(
            chunks[0].metadata.get("file_type").and_then(serde_json::Value::as_str),
            Some("csv")
        );
    }

    #[test]
    fn test_json_flattening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        std::fs::write(
            &path,
            r#"{"model": {"name": "rf", "metrics": {"f1": 0.91}}, "tags": ["a", "b"]}"#,
        )
        .unwrap();

        let chunks = chunker().chunk_file(&path).unwrap();
        assert_eq!(chunks.len(), 1);
        let text = &chunks[0].text;
        assert!(text.contains("model_name: rf"));
        assert!(text.contains("model_metrics_f1: 0.91"));
        assert!(text.contains("tags_0: a"));
    }

    #[test]
    fn test_invalid_json_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = chunker().chunk_file(&path).unwrap_err();
        assert!(matches!(err, bankflow::Error::Data(_)));
    }

    #[test]
    fn test_text_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "Fraud rules. Escalation paths. Review cadence.").unwrap();
        let chunks = chunker().chunk_file(&path).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].metadata.get("file_type").and_then(serde_json::Value::as_str),
            Some("text")
        );
    }
}
