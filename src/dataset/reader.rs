//! Source file reading
//!
//! The acquisition layer leaves CSV or JSON files on local storage; this module
//! turns one of them into a [`Dataset`] and fingerprints it so a run report can
//! say exactly which bytes were loaded.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::{Column, Dataset, DatasetError, DatasetResult, Value};

/// Format of a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Json,
}

impl SourceFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> DatasetResult<Self> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match extension.to_lowercase().as_str() {
            "csv" => Ok(SourceFormat::Csv),
            "json" => Ok(SourceFormat::Json),
            other => Err(DatasetError::Parse {
                path: path.to_path_buf(),
                message: format!("unsupported file extension '{}'", other),
            }),
        }
    }
}

/// A source file that has been read
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    /// Path to the file
    pub path: PathBuf,
    /// Detected format
    pub format: SourceFormat,
    /// File size in bytes
    pub size: u64,
    /// SHA-256 of the file content, hex encoded
    pub content_hash: String,
}

/// Read a CSV or JSON file into a dataset
pub fn read_source(path: &Path) -> DatasetResult<(SourceFile, Dataset)> {
    let format = SourceFormat::from_path(path)?;

    let content = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DatasetError::SourceNotFound(path.to_path_buf())
        } else {
            DatasetError::IoError(format!("Failed to read {}: {}", path.display(), e))
        }
    })?;

    let source = SourceFile {
        path: path.to_path_buf(),
        format,
        size: content.len() as u64,
        content_hash: format!("{:x}", Sha256::digest(&content)),
    };

    let dataset = match format {
        SourceFormat::Csv => parse_csv(content.as_slice()),
        SourceFormat::Json => {
            let text = std::str::from_utf8(&content).map_err(|e| DatasetError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            parse_json(text)
        }
    }
    .map_err(|e| match e {
        DatasetError::Parse { message, .. } => DatasetError::Parse {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    })?;

    tracing::info!(
        path = %path.display(),
        rows = dataset.row_count(),
        columns = dataset.column_count(),
        "Read source file"
    );

    Ok((source, dataset))
}

/// Parse CSV with a header row
///
/// Column types are inferred: a column whose non-empty cells all parse as
/// integers is an integer column, then float, otherwise text. Empty cells are
/// null. Blank header names become `unnamed_<index>`.
pub fn parse_csv<R: Read>(reader: R) -> DatasetResult<Dataset> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .enumerate()
        .map(|(i, h)| {
            if h.trim().is_empty() {
                format!("unnamed_{}", i)
            } else {
                h.to_string()
            }
        })
        .collect();

    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        for (i, field) in record.iter().enumerate() {
            let trimmed = field.trim();
            cells[i].push(if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            });
        }
    }

    let columns = headers
        .into_iter()
        .zip(cells)
        .map(|(name, raw)| Column::infer(name, infer_cells(raw)))
        .collect();

    Dataset::from_columns(columns)
}

/// Parse a JSON array of records
///
/// Columns appear in first-seen key order; a record missing a key gets a null
/// cell. Nested arrays and objects are kept as list and record cells.
pub fn parse_json(content: &str) -> DatasetResult<Dataset> {
    let parsed: serde_json::Value = serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))?;

    let serde_json::Value::Array(items) = parsed else {
        return Err(parse_error("expected a JSON array of records".to_string()));
    };

    let mut names: Vec<String> = Vec::new();
    let mut records: Vec<serde_json::Map<String, serde_json::Value>> = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let serde_json::Value::Object(map) = item else {
            return Err(parse_error(format!("record {} is not an object", index)));
        };
        for key in map.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
        records.push(map);
    }

    let columns = names
        .into_iter()
        .map(|name| {
            let values = records
                .iter_mut()
                .map(|r| r.remove(&name).map(Value::from_json).unwrap_or(Value::Null))
                .collect();
            Column::infer(name, values)
        })
        .collect();

    Dataset::from_columns(columns)
}

fn infer_cells(raw: Vec<Option<String>>) -> Vec<Value> {
    let present = || raw.iter().flatten();

    if present().all(|s| s.parse::<i64>().is_ok()) {
        return raw
            .iter()
            .map(|c| c.as_deref().and_then(|s| s.parse().ok()).map(Value::Integer).unwrap_or(Value::Null))
            .collect();
    }
    if present().all(|s| s.parse::<f64>().is_ok()) {
        return raw
            .iter()
            .map(|c| c.as_deref().and_then(|s| s.parse().ok()).map(Value::Float).unwrap_or(Value::Null))
            .collect();
    }
    raw.into_iter().map(Value::from).collect()
}

fn csv_error(e: csv::Error) -> DatasetError {
    parse_error(e.to_string())
}

fn parse_error(message: String) -> DatasetError {
    DatasetError::Parse {
        path: PathBuf::new(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ScalarType;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_parse_csv_infers_types() {
        let csv = "team,seasonStartYear,payroll,rating\nLAL,1990,\"$1,234\",1.5\nBOS,1991,$99,\n";
        let ds = parse_csv(csv.as_bytes()).unwrap();

        assert_eq!(ds.row_count(), 2);
        assert_eq!(
            ds.column_names(),
            vec!["team", "seasonStartYear", "payroll", "rating"]
        );
        assert_eq!(ds.column("seasonStartYear").unwrap().data_type(), ScalarType::Integer);
        assert_eq!(ds.column("payroll").unwrap().data_type(), ScalarType::Text);
        assert_eq!(ds.column("rating").unwrap().data_type(), ScalarType::Float);
        assert!(ds.column("rating").unwrap().values()[1].is_null());
        assert_eq!(
            ds.column("payroll").unwrap().values()[0],
            Value::Text("$1,234".to_string())
        );
    }

    #[test]
    fn test_parse_csv_names_blank_headers() {
        let csv = ",team\n0,LAL\n";
        let ds = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(ds.column_names(), vec!["unnamed_0", "team"]);
    }

    #[test]
    fn test_parse_json_records() {
        let json = r#"[
            {"id": 1, "company_name": "Acme", "tags": ["b2b", "saas"], "jobs": {"engineering": 2}},
            {"id": 2, "company_name": "Globex", "tags": [], "jobs": {"sales": 1}, "extra": true}
        ]"#;
        let ds = parse_json(json).unwrap();

        assert_eq!(
            ds.column_names(),
            vec!["id", "company_name", "tags", "jobs", "extra"]
        );
        assert_eq!(ds.column("tags").unwrap().data_type(), ScalarType::List);
        assert_eq!(ds.column("jobs").unwrap().data_type(), ScalarType::Record);
        assert!(ds.column("extra").unwrap().values()[0].is_null());
    }

    #[test]
    fn test_parse_json_rejects_non_array() {
        assert!(matches!(
            parse_json(r#"{"a": 1}"#),
            Err(DatasetError::Parse { .. })
        ));
    }

    #[test]
    fn test_read_source_fingerprints_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("payroll.csv");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "team,year").unwrap();
        writeln!(file, "LAL,1990").unwrap();

        let (source, ds) = read_source(&path).unwrap();
        assert_eq!(source.format, SourceFormat::Csv);
        assert_eq!(source.content_hash.len(), 64);
        assert_eq!(source.size, 19);
        assert_eq!(ds.row_count(), 1);
    }

    #[test]
    fn test_read_source_missing_file() {
        let dir = tempdir().unwrap();
        let err = read_source(&dir.path().join("missing.csv")).unwrap_err();
        assert!(matches!(err, DatasetError::SourceNotFound(_)));
    }
}
