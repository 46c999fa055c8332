//! Minimal column-typed frame.
//!
//! Loaded fresh from disk for each analysis request. A column is numeric
//! when every non-empty cell parses as a float; everything else stays
//! text. XLSX uploads are accepted by the admin surface but parsed by an
//! external conversion adapter, not here.

use std::collections::HashSet;
use std::path::Path;

use bankflow::core::tabular::ColumnInfo;
use bankflow::{Error, Result};

/// One named column.
#[derive(Debug, Clone)]
pub enum Column {
    Numeric { name: String, values: Vec<Option<f64>> },
    Text { name: String, values: Vec<Option<String>> },
}

impl Column {
    pub fn name(&self) -> &str {
        match self {
            Self::Numeric { name, .. } | Self::Text { name, .. } => name,
        }
    }

    /// Non-null numeric values, empty for text columns.
    pub fn numeric_values(&self) -> Vec<f64> {
        match self {
            Self::Numeric { values, .. } => values.iter().flatten().copied().collect(),
            Self::Text { .. } => Vec::new(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Numeric { values, .. } => values.len(),
            Self::Text { values, .. } => values.len(),
        }
    }

    fn null_count(&self) -> usize {
        match self {
            Self::Numeric { values, .. } => values.iter().filter(|v| v.is_none()).count(),
            Self::Text { values, .. } => values.iter().filter(|v| v.is_none()).count(),
        }
    }

    fn unique_count(&self) -> usize {
        match self {
            Self::Numeric { values, .. } => values
                .iter()
                .flatten()
                .map(|v| v.to_bits())
                .collect::<HashSet<_>>()
                .len(),
            Self::Text { values, .. } => {
                values.iter().flatten().collect::<HashSet<_>>().len()
            }
        }
    }
}

/// A loaded tabular dataset.
#[derive(Debug, Clone)]
pub struct Frame {
    columns: Vec<Column>,
    rows: usize,
}

impl Frame {
    /// Load a file by extension (`.csv` or `.json`), reading at most
    /// `sample_limit` rows.
    pub fn load(path: &Path, sample_limit: usize) -> Result<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("csv") => Self::from_csv_path(path, sample_limit),
            Some("json") => Self::from_json_path(path, sample_limit),
            Some("xlsx") | Some("xls") => Err(Error::data(
                "Excel files are parsed by the conversion adapter; convert to CSV first",
            )),
            other => Err(Error::data(format!(
                "Unsupported dataset format: {:?}",
                other.unwrap_or("none")
            ))),
        }
    }

    /// Load a CSV file.
    pub fn from_csv_path(path: &Path, sample_limit: usize) -> Result<Self> {
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

        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        let mut rows = 0;
        for record in reader.records() {
            if rows >= sample_limit {
                break;
            }
            let record = record.map_err(|e| Error::data(format!("Malformed CSV row: {e}")))?;
            for (i, column) in cells.iter_mut().enumerate() {
                let raw = record.get(i).map(str::trim).unwrap_or("");
                column.push(if raw.is_empty() {
                    None
                } else {
                    Some(raw.to_string())
                });
            }
            rows += 1;
        }

        Ok(Self::from_string_columns(headers, cells, rows))
    }

    /// Load a JSON file holding an array of flat objects.
    pub fn from_json_path(path: &Path, sample_limit: usize) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| Error::data(format!("Invalid JSON in {}: {e}", path.display())))?;
        let Some(records) = value.as_array() else {
            return Err(Error::data("JSON dataset must be an array of objects"));
        };

        let mut headers: Vec<String> = Vec::new();
        for record in records.iter().take(sample_limit) {
            if let Some(obj) = record.as_object() {
                for key in obj.keys() {
                    if !headers.iter().any(|h| h == key) {
                        headers.push(key.clone());
                    }
                }
            }
        }

        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        let mut rows = 0;
        for record in records.iter().take(sample_limit) {
            let Some(obj) = record.as_object() else {
                continue;
            };
            for (i, header) in headers.iter().enumerate() {
                let cell = obj.get(header).and_then(|v| match v {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) if s.is_empty() => None,
                    serde_json::Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                });
                cells[i].push(cell);
            }
            rows += 1;
        }

        Ok(Self::from_string_columns(headers, cells, rows))
    }

    fn from_string_columns(
        headers: Vec<String>,
        cells: Vec<Vec<Option<String>>>,
        rows: usize,
    ) -> Self {
        let columns = headers
            .into_iter()
            .zip(cells)
            .map(|(name, raw)| {
                let all_numeric = raw
                    .iter()
                    .flatten()
                    .all(|v| v.parse::<f64>().is_ok());
                let has_values = raw.iter().any(Option::is_some);
                if all_numeric && has_values {
                    Column::Numeric {
                        name,
                        values: raw
                            .into_iter()
                            .map(|v| v.and_then(|s| s.parse().ok()))
                            .collect(),
                    }
                } else {
                    Column::Text { name, values: raw }
                }
            })
            .collect();
        Self { columns, rows }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    /// Numeric columns as (name, non-null values).
    pub fn numeric_columns(&self) -> Vec<(&str, Vec<f64>)> {
        self.columns
            .iter()
            .filter_map(|c| match c {
                Column::Numeric { name, .. } => Some((name.as_str(), c.numeric_values())),
                Column::Text { .. } => None,
            })
            .collect()
    }

    /// Text columns as (name, non-null values).
    pub fn text_columns(&self) -> Vec<(&str, Vec<&str>)> {
        self.columns
            .iter()
            .filter_map(|c| match c {
                Column::Text { name, values } => Some((
                    name.as_str(),
                    values.iter().flatten().map(String::as_str).collect(),
                )),
                Column::Numeric { .. } => None,
            })
            .collect()
    }

    /// Upload-time column profiles.
    pub fn column_infos(&self) -> Vec<ColumnInfo> {
        self.columns
            .iter()
            .map(|c| {
                let nulls = c.null_count();
                ColumnInfo {
                    name: c.name().to_string(),
                    dtype: match c {
                        Column::Numeric { .. } => "float64".to_string(),
                        Column::Text { .. } => "object".to_string(),
                    },
                    non_null: (c.len() - nulls) as i64,
                    null_count: nulls as i64,
                    unique: c.unique_count() as i64,
                }
            })
            .collect()
    }

    /// Aligned (x, y) pairs for two numeric columns, rows with a null in
    /// either dropped.
    pub fn aligned_numeric(&self, a: &str, b: &str) -> Option<(Vec<f64>, Vec<f64>)> {
        let (Column::Numeric { values: va, .. }, Column::Numeric { values: vb, .. }) =
            (self.column(a)?, self.column(b)?)
        else {
            return None;
        };
        let mut x = Vec::new();
        let mut y = Vec::new();
        for (pa, pb) in va.iter().zip(vb) {
            if let (Some(pa), Some(pb)) = (pa, pb) {
                x.push(*pa);
                y.push(*pb);
            }
        }
        Some((x, y))
    }
}
