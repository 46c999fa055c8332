//! Report compiler.
//!
//! Merges the per-use-case artifact JSONs into one structure and hands it
//! to an output adapter. Missing artifacts are tolerated: the compiler
//! emits the sections it can build. Markdown rendering happens in-process;
//! binary formats (PDF, XLSX, DOCX, PPTX) consume the compiled structure
//! through external adapters.

use std::path::Path;

use bankflow::{Error, Result};
use serde::Serialize;
use serde_json::{json, Value};

/// Artifact files read, in order.
const ARTIFACTS: &[(&str, &str)] = &[
    ("summary", "summary.json"),
    ("full_report", "full_report.json"),
    ("column_profiles", "column_profiles.json"),
    ("feature_engineering", "feature_engineering.json"),
    ("outliers", "outliers.json"),
    ("target_distribution", "target_distribution.json"),
    ("correlations", "correlations.json"),
    ("training_results", "training_results.json"),
];

/// Output adapter formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Pdf,
    Excel,
    Word,
    Markdown,
    Pptx,
}

impl ReportFormat {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "excel" | "xlsx" => Ok(Self::Excel),
            "word" | "docx" => Ok(Self::Word),
            "markdown" | "md" => Ok(Self::Markdown),
            "pptx" => Ok(Self::Pptx),
            other => Err(Error::validation(format!("Unknown export format: '{other}'"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Excel => "excel",
            Self::Word => "word",
            Self::Markdown => "markdown",
            Self::Pptx => "pptx",
        }
    }
}

/// Compiled per-use-case report.
#[derive(Debug, Clone, Serialize)]
pub struct UseCaseReport {
    pub use_case_key: String,
    pub generated_at: String,
    /// Artifact sections present on disk, keyed by section name.
    pub sections: Value,
    /// Section names that were missing.
    pub missing: Vec<String>,
}

/// Read every artifact the directory has and merge into one structure.
pub fn compile_use_case_report(use_case_key: &str, uc_dir: &Path) -> Result<UseCaseReport> {
    if !uc_dir.is_dir() {
        return Err(Error::not_found(format!(
            "No preprocessing output for use case '{use_case_key}'"
        )));
    }

    let mut sections = serde_json::Map::new();
    let mut missing = Vec::new();
    for (section, file) in ARTIFACTS {
        let path = uc_dir.join(file);
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(value) => {
                    sections.insert((*section).to_string(), value);
                }
                Err(e) => {
                    tracing::warn!(file, error = %e, "Skipping unreadable report artifact");
                    missing.push((*section).to_string());
                }
            },
            Err(_) => missing.push((*section).to_string()),
        }
    }

    Ok(UseCaseReport {
        use_case_key: use_case_key.to_string(),
        generated_at: chrono::Utc::now().to_rfc3339(),
        sections: Value::Object(sections),
        missing,
    })
}

/// Markdown adapter.
pub fn render_markdown(report: &UseCaseReport) -> String {
    let mut out = String::new();
    let summary = &report.sections["summary"];

    let label = summary["label"]
        .as_str()
        .unwrap_or(&report.use_case_key)
        .to_string();
    out.push_str(&format!("# {label}\n\n"));
    out.push_str(&format!(
        "Use case: `{}`  \nGenerated: {}\n\n",
        report.use_case_key, report.generated_at
    ));

    if summary.is_object() {
        out.push_str("## Data Summary\n\n");
        for (key, title) in [
            ("data_quality_score", "Data quality score"),
            ("total_rows", "Rows"),
            ("total_columns", "Columns"),
            ("target_column", "Target column"),
            ("class_imbalance_ratio", "Class imbalance ratio"),
        ] {
            if let Some(v) = summary.get(key) {
                if !v.is_null() {
                    out.push_str(&format!("- **{title}**: {v}\n"));
                }
            }
        }
        out.push('\n');
    }

    if let Some(training) = report.sections.get("training_results") {
        if training.is_object() {
            out.push_str("## Model Performance\n\n| Metric | Value |\n|---|---|\n");
            for (key, title) in [
                ("best_model", "Best model"),
                ("accuracy", "Accuracy"),
                ("precision", "Precision"),
                ("recall", "Recall"),
                ("f1", "F1"),
                ("auc_roc", "ROC-AUC"),
            ] {
                if let Some(v) = training.get(key) {
                    if !v.is_null() {
                        out.push_str(&format!("| {title} | {v} |\n"));
                    }
                }
            }
            out.push('\n');
        }
    }

    if let Some(profiles) = report.sections.get("column_profiles").and_then(Value::as_array) {
        out.push_str("## Column Profiles\n\n| Column | Type | Non-null | Nulls | Unique |\n|---|---|---|---|---|\n");
        for p in profiles.iter().take(40) {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                p["name"].as_str().unwrap_or("?"),
                p["dtype"].as_str().unwrap_or("?"),
                p["non_null"],
                p["null_count"],
                p["unique"],
            ));
        }
        out.push('\n');
    }

    if let Some(fe) = report.sections.get("feature_engineering") {
        if let Some(suggestions) = fe.get("suggestions").and_then(Value::as_array) {
            out.push_str("## Feature Engineering Suggestions\n\n");
            for s in suggestions.iter().take(15) {
                out.push_str(&format!(
                    "- `{}` ({}): {}\n",
                    s["feature"].as_str().unwrap_or("?"),
                    s["kind"].as_str().unwrap_or("?"),
                    s["reason"].as_str().unwrap_or(""),
                ));
            }
            out.push('\n');
        }
    }

    if !report.missing.is_empty() {
        out.push_str(&format!(
            "---\n\n*Sections unavailable: {}*\n",
            report.missing.join(", ")
        ));
    }

    out
}

/// Build the payload an export endpoint returns: the compiled structure,
/// plus rendered content for the formats handled in-process.
pub fn export_payload(report: &UseCaseReport, format: ReportFormat) -> Value {
    match format {
        ReportFormat::Markdown => json!({
            "format": "markdown",
            "use_case_key": report.use_case_key,
            "content": render_markdown(report),
        }),
        other => json!({
            "format": other.as_str(),
            "use_case_key": report.use_case_key,
            // Binary rendering is an adapter concern; the structure is the contract.
            "report": report,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn seed_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("summary.json"),
            r#"{"label": "Fraud Management", "data_quality_score": 91.2, "total_rows": 1000, "total_columns": 12, "target_column": "is_fraud"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("training_results.json"),
            r#"{"best_model": "random_forest", "accuracy": 0.94, "f1": 0.91}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("column_profiles.json"),
            r#"[{"name": "amount", "dtype": "float64", "non_null": 990, "null_count": 10, "unique": 800}]"#,
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_compile_tolerates_missing_sections() {
        let dir = seed_dir();
        let report = compile_use_case_report("uc_fr_01", dir.path()).unwrap();
        assert!(report.sections.get("summary").is_some());
        assert!(report.missing.contains(&"outliers".to_string()));
        assert!(report.missing.contains(&"correlations".to_string()));
    }

    #[test]
    fn test_compile_missing_dir_is_not_found() {
        let err = compile_use_case_report("uc_x", Path::new("/nonexistent/uc_x")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_markdown_rendering() {
        let dir = seed_dir();
        let report = compile_use_case_report("uc_fr_01", dir.path()).unwrap();
        let md = render_markdown(&report);
        assert!(md.starts_with("# Fraud Management"));
        assert!(md.contains("| Accuracy | 0.94 |"));
        assert!(md.contains("| amount | float64 |"));
        assert!(md.contains("Sections unavailable"));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(ReportFormat::parse("PDF").unwrap(), ReportFormat::Pdf);
        assert_eq!(ReportFormat::parse("md").unwrap(), ReportFormat::Markdown);
        assert!(ReportFormat::parse("csv").is_err());
    }

    #[test]
    fn test_export_payload_shapes() {
        let dir = seed_dir();
        let report = compile_use_case_report("uc_fr_01", dir.path()).unwrap();

        let md = export_payload(&report, ReportFormat::Markdown);
        assert!(md["content"].as_str().unwrap().contains("Fraud Management"));

        let pdf = export_payload(&report, ReportFormat::Pdf);
        assert_eq!(pdf["format"], "pdf");
        assert!(pdf["report"]["sections"]["summary"].is_object());
    }
}
