//! Report exports. Markdown renders in-process; binary formats return the
//! compiled structure for external rendering adapters.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use bankflow::Error;
use bankflow_analysis::{compile_use_case_report, export_payload, ReportFormat};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/executive-summary", post(executive_summary))
        .route("/batch", post(batch_export))
        .route("/:format/:uc_id", post(export_use_case))
}

#[derive(Deserialize)]
struct BatchRequest {
    uc_ids: Vec<String>,
    #[serde(default = "default_format")]
    format: String,
}

fn default_format() -> String {
    "markdown".to_string()
}

async fn export_use_case(
    State(state): State<AppState>,
    Path((format, uc_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let format = ReportFormat::parse(&format)?;
    if !bankflow::core::sanitize::validate_use_case_key(&uc_id) {
        return Err(ApiError(Error::validation(format!("Invalid use case ID: {uc_id}"))));
    }

    let uc_dir = state.settings.output_dir().join(&uc_id);
    let payload = tokio::task::spawn_blocking(move || -> Result<Value, Error> {
        let report = compile_use_case_report(&uc_id, &uc_dir)?;
        Ok(export_payload(&report, format))
    })
    .await
    .map_err(|e| ApiError(Error::model(format!("Export task failed: {e}"))))??;

    state.audit.record(
        "report_exported",
        &format!("{} export generated", format.as_str()),
        "info",
    );
    Ok(Json(payload))
}

/// Cross-portfolio summary assembled from every use case's summary.json.
async fn executive_summary(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let output_dir = state.settings.output_dir();
    let summary = tokio::task::spawn_blocking(move || -> Value {
        let mut use_cases = Vec::new();
        let mut quality_scores = Vec::new();
        let mut accuracies = Vec::new();

        if let Ok(entries) = std::fs::read_dir(&output_dir) {
            for entry in entries.filter_map(|e| e.ok()) {
                let dir = entry.path();
                let Ok(raw) = std::fs::read_to_string(dir.join("summary.json")) else {
                    continue;
                };
                let Ok(summary) = serde_json::from_str::<Value>(&raw) else {
                    continue;
                };
                if let Some(q) = summary["data_quality_score"].as_f64() {
                    quality_scores.push(q);
                }
                if let Ok(raw) = std::fs::read_to_string(dir.join("training_results.json")) {
                    if let Ok(training) = serde_json::from_str::<Value>(&raw) {
                        if let Some(a) = training["accuracy"].as_f64() {
                            accuracies.push(a);
                        }
                    }
                }
                use_cases.push(summary);
            }
        }

        let avg = |values: &[f64]| {
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
        };

        json!({
            "format": "executive-summary",
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "portfolio_size": use_cases.len(),
            "avg_data_quality": avg(&quality_scores),
            "avg_accuracy": avg(&accuracies),
            "use_cases": use_cases,
        })
    })
    .await
    .map_err(|e| ApiError(Error::model(format!("Summary task failed: {e}"))))?;

    Ok(Json(summary))
}

async fn batch_export(
    State(state): State<AppState>,
    Json(body): Json<BatchRequest>,
) -> ApiResult<Json<Value>> {
    let format = ReportFormat::parse(&body.format)?;
    let output_dir = state.settings.output_dir();

    let reports = tokio::task::spawn_blocking(move || -> Vec<Value> {
        body.uc_ids
            .iter()
            .map(|uc_id| {
                if !bankflow::core::sanitize::validate_use_case_key(uc_id) {
                    return json!({"uc_id": uc_id, "error": "invalid use case id"});
                }
                match compile_use_case_report(uc_id, &output_dir.join(uc_id)) {
                    Ok(report) => export_payload(&report, format),
                    Err(e) => json!({"uc_id": uc_id, "error": e.to_string()}),
                }
            })
            .collect()
    })
    .await
    .map_err(|e| ApiError(Error::model(format!("Batch export failed: {e}"))))?;

    Ok(Json(json!({"format": format.as_str(), "reports": reports})))
}
