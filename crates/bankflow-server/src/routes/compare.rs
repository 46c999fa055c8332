//! Cross-portfolio comparison endpoints.

use std::path::Path as FsPath;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use bankflow::Error;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/portfolio", get(portfolio))
        .route("/side-by-side", post(side_by_side))
        .route("/department-summary", get(department_summary))
        .route("/business-case/:uc_id", get(business_case))
}

fn load_json(path: &FsPath) -> Option<Value> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
}

fn portfolio_entry(dir: &FsPath, uc_id: &str) -> Option<Value> {
    let summary = load_json(&dir.join("summary.json"))?;
    let training = load_json(&dir.join("training_results.json")).unwrap_or(Value::Null);
    let quality = summary["data_quality_score"].as_f64().unwrap_or(0.0);
    let accuracy = training["accuracy"].as_f64();
    // Composite readiness: data quality and model strength, equally
    // weighted when a model exists.
    let readiness = match accuracy {
        Some(accuracy) => quality / 100.0 * 0.5 + accuracy * 0.5,
        None => quality / 100.0 * 0.5,
    };
    Some(json!({
        "uc_id": uc_id,
        "label": summary["label"],
        "category": summary["category"],
        "domain": summary["domain"],
        "data_quality_score": quality,
        "accuracy": accuracy,
        "f1": training["f1"].as_f64().or_else(|| training["f1_score"].as_f64()),
        "readiness": readiness,
        "total_rows": summary["total_rows"],
    }))
}

fn all_entries(output_dir: &FsPath) -> Vec<Value> {
    let Ok(entries) = std::fs::read_dir(output_dir) else {
        return Vec::new();
    };
    let mut out: Vec<Value> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let uc_id = e.file_name().to_string_lossy().to_string();
            portfolio_entry(&e.path(), &uc_id)
        })
        .collect();
    out.sort_by(|a, b| {
        b["readiness"]
            .as_f64()
            .partial_cmp(&a["readiness"].as_f64())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    out
}

async fn portfolio(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let output_dir = state.settings.output_dir();
    let entries = tokio::task::spawn_blocking(move || all_entries(&output_dir))
        .await
        .map_err(|e| ApiError(Error::model(format!("Portfolio scan failed: {e}"))))?;
    let count = entries.len();
    Ok(Json(json!({"portfolio": entries, "count": count})))
}

#[derive(Deserialize)]
struct SideBySideRequest {
    uc_ids: Vec<String>,
}

async fn side_by_side(
    State(state): State<AppState>,
    Json(body): Json<SideBySideRequest>,
) -> ApiResult<Json<Value>> {
    if body.uc_ids.len() < 2 {
        return Err(ApiError(Error::validation(
            "side-by-side comparison needs at least two use case ids",
        )));
    }
    let output_dir = state.settings.output_dir();
    let entries = tokio::task::spawn_blocking(move || -> Vec<Value> {
        body.uc_ids
            .iter()
            .map(|uc_id| {
                portfolio_entry(&output_dir.join(uc_id), uc_id)
                    .unwrap_or_else(|| json!({"uc_id": uc_id, "error": "no artifacts"}))
            })
            .collect()
    })
    .await
    .map_err(|e| ApiError(Error::model(format!("Comparison failed: {e}"))))?;
    Ok(Json(json!({"comparison": entries})))
}

async fn department_summary(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let output_dir = state.settings.output_dir();
    let entries = tokio::task::spawn_blocking(move || all_entries(&output_dir))
        .await
        .map_err(|e| ApiError(Error::model(format!("Portfolio scan failed: {e}"))))?;

    let mut by_category: std::collections::BTreeMap<String, Vec<&Value>> = Default::default();
    for entry in &entries {
        let category = entry["category"].as_str().unwrap_or("Uncategorized").to_string();
        by_category.entry(category).or_default().push(entry);
    }

    let departments: Vec<Value> = by_category
        .into_iter()
        .map(|(category, members)| {
            let qualities: Vec<f64> = members
                .iter()
                .filter_map(|m| m["data_quality_score"].as_f64())
                .collect();
            let avg_quality = if qualities.is_empty() {
                0.0
            } else {
                qualities.iter().sum::<f64>() / qualities.len() as f64
            };
            json!({
                "category": category,
                "use_cases": members.len(),
                "avg_data_quality": avg_quality,
                "members": members.iter().map(|m| m["uc_id"].clone()).collect::<Vec<_>>(),
            })
        })
        .collect();

    Ok(Json(json!({"departments": departments})))
}

async fn business_case(
    State(state): State<AppState>,
    Path(uc_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !bankflow::core::sanitize::validate_use_case_key(&uc_id) {
        return Err(ApiError(Error::validation(format!("Invalid use case ID: {uc_id}"))));
    }
    let output_dir = state.settings.output_dir();
    let uc = uc_id.clone();
    let entry = tokio::task::spawn_blocking(move || portfolio_entry(&output_dir.join(&uc), &uc))
        .await
        .map_err(|e| ApiError(Error::model(format!("Business case failed: {e}"))))?
        .ok_or_else(|| ApiError(Error::not_found(format!("No artifacts for use case '{uc_id}'"))))?;

    // Deliberately coarse financial model: effect scales with model
    // strength over a baseline process.
    let accuracy = entry["accuracy"].as_f64().unwrap_or(0.0);
    let rows = entry["total_rows"].as_u64().unwrap_or(0) as f64;
    let baseline = 0.5;
    let lift = (accuracy - baseline).max(0.0);
    let value_per_decision = 12.0;
    let annual_value = rows * lift * value_per_decision;

    Ok(Json(json!({
        "uc_id": uc_id,
        "summary": entry,
        "assumptions": {
            "baseline_accuracy": baseline,
            "value_per_improved_decision": value_per_decision,
        },
        "estimated_annual_value": annual_value,
        "confidence": if accuracy > 0.0 { "model-backed" } else { "no-model" },
    })))
}
