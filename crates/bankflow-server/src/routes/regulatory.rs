//! Regulatory reporting: SR 11-7 model risk reports, the model
//! inventory, and the compliance summary.
//!
//! Risk rating per model: fraud/AML domains are High by default;
//! accuracy < 0.85 or data quality < 80 escalate to High; accuracy
//! < 0.92 or quality < 90 land at Medium; everything else is Low.

use std::path::Path as FsPath;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use bankflow::Error;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const HIGH_RISK_DOMAINS: &[&str] = &["fraud", "aml"];
const MEDIUM_RISK_DOMAINS: &[&str] = &["credit", "collections"];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sr11-7/:uc_id", get(sr11_7_report))
        .route("/model-inventory", get(model_inventory))
        .route("/compliance-summary", get(compliance_summary))
}

fn risk_rating(domain: &str, quality: f64, accuracy: Option<f64>) -> &'static str {
    if HIGH_RISK_DOMAINS.contains(&domain) {
        return "High";
    }
    if quality < 80.0 || accuracy.is_some_and(|a| a < 0.85) {
        return "High";
    }
    if MEDIUM_RISK_DOMAINS.contains(&domain) {
        return "Medium";
    }
    if quality < 90.0 || accuracy.is_some_and(|a| a < 0.92) {
        return "Medium";
    }
    "Low"
}

fn risk_factors(domain: &str, quality: f64, accuracy: Option<f64>) -> Vec<String> {
    let mut factors = Vec::new();
    if HIGH_RISK_DOMAINS.contains(&domain) {
        factors.push(format!("High-sensitivity domain: {domain}"));
    }
    if quality < 80.0 {
        factors.push(format!("Data quality score below 80: {quality:.1}"));
    } else if quality < 90.0 {
        factors.push(format!("Data quality score below 90: {quality:.1}"));
    }
    if let Some(accuracy) = accuracy {
        if accuracy < 0.85 {
            factors.push(format!("Model accuracy below 85%: {accuracy:.4}"));
        } else if accuracy < 0.92 {
            factors.push(format!("Model accuracy below 92%: {accuracy:.4}"));
        }
    }
    if factors.is_empty() {
        factors.push("No significant risk factors identified".to_string());
    }
    factors
}

fn load_json(path: &FsPath) -> Option<Value> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
}

struct UcArtifacts {
    summary: Value,
    training: Value,
}

fn load_artifacts(output_dir: &FsPath, uc_id: &str) -> Option<UcArtifacts> {
    let dir = output_dir.join(uc_id);
    let summary = load_json(&dir.join("summary.json"))?;
    let training = load_json(&dir.join("training_results.json")).unwrap_or(Value::Null);
    Some(UcArtifacts { summary, training })
}

async fn sr11_7_report(
    State(state): State<AppState>,
    Path(uc_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !bankflow::core::sanitize::validate_use_case_key(&uc_id) {
        return Err(ApiError(Error::validation(format!("Invalid use case ID: {uc_id}"))));
    }
    let output_dir = state.settings.output_dir();
    let artifacts = load_artifacts(&output_dir, &uc_id)
        .ok_or_else(|| ApiError(Error::not_found(format!("No summary.json found for use case '{uc_id}'"))))?;

    let governance = state.results.governance_scores(&uc_id)?;

    let summary = &artifacts.summary;
    let domain = summary["domain"].as_str().unwrap_or("general").to_string();
    let quality = summary["data_quality_score"].as_f64().unwrap_or(0.0);
    let accuracy = artifacts.training["accuracy"].as_f64();
    let rating = risk_rating(&domain, quality, accuracy);
    let factors = risk_factors(&domain, quality, accuracy);
    let sensitivity = if HIGH_RISK_DOMAINS.contains(&domain.as_str()) {
        "High"
    } else if MEDIUM_RISK_DOMAINS.contains(&domain.as_str()) {
        "Medium"
    } else {
        "Low"
    };

    Ok(Json(json!({
        "report_type": "SR 11-7 Model Risk Management",
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "use_case_id": uc_id,
        "model_identification": {
            "name": summary["label"],
            "use_case_key": uc_id,
            "domain": domain,
            "category": summary["category"],
            "target_variable": summary["target_column"],
            "total_rows": summary["total_rows"],
            "total_columns": summary["total_columns"],
            "validation_date": summary["run_timestamp"],
        },
        "risk_assessment": {
            "risk_rating": rating,
            "risk_factors": factors,
            "domain_sensitivity": sensitivity,
        },
        "model_performance": artifacts.training,
        "data_quality_assessment": {
            "overall_score": quality,
            "avg_missing_pct": summary["avg_missing_pct"],
            "class_imbalance_ratio": summary["class_imbalance_ratio"],
        },
        "governance_scores": governance
            .into_iter()
            .map(|(dimension, score)| json!({"dimension": dimension, "score": score}))
            .collect::<Vec<_>>(),
        "monitoring_requirements": {
            "review_cadence": match rating {
                "High" => "quarterly",
                "Medium" => "semi-annual",
                _ => "annual",
            },
            "drift_monitoring": true,
            "champion_challenger": rating == "High",
        },
    })))
}

fn build_inventory(state: &AppState) -> Vec<Value> {
    let output_dir = state.settings.output_dir();
    let mut inventory = Vec::new();
    let Ok(entries) = std::fs::read_dir(&output_dir) else {
        return inventory;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let uc_id = entry.file_name().to_string_lossy().to_string();
        let Some(artifacts) = load_artifacts(&output_dir, &uc_id) else {
            continue;
        };
        let domain = artifacts.summary["domain"].as_str().unwrap_or("general").to_string();
        let quality = artifacts.summary["data_quality_score"].as_f64().unwrap_or(0.0);
        let accuracy = artifacts.training["accuracy"].as_f64();
        let rating = risk_rating(&domain, quality, accuracy);
        inventory.push(json!({
            "use_case_key": uc_id,
            "name": artifacts.summary["label"],
            "domain": domain,
            "category": artifacts.summary["category"],
            "risk_rating": rating,
            "data_quality_score": quality,
            "accuracy": accuracy,
            "has_trained_model": accuracy.is_some(),
        }));
    }
    inventory
}

async fn model_inventory(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let inventory = tokio::task::spawn_blocking(move || build_inventory(&state))
        .await
        .map_err(|e| ApiError(Error::model(format!("Inventory scan failed: {e}"))))?;
    let count = inventory.len();
    Ok(Json(json!({"models": inventory, "count": count})))
}

async fn compliance_summary(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let inventory = tokio::task::spawn_blocking(move || build_inventory(&state))
        .await
        .map_err(|e| ApiError(Error::model(format!("Inventory scan failed: {e}"))))?;

    let count_rating = |rating: &str| {
        inventory
            .iter()
            .filter(|m| m["risk_rating"] == rating)
            .count()
    };
    let trained = inventory
        .iter()
        .filter(|m| m["has_trained_model"] == json!(true))
        .count();

    Ok(Json(json!({
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "total_models": inventory.len(),
        "by_risk_rating": {
            "high": count_rating("High"),
            "medium": count_rating("Medium"),
            "low": count_rating("Low"),
        },
        "trained_models": trained,
        "untrained_models": inventory.len() - trained,
    })))
}
