//! Alert rules: CRUD plus on-demand evaluation against preprocessing
//! artifacts.

use std::path::Path;

use axum::extract::{Path as UrlPath, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bankflow::Error;
use bankflow_store::AlertUpdate;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const VALID_METRICS: &[&str] = &[
    "data_quality_score",
    "accuracy",
    "f1_score",
    "missing_pct",
    "drift_score",
    "latency_ms",
];
const VALID_OPERATORS: &[&str] = &[">", "<", "=", ">=", "<=", "!="];
const VALID_SEVERITIES: &[&str] = &["critical", "warning", "info"];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_alerts).post(create_alert))
        .route("/check", post(check_alerts))
        .route("/:id", put(update_alert).delete(delete_alert))
}

#[derive(Deserialize)]
struct AlertCreate {
    name: String,
    metric: String,
    threshold: f64,
    #[serde(default = "default_operator")]
    operator: String,
    #[serde(default = "default_uc")]
    uc_id: String,
    #[serde(default = "default_severity")]
    severity: String,
}

fn default_operator() -> String {
    ">".to_string()
}
fn default_uc() -> String {
    "all".to_string()
}
fn default_severity() -> String {
    "warning".to_string()
}

#[derive(Deserialize, Default)]
struct AlertPatch {
    name: Option<String>,
    metric: Option<String>,
    threshold: Option<f64>,
    operator: Option<String>,
    uc_id: Option<String>,
    severity: Option<String>,
    enabled: Option<bool>,
}

fn validate_fields(
    metric: Option<&str>,
    operator: Option<&str>,
    severity: Option<&str>,
) -> Result<(), Error> {
    if let Some(metric) = metric {
        if !VALID_METRICS.contains(&metric) {
            return Err(Error::validation(format!(
                "Invalid metric '{metric}'. Must be one of: {VALID_METRICS:?}"
            )));
        }
    }
    if let Some(operator) = operator {
        if !VALID_OPERATORS.contains(&operator) {
            return Err(Error::validation(format!(
                "Invalid operator '{operator}'. Must be one of: {VALID_OPERATORS:?}"
            )));
        }
    }
    if let Some(severity) = severity {
        if !VALID_SEVERITIES.contains(&severity) {
            return Err(Error::validation(format!(
                "Invalid severity '{severity}'. Must be one of: {VALID_SEVERITIES:?}"
            )));
        }
    }
    Ok(())
}

async fn list_alerts(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let alerts = state.alerts.list_all()?;
    Ok(Json(serde_json::to_value(alerts).map_err(Error::from)?))
}

async fn create_alert(
    State(state): State<AppState>,
    Json(body): Json<AlertCreate>,
) -> ApiResult<Json<Value>> {
    validate_fields(Some(&body.metric), Some(&body.operator), Some(&body.severity))?;
    let id = state.alerts.create(
        &body.name,
        &body.metric,
        body.threshold,
        &body.operator,
        &body.uc_id,
        &body.severity,
    )?;
    state.audit.record(
        "alert_created",
        &format!(
            "Alert '{}' (id={id}) on {} {} {}",
            body.name, body.metric, body.operator, body.threshold
        ),
        "create",
    );
    Ok(Json(json!({"id": id, "message": "Alert created successfully"})))
}

async fn update_alert(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<i64>,
    Json(body): Json<AlertPatch>,
) -> ApiResult<Json<Value>> {
    validate_fields(
        body.metric.as_deref(),
        body.operator.as_deref(),
        body.severity.as_deref(),
    )?;
    state.alerts.update(
        id,
        &AlertUpdate {
            name: body.name,
            metric: body.metric,
            threshold: body.threshold,
            operator: body.operator,
            uc_id: body.uc_id,
            severity: body.severity,
            enabled: body.enabled,
        },
    )?;
    state
        .audit
        .record("alert_updated", &format!("Alert id={id} updated"), "modify");
    Ok(Json(json!({"success": true, "message": format!("Alert {id} updated successfully")})))
}

async fn delete_alert(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<i64>,
) -> ApiResult<Json<Value>> {
    state.alerts.delete(id)?;
    state
        .audit
        .record("alert_deleted", &format!("Alert id={id} deleted"), "delete");
    Ok(Json(json!({"success": true, "message": format!("Alert {id} deleted successfully")})))
}

/// Evaluate a numeric condition.
fn condition_holds(value: f64, operator: &str, threshold: f64) -> bool {
    match operator {
        ">" => value > threshold,
        "<" => value < threshold,
        "=" => (value - threshold).abs() < 1e-6,
        ">=" => value >= threshold,
        "<=" => value <= threshold,
        "!=" => (value - threshold).abs() >= 1e-6,
        _ => false,
    }
}

/// Walk `preprocessing_output/*/summary.json` (plus full_report and drift
/// artifacts) and extract the metric map per use case.
fn collect_uc_metrics(output_dir: &Path) -> Vec<(String, serde_json::Map<String, Value>)> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(output_dir) else {
        return out;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let uc_dir = entry.path();
        let Ok(raw) = std::fs::read_to_string(uc_dir.join("summary.json")) else {
            continue;
        };
        let Ok(summary) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };

        let uc_id = summary["use_case_key"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| entry.file_name().to_string_lossy().to_string());

        let mut metrics = serde_json::Map::new();
        if let Some(v) = summary["data_quality_score"].as_f64() {
            metrics.insert("data_quality_score".to_string(), json!(v));
        }
        if let Some(v) = summary["avg_missing_pct"].as_f64() {
            metrics.insert("missing_pct".to_string(), json!(v));
        }

        if let Ok(raw) = std::fs::read_to_string(uc_dir.join("full_report.json")) {
            if let Ok(report) = serde_json::from_str::<Value>(&raw) {
                if let Some(v) = report["model_metrics"]["accuracy"].as_f64() {
                    metrics.insert("accuracy".to_string(), json!(v));
                }
                if let Some(v) = report["model_metrics"]["f1_score"].as_f64() {
                    metrics.insert("f1_score".to_string(), json!(v));
                }
            }
        }
        if let Ok(raw) = std::fs::read_to_string(uc_dir.join("drift_report.json")) {
            if let Ok(drift) = serde_json::from_str::<Value>(&raw) {
                if let Some(v) = drift["drift_score"].as_f64() {
                    metrics.insert("drift_score".to_string(), json!(v));
                }
            }
        }

        out.push((uc_id, metrics));
    }
    out
}

async fn check_alerts(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let alerts = state.alerts.list_enabled()?;
    if alerts.is_empty() {
        return Ok(Json(
            json!({"triggered": [], "message": "No enabled alerts configured."}),
        ));
    }

    let output_dir = state.settings.output_dir();
    let uc_metrics = tokio::task::spawn_blocking(move || collect_uc_metrics(&output_dir))
        .await
        .map_err(|e| ApiError(Error::model(format!("Alert scan failed: {e}"))))?;

    let now = chrono::Utc::now().to_rfc3339();
    let mut triggered = Vec::new();
    for alert in &alerts {
        for (uc_id, metrics) in &uc_metrics {
            if alert.uc_id != "all" && alert.uc_id != *uc_id {
                continue;
            }
            let Some(value) = metrics.get(&alert.metric).and_then(Value::as_f64) else {
                continue;
            };
            if condition_holds(value, &alert.operator, alert.threshold) {
                triggered.push(json!({
                    "alert_id": alert.id,
                    "alert_name": alert.name,
                    "uc_id": uc_id,
                    "metric": alert.metric,
                    "current_value": value,
                    "operator": alert.operator,
                    "threshold": alert.threshold,
                    "severity": alert.severity,
                    "triggered_at": now,
                }));
            }
        }
    }

    let fired_ids: Vec<i64> = {
        let mut ids: Vec<i64> = triggered
            .iter()
            .filter_map(|t| t["alert_id"].as_i64())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    if !fired_ids.is_empty() {
        state.alerts.update_last_triggered(&fired_ids, &now)?;
        for t in &triggered {
            let severity = t["severity"].as_str().unwrap_or("warning");
            state.audit.record(
                "alert_triggered",
                &format!(
                    "[{}] {}: {} {}={} {} {}",
                    severity.to_uppercase(),
                    t["alert_name"].as_str().unwrap_or("?"),
                    t["uc_id"].as_str().unwrap_or("?"),
                    t["metric"].as_str().unwrap_or("?"),
                    t["current_value"],
                    t["operator"].as_str().unwrap_or("?"),
                    t["threshold"],
                ),
                if severity == "critical" { "error" } else { "warning" },
            );
        }
    }

    let triggered_count = triggered.len();
    Ok(Json(json!({
        "triggered": triggered,
        "total_alerts_checked": alerts.len(),
        "total_use_cases_scanned": uc_metrics.len(),
        "triggered_count": triggered_count,
        "checked_at": now,
    })))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_holds() {
        assert!(condition_holds(45.0, "<", 50.0));
        assert!(!condition_holds(55.0, "<", 50.0));
        assert!(condition_holds(50.0, ">=", 50.0));
        assert!(condition_holds(50.0, "=", 50.0));
        assert!(condition_holds(49.0, "!=", 50.0));
        assert!(!condition_holds(1.0, "??", 2.0));
    }

    #[test]
    fn test_validate_fields() {
        assert!(validate_fields(Some("accuracy"), Some("<"), Some("warning")).is_ok());
        assert!(validate_fields(Some("vibes"), None, None).is_err());
        assert!(validate_fields(None, Some("~"), None).is_err());
        assert!(validate_fields(None, None, Some("mild")).is_err());
    }

    #[test]
    fn test_collect_uc_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let uc = dir.path().join("uc_fr_01");
        std::fs::create_dir_all(&uc).unwrap();
        std::fs::write(
            uc.join("summary.json"),
            r#"{"use_case_key": "uc_fr_01", "data_quality_score": 45.0, "avg_missing_pct": 12.0}"#,
        )
        .unwrap();
        std::fs::write(
            uc.join("full_report.json"),
            r#"{"model_metrics": {"accuracy": 0.91, "f1_score": 0.88}}"#,
        )
        .unwrap();

        let metrics = collect_uc_metrics(dir.path());
        assert_eq!(metrics.len(), 1);
        let (uc_id, map) = &metrics[0];
        assert_eq!(uc_id, "uc_fr_01");
        assert_eq!(map["data_quality_score"], json!(45.0));
        assert_eq!(map["accuracy"], json!(0.91));
    }
}
