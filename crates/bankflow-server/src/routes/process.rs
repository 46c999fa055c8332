//! Pipeline execution: start a scheduler run for one use case.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use bankflow::core::sanitize::validate_use_case_key;
use bankflow::Error;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/run", post(run_pipeline))
        .route("/use-cases", get(list_use_cases))
        .route("/status", get(pipeline_status))
}

#[derive(Deserialize)]
struct RunRequest {
    uc_id: String,
    #[serde(default = "default_pipeline_type")]
    pipeline_type: String,
}

fn default_pipeline_type() -> String {
    "full".to_string()
}

async fn run_pipeline(
    State(state): State<AppState>,
    Json(body): Json<RunRequest>,
) -> ApiResult<Json<Value>> {
    if !validate_use_case_key(&body.uc_id) {
        return Err(ApiError(Error::validation(format!(
            "Invalid use case ID: {}",
            body.uc_id
        ))));
    }
    if !matches!(body.pipeline_type.as_str(), "full" | "preprocessing" | "training") {
        return Err(ApiError(Error::validation(format!(
            "Invalid pipeline type: {}",
            body.pipeline_type
        ))));
    }
    let use_case = state
        .find_use_case(&body.uc_id)
        .ok_or_else(|| ApiError(Error::not_found(format!("Unknown use case: {}", body.uc_id))))?;

    let job_id = state.scheduler.start_detached(use_case)?;
    state.audit.record(
        "pipeline_started",
        &format!("Pipeline {} started for {}", body.pipeline_type, body.uc_id),
        "create",
    );

    Ok(Json(json!({
        "job_id": job_id,
        "uc_id": body.uc_id,
        "pipeline_type": body.pipeline_type,
        "status": "queued",
    })))
}

async fn list_use_cases(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    Ok(Json(
        serde_json::to_value(state.use_cases.as_ref()).map_err(Error::from)?,
    ))
}

async fn pipeline_status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let statuses = state.results.list_use_case_statuses()?;
    Ok(Json(serde_json::to_value(statuses).map_err(Error::from)?))
}
