//! Training job endpoints.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use bankflow::Error;
use bankflow_training::TrainingConfig;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/start", post(start_training))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(get_job))
}

#[derive(Deserialize)]
struct StartRequest {
    dataset_id: i64,
    target_column: String,
    #[serde(default = "default_algorithm")]
    algorithm: String,
    #[serde(default = "default_test_size")]
    test_size: f64,
}

fn default_algorithm() -> String {
    "random_forest".to_string()
}

fn default_test_size() -> f64 {
    0.2
}

async fn start_training(
    State(state): State<AppState>,
    Json(body): Json<StartRequest>,
) -> ApiResult<Json<Value>> {
    // Fail fast on unknown datasets and algorithms before queuing.
    bankflow_training::Algorithm::parse(&body.algorithm)?;
    state.datasets.find_by_id(body.dataset_id)?;

    let config = json!({
        "dataset_id": body.dataset_id,
        "target_column": body.target_column,
        "algorithm": body.algorithm,
        "test_size": body.test_size,
    });
    let job_id = state.jobs.create("training", &config)?;
    state.audit.record(
        "training_started",
        &format!("Job {job_id}: {} on dataset {}", body.algorithm, body.dataset_id),
        "create",
    );

    let training = state.training.clone();
    let training_config = TrainingConfig {
        dataset_id: body.dataset_id,
        target_column: body.target_column,
        algorithm: body.algorithm,
        test_size: body.test_size,
    };
    tokio::task::spawn_blocking(move || training.run(job_id, &training_config));

    Ok(Json(json!({"job_id": job_id, "status": "queued"})))
}

async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let jobs = state.jobs.list_by_type("training")?;
    Ok(Json(serde_json::to_value(jobs).map_err(Error::from)?))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    let job = state.jobs.find_by_id(id)?;
    if job.job_type != "training" {
        return Err(ApiError(Error::not_found(format!("Job {id} not found"))));
    }
    Ok(Json(serde_json::to_value(job).map_err(Error::from)?))
}
