//! Model scoring against persisted artifacts.

use std::collections::HashMap;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use bankflow::Error;
use bankflow_analysis::Frame;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/models", get(list_models))
        .route("/score", post(score_one))
        .route("/batch", post(score_batch))
}

#[derive(Deserialize)]
struct ScoreRequest {
    model_path: String,
    features: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct BatchRequest {
    model_path: String,
    dataset_id: i64,
}

/// Model paths come from clients; only files inside the models directory
/// are accepted.
fn resolve_model_path(state: &AppState, requested: &str) -> Result<std::path::PathBuf, Error> {
    let models_dir = state
        .settings
        .models_dir()
        .canonicalize()
        .map_err(|_| Error::not_found("No models directory"))?;
    let candidate = std::path::Path::new(requested);
    let candidate = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        models_dir.join(candidate)
    };
    let canonical = candidate
        .canonicalize()
        .map_err(|_| Error::not_found(format!("Model not found: {requested}")))?;
    if !canonical.starts_with(&models_dir) {
        return Err(Error::validation("Model path escapes the models directory"));
    }
    Ok(canonical)
}

async fn list_models(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let models_dir = state.settings.models_dir();
    let models = tokio::task::spawn_blocking(move || -> Vec<Value> {
        let Ok(entries) = std::fs::read_dir(&models_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path().extension().and_then(|x| x.to_str()) == Some("json")
            })
            .map(|e| {
                json!({
                    "name": e.path().file_stem().map(|s| s.to_string_lossy().to_string()),
                    "path": e.path().to_string_lossy(),
                    "size": e.metadata().map(|m| m.len()).unwrap_or(0),
                })
            })
            .collect()
    })
    .await
    .map_err(|e| ApiError(Error::model(format!("Model listing failed: {e}"))))?;
    Ok(Json(json!(models)))
}

async fn score_one(
    State(state): State<AppState>,
    Json(body): Json<ScoreRequest>,
) -> ApiResult<Json<Value>> {
    let path = resolve_model_path(&state, &body.model_path)?;
    let outcome = tokio::task::spawn_blocking(move || {
        bankflow_training::score_single(&path, &body.features)
    })
    .await
    .map_err(|e| ApiError(Error::model(format!("Scoring task failed: {e}"))))??;
    Ok(Json(serde_json::to_value(outcome).map_err(Error::from)?))
}

async fn score_batch(
    State(state): State<AppState>,
    Json(body): Json<BatchRequest>,
) -> ApiResult<Json<Value>> {
    let path = resolve_model_path(&state, &body.model_path)?;
    let file_path = state.datasets.get_file_path(body.dataset_id)?;
    let sample_limit = state.settings.sample_limit;

    let result = tokio::task::spawn_blocking(move || -> Result<Value, Error> {
        let frame = Frame::load(std::path::Path::new(&file_path), sample_limit)?;
        bankflow_training::score_batch(&path, &frame)
    })
    .await
    .map_err(|e| ApiError(Error::model(format!("Scoring task failed: {e}"))))??;
    Ok(Json(result))
}
