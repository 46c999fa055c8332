//! Statistics endpoints. Each loads the dataset frame fresh and computes
//! on demand: no caching.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use bankflow::Error;
use bankflow_analysis::{self as analysis, Frame};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/:id", get(summary))
        .route("/:id/correlations", get(correlations))
        .route("/:id/distributions", get(distributions))
        .route("/:id/outliers", get(outliers))
        .route("/:id/class-distribution", get(class_distribution))
        .route("/:id/feature-engineering", get(feature_engineering))
        .route("/:id/stability", get(stability))
        .route("/:id/leakage", get(leakage))
        .route("/:id/calibration", get(calibration))
        .route("/:id/fairness", get(fairness))
        .route("/:id/cost-threshold", get(cost_threshold))
}

#[derive(Deserialize, Default)]
struct TargetQuery {
    target_column: Option<String>,
}

/// Load the dataset frame on a blocking worker, then run `compute`.
async fn with_frame<F>(state: AppState, dataset_id: i64, compute: F) -> ApiResult<Json<Value>>
where
    F: FnOnce(&Frame) -> Value + Send + 'static,
{
    let value = tokio::task::spawn_blocking(move || -> Result<Value, Error> {
        let file_path = state.datasets.get_file_path(dataset_id)?;
        let frame = Frame::load(
            std::path::Path::new(&file_path),
            state.settings.sample_limit,
        )?;
        Ok(compute(&frame))
    })
    .await
    .map_err(|e| ApiError(Error::model(format!("Analysis task failed: {e}"))))??;
    Ok(Json(value))
}

async fn summary(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    with_frame(state, id, |frame| analysis::summary_stats(frame)).await
}

async fn correlations(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    with_frame(state, id, |frame| analysis::correlations(frame)).await
}

async fn distributions(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    with_frame(state, id, |frame| analysis::distributions(frame)).await
}

async fn outliers(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    with_frame(state, id, |frame| analysis::outliers(frame)).await
}

async fn class_distribution(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<TargetQuery>,
) -> ApiResult<Json<Value>> {
    with_frame(state, id, move |frame| {
        analysis::class_distribution(frame, query.target_column.as_deref())
    })
    .await
}

async fn feature_engineering(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<TargetQuery>,
) -> ApiResult<Json<Value>> {
    with_frame(state, id, move |frame| {
        analysis::feature_engineering(frame, query.target_column.as_deref())
    })
    .await
}

async fn stability(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<TargetQuery>,
) -> ApiResult<Json<Value>> {
    with_frame(state, id, move |frame| {
        analysis::stability_analysis(frame, query.target_column.as_deref())
    })
    .await
}

async fn leakage(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<TargetQuery>,
) -> ApiResult<Json<Value>> {
    with_frame(state, id, move |frame| {
        analysis::leakage_analysis(frame, query.target_column.as_deref())
    })
    .await
}

async fn calibration(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<TargetQuery>,
) -> ApiResult<Json<Value>> {
    with_frame(state, id, move |frame| {
        analysis::calibration_analysis(frame, query.target_column.as_deref())
    })
    .await
}

async fn fairness(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<TargetQuery>,
) -> ApiResult<Json<Value>> {
    with_frame(state, id, move |frame| {
        analysis::fairness_analysis(frame, query.target_column.as_deref())
    })
    .await
}

async fn cost_threshold(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<TargetQuery>,
) -> ApiResult<Json<Value>> {
    with_frame(state, id, move |frame| {
        analysis::cost_threshold_analysis(frame, query.target_column.as_deref())
    })
    .await
}
