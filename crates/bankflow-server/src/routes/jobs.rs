//! Job tracking, vector store stats, chunking stats.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use bankflow::Error;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/vectordb", get(vectordb_stats))
        .route("/chunking", get(chunking_stats))
        .route("/:id", get(get_job))
        .route("/:id/cancel", post(cancel_job))
}

async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let jobs = state.jobs.list_all(100)?;
    Ok(Json(serde_json::to_value(jobs).map_err(Error::from)?))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    let job = state.jobs.find_by_id(id)?;
    Ok(Json(serde_json::to_value(job).map_err(Error::from)?))
}

async fn cancel_job(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    state.jobs.cancel(id)?;
    state
        .audit
        .record("job_cancelled", &format!("Job {id} cancelled"), "modify");
    Ok(Json(json!({"success": true, "message": format!("Job {id} cancelled")})))
}

async fn vectordb_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let stats = state.store.stats().await?;

    // On-disk index files, when the backend persists any.
    let dir = state.settings.vector_store_dir();
    let mut index_files = Vec::new();
    let mut total_size = 0u64;
    if let Ok(entries) = std::fs::read_dir(&dir) {
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            total_size += meta.len();
            let name = path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_default();
            if name.ends_with(".index")
                || name.ends_with(".faiss")
                || name.ends_with(".bin")
                || name.ends_with(".db")
            {
                index_files.push(json!({"name": name, "size": meta.len()}));
            }
        }
    }

    Ok(Json(json!({
        "exists": true,
        "backend": stats.backend,
        "total_collections": stats.total_collections,
        "total_documents": stats.total_documents,
        "collections": stats.collections,
        "total_size": total_size,
        "index_files": index_files,
    })))
}

async fn chunking_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let output_dir = state.settings.output_dir();
    if !output_dir.exists() {
        return Ok(Json(
            json!({"exists": false, "message": "No preprocessing output directory found"}),
        ));
    }

    let stats = tokio::task::spawn_blocking(move || -> Result<Value, Error> {
        let mut per_use_case = Vec::new();
        for entry in std::fs::read_dir(&output_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let chunks_path = entry.path().join("rag").join("chunks.json");
            let chunk_count = std::fs::read_to_string(&chunks_path)
                .ok()
                .and_then(|raw| serde_json::from_str::<Vec<Value>>(&raw).ok())
                .map(|chunks| chunks.len());
            per_use_case.push(json!({
                "use_case": entry.file_name().to_string_lossy(),
                "chunks": chunk_count,
            }));
        }
        Ok(json!({"exists": true, "use_cases": per_use_case}))
    })
    .await
    .map_err(|e| ApiError(Error::model(format!("Chunking stats failed: {e}"))))??;

    Ok(Json(stats))
}
