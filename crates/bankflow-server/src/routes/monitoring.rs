//! System, model, and database monitoring.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use bankflow::core::sanitize::{human_size, sanitize_table_name};
use bankflow::Error;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::monitor;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/system", get(system))
        .route("/models", get(models))
        .route("/databases", get(databases))
}

async fn system() -> ApiResult<Json<Value>> {
    // The CPU sample sleeps briefly; keep it off the async workers.
    let snapshot = tokio::task::spawn_blocking(monitor::system_snapshot)
        .await
        .unwrap_or_else(|e| json!({"error": format!("Snapshot failed: {e}")}));
    Ok(Json(snapshot))
}

async fn models(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let models_dir = state.settings.models_dir();
    let models = tokio::task::spawn_blocking(move || -> Vec<Value> {
        let Ok(entries) = std::fs::read_dir(&models_dir) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else { continue };
            let is_model = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("json" | "pkl" | "bin")
            );
            if !meta.is_file() || !is_model {
                continue;
            }
            let modified = meta
                .modified()
                .ok()
                .map(chrono::DateTime::<chrono::Utc>::from)
                .map(|t| t.to_rfc3339());
            out.push(json!({
                "name": path.file_stem().map(|s| s.to_string_lossy().replace('_', " ")),
                "path": path.to_string_lossy(),
                "size": meta.len(),
                "size_human": human_size(meta.len()),
                "modified": modified,
            }));
        }
        out
    })
    .await
    .map_err(|e| ApiError(Error::model(format!("Model scan failed: {e}"))))?;
    Ok(Json(json!(models)))
}

async fn databases(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let databases = [
        ("admin", state.settings.admin_db()),
        ("banking_unified", state.settings.unified_db()),
        ("ml_pipeline_results", state.settings.results_db()),
        ("preprocessing_results", state.settings.preprocessing_db()),
        ("rag_cache", state.settings.rag_cache_db()),
    ];

    let report = tokio::task::spawn_blocking(move || -> Vec<Value> {
        databases
            .iter()
            .map(|(name, path)| {
                let mut entry = json!({
                    "name": name,
                    "path": path.to_string_lossy(),
                    "exists": path.exists(),
                });
                if !path.exists() {
                    return entry;
                }
                if let Ok(meta) = std::fs::metadata(path) {
                    entry["size"] = json!(meta.len());
                    entry["size_human"] = json!(human_size(meta.len()));
                }
                match rusqlite::Connection::open_with_flags(
                    path,
                    rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
                ) {
                    Ok(conn) => {
                        let tables = list_tables_with_counts(&conn);
                        entry["tables"] = json!(tables);
                    }
                    Err(e) => {
                        entry["error"] = json!(e.to_string());
                    }
                }
                entry
            })
            .collect()
    })
    .await
    .map_err(|e| ApiError(Error::model(format!("Database scan failed: {e}"))))?;

    Ok(Json(json!(report)))
}

fn list_tables_with_counts(conn: &rusqlite::Connection) -> Vec<Value> {
    let Ok(mut stmt) =
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
    else {
        return Vec::new();
    };
    let Ok(rows) = stmt.query_map([], |r| r.get::<_, String>(0)) else {
        return Vec::new();
    };
    rows.filter_map(|r| r.ok())
        .map(|table| {
            let count = sanitize_table_name(&table)
                .ok()
                .and_then(|safe| {
                    conn.query_row(&format!("SELECT COUNT(*) FROM \"{safe}\""), [], |r| {
                        r.get::<_, i64>(0)
                    })
                    .ok()
                })
                .unwrap_or(-1);
            json!({"name": table, "rows": count})
        })
        .collect()
}
