//! Dataset lifecycle: upload, list, detail, delete.

use axum::extract::{Multipart, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use bankflow::Error;
use bankflow_analysis::Frame;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload_file))
        .route("/datasets", get(list_datasets))
        .route("/datasets/:id", get(get_dataset).delete(delete_dataset))
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut payload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(Error::validation(format!("Invalid multipart body: {e}"))))?
    {
        if field.name() == Some("file") {
            let filename = field
                .file_name()
                .ok_or_else(|| ApiError(Error::validation("Upload is missing a filename")))?
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError(Error::validation(format!("Upload read failed: {e}"))))?;
            payload = Some((filename, bytes.to_vec()));
            break;
        }
    }
    let Some((filename, bytes)) = payload else {
        return Err(ApiError(Error::validation("No 'file' field in upload")));
    };

    let extension = std::path::Path::new(&filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    if !state.settings.allowed_extensions.contains(&extension) {
        return Err(ApiError(Error::validation(format!(
            "Unsupported file type '{extension}'. Allowed: {}",
            state
                .settings
                .allowed_extensions
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        ))));
    }
    if bytes.len() > state.settings.max_upload_size {
        return Err(ApiError(Error::validation(format!(
            "File exceeds max size of {} MB",
            state.settings.max_upload_size / (1024 * 1024)
        ))));
    }

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let safe_name = sanitize_filename(&filename);
    let dest = state.settings.uploads_dir().join(format!("{timestamp}_{safe_name}"));

    let state_bg = state.clone();
    let filename_bg = filename.clone();
    let dest_bg = dest.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Value, Error> {
        if let Some(parent) = dest_bg.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest_bg, &bytes)?;

        let frame = match Frame::load(&dest_bg, state_bg.settings.sample_limit) {
            Ok(frame) => frame,
            Err(e) => {
                // A file we cannot parse never leaves an orphan on disk.
                let _ = std::fs::remove_file(&dest_bg);
                return Err(Error::data(format!("Failed to parse file: {e}")));
            }
        };

        let columns = frame.column_infos();
        let name = std::path::Path::new(&filename_bg)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| filename_bg.clone());
        let dataset_id = state_bg.datasets.create(
            &name,
            &filename_bg,
            &dest_bg.to_string_lossy(),
            bytes.len() as i64,
            frame.rows() as i64,
            frame.cols() as i64,
            &columns,
        )?;

        state_bg.audit.record(
            "dataset_uploaded",
            &format!("Uploaded {filename_bg} ({} rows, {} cols)", frame.rows(), frame.cols()),
            "create",
        );

        Ok(json!({
            "id": dataset_id,
            "name": name,
            "filename": filename_bg,
            "rows": frame.rows(),
            "cols": frame.cols(),
            "size": bytes.len(),
            "columns": columns,
        }))
    })
    .await
    .map_err(|e| ApiError(Error::model(format!("Upload task failed: {e}"))))??;

    Ok(Json(result))
}

async fn list_datasets(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let datasets = state.datasets.list_all()?;
    Ok(Json(serde_json::to_value(datasets).map_err(Error::from)?))
}

async fn get_dataset(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let dataset = state.datasets.find_by_id(id)?;
    Ok(Json(serde_json::to_value(dataset).map_err(Error::from)?))
}

async fn delete_dataset(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let name = state.datasets.delete(id)?;
    state.audit.record(
        "dataset_deleted",
        &format!("Deleted dataset '{name}' (id={id})"),
        "delete",
    );
    Ok(Json(json!({"success": true, "message": format!("Dataset {id} deleted")})))
}
