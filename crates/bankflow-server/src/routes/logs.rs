//! Log file reading with a path-traversal guard.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use bankflow::Error;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(read_logs))
        .route("/files", get(list_files))
}

#[derive(Deserialize, Default)]
struct LogsQuery {
    file: Option<String>,
    level: Option<String>,
    search: Option<String>,
    limit: Option<usize>,
}

fn list_log_files(logs_dir: &std::path::Path) -> Vec<(String, u64, std::time::SystemTime)> {
    let Ok(entries) = std::fs::read_dir(logs_dir) else {
        return Vec::new();
    };
    let mut files: Vec<(String, u64, std::time::SystemTime)> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let path = e.path();
            let meta = e.metadata().ok()?;
            if !meta.is_file() || path.extension().and_then(|x| x.to_str()) != Some("log") {
                return None;
            }
            Some((
                path.file_name()?.to_string_lossy().to_string(),
                meta.len(),
                meta.modified().ok()?,
            ))
        })
        .collect();
    files.sort_by(|a, b| b.2.cmp(&a.2));
    files
}

/// Resolve a requested file name inside the logs directory. Anything that
/// escapes the directory after resolution is refused.
fn resolve_log_file(
    logs_dir: &std::path::Path,
    requested: &str,
) -> Result<std::path::PathBuf, Error> {
    let candidate = logs_dir.join(requested);
    let canonical_dir = logs_dir
        .canonicalize()
        .map_err(|e| Error::data(format!("Logs directory unavailable: {e}")))?;
    let canonical = candidate
        .canonicalize()
        .map_err(|_| Error::validation(format!("Log file '{requested}' not found")))?;
    if !canonical.starts_with(&canonical_dir) {
        return Err(Error::validation("Invalid log file path"));
    }
    if !canonical.is_file() {
        return Err(Error::validation(format!("Log file '{requested}' not found")));
    }
    Ok(canonical)
}

async fn read_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<Value>> {
    let logs_dir = state.settings.logs_dir();
    let limit = query.limit.unwrap_or(200).clamp(1, 2000);

    let result = tokio::task::spawn_blocking(move || -> Result<Value, Error> {
        if !logs_dir.exists() {
            return Ok(json!({"files": [], "entries": [], "message": "No logs directory found"}));
        }
        let files = list_log_files(&logs_dir);
        let file_list: Vec<Value> = files
            .iter()
            .map(|(name, size, _)| json!({"name": name, "size": size}))
            .collect();

        let target = match &query.file {
            Some(requested) => resolve_log_file(&logs_dir, requested)?,
            None => match files.first() {
                Some((name, _, _)) => logs_dir.join(name),
                None => {
                    return Ok(
                        json!({"files": [], "entries": [], "message": "No log files found"}),
                    )
                }
            },
        };

        let raw = std::fs::read_to_string(&target)
            .map_err(|e| Error::data(format!("Error reading log: {e}")))?;

        let mut entries = Vec::new();
        for line in raw.lines().rev() {
            if entries.len() >= limit {
                break;
            }
            // JSON log lines carry structured level/message fields; plain
            // lines pass through as info.
            let (level, message) = match serde_json::from_str::<Value>(line) {
                Ok(parsed) => (
                    parsed["level"]
                        .as_str()
                        .unwrap_or("info")
                        .to_lowercase(),
                    parsed["fields"]["message"]
                        .as_str()
                        .or_else(|| parsed["message"].as_str())
                        .unwrap_or(line)
                        .to_string(),
                ),
                Err(_) => ("info".to_string(), line.to_string()),
            };

            if let Some(wanted) = &query.level {
                if !level.eq_ignore_ascii_case(wanted) {
                    continue;
                }
            }
            if let Some(search) = &query.search {
                if !message.to_lowercase().contains(&search.to_lowercase()) {
                    continue;
                }
            }
            entries.push(json!({"level": level, "msg": message}));
        }
        entries.reverse();

        Ok(json!({
            "files": file_list,
            "entries": entries,
            "current_file": target.file_name().map(|f| f.to_string_lossy().to_string()),
        }))
    })
    .await
    .map_err(|e| ApiError(Error::model(format!("Log read task failed: {e}"))))??;

    Ok(Json(result))
}

async fn list_files(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let logs_dir = state.settings.logs_dir();
    let files = tokio::task::spawn_blocking(move || {
        list_log_files(&logs_dir)
            .into_iter()
            .map(|(name, size, _)| json!({"name": name, "size": size}))
            .collect::<Vec<Value>>()
    })
    .await
    .map_err(|e| ApiError(Error::model(format!("Log list task failed: {e}"))))?;
    Ok(Json(json!(files)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.log"), "line\n").unwrap();

        assert!(resolve_log_file(dir.path(), "app.log").is_ok());
        // Escapes land on Validation, never on a file open.
        assert!(resolve_log_file(dir.path(), "../etc/passwd").is_err());
        assert!(resolve_log_file(dir.path(), "../../etc/passwd").is_err());
        assert!(resolve_log_file(dir.path(), "missing.log").is_err());
    }

    #[test]
    fn test_resolve_rejects_symlink_escape() {
        #[cfg(unix)]
        {
            let dir = tempfile::tempdir().unwrap();
            let outside = tempfile::tempdir().unwrap();
            std::fs::write(outside.path().join("secret.txt"), "x").unwrap();
            std::os::unix::fs::symlink(
                outside.path().join("secret.txt"),
                dir.path().join("sneaky.log"),
            )
            .unwrap();
            // The canonicalized target is outside the logs dir.
            assert!(resolve_log_file(dir.path(), "sneaky.log").is_err());
        }
    }

    #[test]
    fn test_list_log_files_filters_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.log"), "x").unwrap();
        std::fs::write(dir.path().join("b.txt"), "x").unwrap();
        let files = list_log_files(dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "a.log");
    }
}
