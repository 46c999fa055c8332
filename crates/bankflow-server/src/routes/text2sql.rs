//! Text2SQL: schema introspection, LLM generation, gated execution.
//!
//! Execution is strictly read-only: SELECT-only after normalization, a
//! forbidden-keyword check, a read-only SQLite connection with
//! `query_only` on, and a 1000-row cap with a `has_more` flag.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use bankflow::core::sanitize::sanitize_table_name;
use bankflow::Error;
use rusqlite::OpenFlags;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const ROW_CAP: usize = 1000;
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "EXEC", "GRANT", "REVOKE",
];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/schema", get(get_schema))
        .route("/generate", post(generate))
        .route("/execute", post(execute))
        .route("/history", get(history))
}

#[derive(Deserialize)]
struct GenerateRequest {
    natural_language: String,
}

#[derive(Deserialize)]
struct ExecuteRequest {
    sql: String,
}

/// Validate a statement against the read-only gate.
fn check_read_only(sql: &str) -> Result<(), Error> {
    let normalized = sql.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
    if !normalized.starts_with("SELECT") {
        return Err(Error::validation("Only SELECT statements are allowed"));
    }
    for keyword in FORBIDDEN_KEYWORDS {
        let pattern = format!(r"\b{keyword}\b");
        if regex::Regex::new(&pattern)
            .map(|re| re.is_match(&normalized))
            .unwrap_or(false)
        {
            return Err(Error::validation(format!(
                "Statement contains forbidden keyword: {keyword}"
            )));
        }
    }
    Ok(())
}

fn schema_for(state: &AppState) -> Result<Value, Error> {
    let unified = state.settings.unified_db();
    if !unified.exists() {
        return Ok(json!({"tables": [], "message": "banking_unified.db not found"}));
    }

    let conn = rusqlite::Connection::open_with_flags(&unified, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| Error::data(format!("Schema introspection failed: {e}")))?;

    let mut names = Vec::new();
    {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .map_err(|e| Error::data(format!("Schema introspection failed: {e}")))?;
        let rows = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(|e| Error::data(format!("Schema introspection failed: {e}")))?;
        for row in rows {
            names.push(row.map_err(|e| Error::data(format!("Schema read failed: {e}")))?);
        }
    }

    let mut tables = Vec::new();
    for table in names {
        let Ok(safe) = sanitize_table_name(&table) else {
            continue;
        };
        let mut columns = Vec::new();
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info(\"{safe}\")"))
            .map_err(|e| Error::data(format!("Schema introspection failed: {e}")))?;
        let rows = stmt
            .query_map([], |r| {
                Ok(json!({
                    "cid": r.get::<_, i64>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "type": r.get::<_, String>(2)?,
                    "notnull": r.get::<_, i64>(3)? != 0,
                    "pk": r.get::<_, i64>(5)? != 0,
                }))
            })
            .map_err(|e| Error::data(format!("Schema introspection failed: {e}")))?;
        for row in rows {
            columns.push(row.map_err(|e| Error::data(format!("Schema read failed: {e}")))?);
        }

        let row_count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{safe}\""), [], |r| r.get(0))
            .unwrap_or(0);
        tables.push(json!({"table": table, "columns": columns, "rows": row_count}));
    }

    Ok(json!({"tables": tables}))
}

async fn get_schema(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let schema = tokio::task::spawn_blocking(move || schema_for(&state))
        .await
        .map_err(|e| ApiError(Error::model(format!("Schema task failed: {e}"))))??;
    Ok(Json(schema))
}

async fn generate(
    State(state): State<AppState>,
    Json(body): Json<GenerateRequest>,
) -> ApiResult<Json<Value>> {
    if body.natural_language.trim().is_empty() {
        return Err(ApiError(Error::validation("Query text is required")));
    }

    let schema_state = state.clone();
    let schema = tokio::task::spawn_blocking(move || schema_for(&schema_state))
        .await
        .map_err(|e| ApiError(Error::model(format!("Schema task failed: {e}"))))??;

    let mut schema_text = String::new();
    if let Some(tables) = schema["tables"].as_array() {
        for table in tables {
            let columns = table["columns"]
                .as_array()
                .map(|cols| {
                    cols.iter()
                        .map(|c| {
                            format!(
                                "{} {}",
                                c["name"].as_str().unwrap_or("?"),
                                c["type"].as_str().unwrap_or("")
                            )
                        })
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            schema_text.push_str(&format!(
                "TABLE {} ({columns})\n",
                table["table"].as_str().unwrap_or("?")
            ));
        }
    }

    let generated =
        bankflow_ollama::text2sql::generate_sql(&state.ollama, &body.natural_language, &schema_text)
            .await?;
    state
        .text2sql
        .save_query(&body.natural_language, &generated.sql)?;

    Ok(Json(json!({
        "sql": generated.sql,
        "natural_language": body.natural_language,
        "fallback": generated.fallback,
    })))
}

async fn execute(
    State(state): State<AppState>,
    Json(body): Json<ExecuteRequest>,
) -> ApiResult<Json<Value>> {
    let sql = body.sql.trim().to_string();
    check_read_only(&sql)?;

    let unified = state.settings.unified_db();
    if !unified.exists() {
        return Err(ApiError(Error::not_found("banking_unified.db not found")));
    }

    let exec_sql = sql.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Value, Error> {
        let conn =
            rusqlite::Connection::open_with_flags(&unified, OpenFlags::SQLITE_OPEN_READ_ONLY)
                .map_err(|e| Error::data(format!("Could not open database: {e}")))?;
        conn.pragma_update(None, "query_only", "ON")
            .map_err(|e| Error::data(format!("Could not enforce read-only mode: {e}")))?;

        let started = std::time::Instant::now();
        let mut stmt = conn
            .prepare(&exec_sql)
            .map_err(|e| Error::validation(format!("SQL error: {e}")))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let column_count = columns.len();

        let mut rows = Vec::new();
        let mut has_more = false;
        let mut raw = stmt
            .query([])
            .map_err(|e| Error::validation(format!("SQL error: {e}")))?;
        while let Some(row) = raw
            .next()
            .map_err(|e| Error::validation(format!("SQL error: {e}")))?
        {
            if rows.len() >= ROW_CAP {
                has_more = true;
                break;
            }
            let mut out = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value = match row.get_ref(i) {
                    Ok(rusqlite::types::ValueRef::Null) => Value::Null,
                    Ok(rusqlite::types::ValueRef::Integer(v)) => json!(v),
                    Ok(rusqlite::types::ValueRef::Real(v)) => json!(v),
                    Ok(rusqlite::types::ValueRef::Text(v)) => {
                        json!(String::from_utf8_lossy(v).to_string())
                    }
                    Ok(rusqlite::types::ValueRef::Blob(v)) => json!(format!("<{} bytes>", v.len())),
                    Err(_) => Value::Null,
                };
                out.push(value);
            }
            rows.push(Value::Array(out));
        }

        Ok(json!({
            "columns": columns,
            "rows": rows,
            "row_count": rows.len(),
            "has_more": has_more,
            "elapsed_ms": started.elapsed().as_millis() as u64,
        }))
    })
    .await
    .map_err(|e| ApiError(Error::model(format!("Execution task failed: {e}"))))??;

    let row_count = result["row_count"].as_i64().unwrap_or(0);
    state.text2sql.mark_executed(&sql, row_count)?;
    state.audit.record(
        "sql_executed",
        &format!("Query returned {row_count} rows"),
        "info",
    );

    Ok(Json(result))
}

async fn history(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let entries = state.text2sql.list_history(20)?;
    Ok(Json(serde_json::to_value(entries).map_err(Error::from)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_allows_select() {
        assert!(check_read_only("SELECT 1").is_ok());
        assert!(check_read_only("  select *\n from accounts ").is_ok());
    }

    #[test]
    fn test_gate_rejects_non_select() {
        assert!(check_read_only("PRAGMA table_info(x)").is_err());
        assert!(check_read_only("").is_err());
    }

    #[test]
    fn test_gate_rejects_forbidden_keywords() {
        for sql in [
            "DROP TABLE datasets",
            "SELECT * FROM x; DROP TABLE y",
            "SELECT * FROM accounts WHERE id IN (DELETE FROM t)",
            "SELECT 1; UPDATE jobs SET status='x'",
            "SELECT * INTO OUTFILE; GRANT ALL",
        ] {
            let err = check_read_only(sql).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{sql}");
        }
    }

    #[test]
    fn test_gate_error_names_keyword() {
        let err = check_read_only("SELECT 1; DROP TABLE datasets").unwrap_err();
        assert!(err.to_string().contains("DROP"));
    }

    #[test]
    fn test_gate_keyword_is_word_bounded() {
        // "created_at" contains CREATE but is not the keyword.
        assert!(check_read_only("SELECT created_at FROM jobs").is_ok());
        assert!(check_read_only("SELECT updated, deleted_flag FROM t").is_ok());
    }
}
