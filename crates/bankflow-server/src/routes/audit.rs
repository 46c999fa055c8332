//! Audit trail listing.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use bankflow::Error;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(list_audit))
}

#[derive(Deserialize, Default)]
struct AuditQuery {
    limit: Option<usize>,
    entry_type: Option<String>,
}

async fn list_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let entries = state.audit.list_recent(limit, query.entry_type.as_deref())?;
    Ok(Json(serde_json::to_value(entries).map_err(Error::from)?))
}
