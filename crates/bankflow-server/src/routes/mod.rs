//! Route handlers, one module per resource.

mod alerts;
mod audit;
mod compare;
mod export;
mod health;
mod integrations;
mod jobs;
mod logs;
mod monitoring;
mod process;
mod regulatory;
mod scoring;
mod stats;
mod text2sql;
mod training;
mod upload;

use axum::Router;

use crate::state::AppState;

/// Assemble the full API router.
pub fn api_router(state: AppState) -> Router {
    let admin = Router::new()
        .merge(upload::routes())
        .nest("/stats", stats::routes())
        .nest("/scoring", scoring::routes())
        .nest("/training", training::routes())
        .nest("/integrations", integrations::routes())
        .nest("/monitoring", monitoring::routes())
        .nest("/jobs", jobs::routes())
        .nest("/text2sql", text2sql::routes())
        .nest("/logs", logs::routes())
        .nest("/alerts", alerts::routes())
        .nest("/process", process::routes())
        .nest("/export", export::routes())
        .nest("/regulatory", regulatory::routes())
        .nest("/compare", compare::routes())
        .nest("/audit", audit::routes());

    Router::new()
        .nest("/api/admin", admin)
        .merge(health::routes())
        .with_state(state)
}
