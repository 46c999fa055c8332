//! Public endpoints: health probe and the department catalog.

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/departments", get(departments))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "bankflow-admin",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Static department catalog consumed by the admin UI.
async fn departments() -> Json<Value> {
    Json(json!([
        {"id": "risk", "name": "Risk Management", "description": "Enterprise risk assessment and mitigation strategies"},
        {"id": "credit", "name": "Credit Analysis", "description": "Credit underwriting and portfolio management"},
        {"id": "fraud", "name": "Fraud Detection", "description": "Real-time fraud prevention and detection systems"},
        {"id": "customer", "name": "Customer Analytics", "description": "Customer insights and personalization"},
        {"id": "compliance", "name": "Compliance", "description": "Regulatory compliance and reporting"},
        {"id": "treasury", "name": "Treasury", "description": "Treasury operations and cash management"},
        {"id": "retail", "name": "Retail Banking", "description": "Retail banking products and services"},
        {"id": "investment", "name": "Investment Banking", "description": "Investment analysis and portfolio management"},
    ]))
}
