//! Integration configuration and connection testing.
//!
//! Tests perform real connection attempts for the known integration ids
//! (a TCP reachability check for pg and redis, an HTTP GET for restapi),
//! each with a 5 s budget, reporting latency and status. Unknown ids
//! report the configuration as saved without probing anything.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use bankflow::Error;
use serde_json::{json, Map, Value};

use crate::error::ApiResult;
use crate::state::AppState;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_integrations))
        .route("/:id", post(save_integration))
        .route("/:id/test", post(test_integration))
}

async fn list_integrations(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let integrations = state.integrations.list_all()?;
    Ok(Json(serde_json::to_value(integrations).map_err(Error::from)?))
}

async fn save_integration(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let config: Map<String, Value> = body
        .get("config")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    state.integrations.upsert(&id, config)?;
    state.audit.record(
        "integration_configured",
        &format!("Config saved for {id}"),
        "modify",
    );
    Ok(Json(json!({"success": true, "message": format!("Configuration saved for {id}")})))
}

fn config_str<'a>(config: &'a Map<String, Value>, key: &str, default: &'a str) -> &'a str {
    config.get(key).and_then(Value::as_str).unwrap_or(default)
}

async fn tcp_probe(host: &str, port: u16) -> Result<(), String> {
    match tokio::time::timeout(
        TEST_TIMEOUT,
        tokio::net::TcpStream::connect((host, port)),
    )
    .await
    {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(format!("Connection failed: {e}")),
        Err(_) => Err("Connection timed out".to_string()),
    }
}

async fn test_integration(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.integrations.ensure_seeded()?;
    let config = state.integrations.config_decrypted(&id)?;

    let started = std::time::Instant::now();
    let (success, message) = match id.as_str() {
        "pg" => {
            let host = config_str(&config, "host", "localhost").to_string();
            let port: u16 = config_str(&config, "port", "5432").parse().unwrap_or(5432);
            match tcp_probe(&host, port).await {
                Ok(()) => (true, "Connection successful".to_string()),
                Err(e) => (false, e),
            }
        }
        "redis" => {
            let host = config_str(&config, "host", "localhost").to_string();
            let port: u16 = config_str(&config, "port", "6379").parse().unwrap_or(6379);
            match tcp_probe(&host, port).await {
                Ok(()) => (true, "Connection successful".to_string()),
                Err(e) => (false, e),
            }
        }
        "restapi" => {
            let url = config_str(&config, "baseUrl", "").to_string();
            if url.is_empty() {
                (false, "No base URL configured".to_string())
            } else {
                match reqwest::Client::new()
                    .get(&url)
                    .timeout(TEST_TIMEOUT)
                    .send()
                    .await
                {
                    Ok(response) => {
                        let status = response.status();
                        (status.as_u16() < 500, format!("HTTP {status}"))
                    }
                    Err(e) => (false, format!("Connection failed: {e}")),
                }
            }
        }
        _ => {
            if config.is_empty() {
                (false, "No configuration provided".to_string())
            } else {
                (true, "Configuration saved (connection test simulated)".to_string())
            }
        }
    };
    let latency = started.elapsed().as_millis() as u64;

    if success {
        state.integrations.update_status(
            &id,
            "connected",
            Some(&chrono::Utc::now().to_rfc3339()),
        )?;
    } else {
        state.integrations.update_status(&id, "disconnected", None)?;
    }

    Ok(Json(json!({"success": success, "latency": latency, "message": message})))
}
