//! BankFlow admin HTTP backend.
//!
//! Wires the repositories, the RAG pipeline, the scheduler, and the
//! training service behind an axum router. The middleware chain, applied
//! outermost-first: correlation id, API-key auth, CORS, rate limiting,
//! security headers, request body limit. Errors flow through the domain
//! taxonomy; handlers never build status codes by hand.

mod error;
mod middleware;
mod monitor;
mod routes;
mod state;

pub use error::{ApiError, ApiResult};
pub use middleware::RateLimiter;
pub use state::AppState;

use axum::middleware as axum_mw;
use axum::Router;
use bankflow::Result;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let max_body = state.settings.max_upload_size;

    routes::api_router(state.clone())
        // Innermost → outermost: the last layer added runs first.
        .layer(axum_mw::from_fn(middleware::security_headers_middleware))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::cors_middleware,
        ))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::api_key_middleware,
        ))
        .layer(axum_mw::from_fn(middleware::correlation_id_middleware))
        .layer(RequestBodyLimitLayer::new(max_body))
}

/// Serve until the shutdown signal future resolves.
pub async fn serve<F>(state: AppState, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let router = build_router(state);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| bankflow::Error::data(format!("Failed to bind {addr}: {e}")))?;
    info!(%addr, "Admin API listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| bankflow::Error::data(format!("Server error: {e}")))?;
    info!("Server shutdown complete");
    Ok(())
}
