//! Middleware chain: correlation id, API-key auth, CORS, rate limiting,
//! security headers.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::Mutex;
use serde_json::json;
use tracing::Instrument;
use uuid::Uuid;

use crate::state::AppState;

/// Paths that never require the API key.
const PUBLIC_PATHS: &[&str] = &["/api/health", "/api/departments", "/docs", "/openapi.json"];

const ADMIN_PREFIX: &str = "/api/admin";

// ── Correlation ID ───────────────────────────────────────────────────────

/// Correlation-id request extension.
#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

/// Read `X-Correlation-ID` or mint a UUID; echo it on the response and
/// carry it in a tracing span so every log line is correlatable.
pub async fn correlation_id_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request
        .extensions_mut()
        .insert(CorrelationId(correlation_id.clone()));

    let span = tracing::info_span!("request", correlation_id = %correlation_id);
    let mut response = async { next.run(request).await }.instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert("x-correlation-id", value);
    }
    response
}

// ── API-key auth ─────────────────────────────────────────────────────────

/// When `BANKING_API_KEY` is configured, admin routes require
/// `Authorization: Bearer <key>` or `X-API-Key: <key>`. Public paths and
/// non-admin paths bypass.
pub async fn api_key_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.settings.api_key.as_deref() else {
        return next.run(request).await;
    };

    let path = request.uri().path();
    if PUBLIC_PATHS.contains(&path) || !path.starts_with(ADMIN_PREFIX) {
        return next.run(request).await;
    }

    let supplied = extract_api_key(request.headers());
    if supplied.as_deref() != Some(expected) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Invalid or missing API key"})),
        )
            .into_response();
    }
    next.run(request).await
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

// ── CORS ─────────────────────────────────────────────────────────────────

/// Allowlist CORS with credentials. The request origin is echoed only
/// when it appears in the configured allowlist; no wildcard fallback.
pub async fn cors_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let mut response = next.run(request).await;

    if let Some(origin) = origin {
        if state.settings.cors_origins.iter().any(|o| *o == origin) {
            if let Ok(value) = HeaderValue::from_str(&origin) {
                let headers = response.headers_mut();
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                    HeaderValue::from_static("true"),
                );
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_METHODS,
                    HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
                );
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_HEADERS,
                    HeaderValue::from_static(
                        "Content-Type, Authorization, X-Api-Key, X-Correlation-ID",
                    ),
                );
            }
        }
    }
    response
}

// ── Rate limiting ────────────────────────────────────────────────────────

/// In-memory sliding-window limiter, per client IP, admin paths only.
pub struct RateLimiter {
    requests_per_window: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(requests_per_window: u32) -> Self {
        Self {
            requests_per_window,
            window: Duration::from_secs(60),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request; `Err(retry_after_secs)` when over the limit.
    pub fn check_and_record(&self, client: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let timestamps = windows.entry(client.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.requests_per_window as usize {
            let oldest = timestamps.first().copied().unwrap_or(now);
            let retry_after = self
                .window
                .saturating_sub(now.duration_since(oldest))
                .as_secs()
                .max(1);
            return Err(retry_after);
        }
        timestamps.push(now);
        Ok(())
    }

    /// Drop windows with no recent activity.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        windows.retain(|_, timestamps| {
            timestamps.retain(|t| now.duration_since(*t) < self.window);
            !timestamps.is_empty()
        });
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !request.uri().path().starts_with(ADMIN_PREFIX) {
        return next.run(request).await;
    }

    let client = client_ip(request.headers());
    match state.rate_limiter.check_and_record(&client) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({"detail": "Too many requests"})),
            )
                .into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
    }
}

fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(ip) = forwarded.split(',').next() {
            let ip = ip.trim();
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
    }
    "unknown".to_string()
}

// ── Security headers ─────────────────────────────────────────────────────

pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
    response
}
