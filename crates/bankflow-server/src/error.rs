//! Domain error → HTTP response mapping.
//!
//! This is the sole boundary where status codes exist. 4xx responses carry
//! the human-readable detail; 5xx responses carry a generic message, and
//! clients correlate with server logs via the `X-Correlation-ID` response
//! header. Stack traces never appear in bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bankflow::Error;
use serde_json::json;
use tracing::{error, warn};

/// Handler result alias.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Wrapper giving domain errors an HTTP rendering.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Data(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Model(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::ExternalService(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = if status.is_server_error() {
            error!(error = %self.0, "Request failed");
            json!({
                "detail": "Internal error",
                "info": "Correlate with server logs via X-Correlation-ID",
            })
        } else {
            warn!(error = %self.0, status = status.as_u16(), "Request rejected");
            json!({"detail": self.0.to_string()})
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError(Error::not_found("x")).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError(Error::validation("x")).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError(Error::data("x")).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError(Error::model("x")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError(Error::external("x")).status(), StatusCode::BAD_GATEWAY);
    }
}
