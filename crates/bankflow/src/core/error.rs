//! Error types for the BankFlow platform.
//!
//! Services and repositories raise these; HTTP status mapping happens once,
//! in the server crate. Handlers never see transport errors leak out of the
//! domain layer.

use thiserror::Error;

/// BankFlow result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Domain errors. The variant determines the HTTP status the server renders:
/// NotFound 404, Validation 400, Data 422, Model 500, ExternalService 502.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Input violates a schema or business rule.
    #[error("{0}")]
    Validation(String),

    /// Data on disk is unreadable or malformed.
    #[error("{0}")]
    Data(String),

    /// Training or scoring pipeline internal failure.
    #[error("{0}")]
    Model(String),

    /// External service (LLM endpoint, external DB) unavailable or failed.
    #[error("{0}")]
    ExternalService(String),
}

impl Error {
    /// Entity-not-found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Validation failure.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Malformed or unreadable data.
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// Internal model/pipeline failure.
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// External collaborator failure.
    pub fn external(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Data(format!("IO error: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Data(format!("JSON error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_message() {
        let err = Error::not_found("Dataset 42 not found");
        assert_eq!(err.to_string(), "Dataset 42 not found");
    }

    #[test]
    fn test_io_error_maps_to_data() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Data(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_json_error_maps_to_data() {
        let parse = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err: Error = parse.into();
        assert!(matches!(err, Error::Data(_)));
    }
}
