//! Error types for sdw-pc
//!
//! Service-level errors using thiserror, plus the HTTP mapping used by the
//! API handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Main error type for the pump controller
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Predictor model could not be loaded
    #[error("Predictor error: {0}")]
    Predictor(String),

    /// Control loop produced or received a value it cannot commit
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Scenario name not in the preset table
    #[error("Invalid scenario '{0}' (expected one of: low, critical, optimal, full, normal)")]
    UnknownScenario(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience Result type using sdw-pc Error
pub type Result<T> = std::result::Result<T, Error>;

/// Error as returned to HTTP callers: `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::UnknownScenario(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_scenario_is_client_error() {
        let api: ApiError = Error::UnknownScenario("flood".to_string()).into();
        assert_eq!(api.status(), StatusCode::BAD_REQUEST);
        assert!(api.message.starts_with("Invalid scenario 'flood'"));
    }

    #[test]
    fn test_invalid_state_is_server_error() {
        let api: ApiError = Error::InvalidState("NaN level".to_string()).into();
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
