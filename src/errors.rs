use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Validation Error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        (status, Json(json!({"error":     message}))).into_response()
    }
}

/// Why a single webhook delivery attempt did not succeed.
///
/// The scanner treats every variant the same way; the distinction only
/// matters for log output.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("webhook url is missing or invalid: {0}")]
    InvalidUrl(String),

    #[error("webhook request timed out")]
    Timeout,

    #[error("webhook request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("webhook endpoint answered HTTP {0}")]
    Status(u16),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeliveryError::Timeout
        } else {
            DeliveryError::Transport(err)
        }
    }
}
