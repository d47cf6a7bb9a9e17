//! API error type
//!
//! Every failure leaves a handler as a JSON body with an `error` message.
//! Failures from the prediction pipeline also carry a `kind`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use leafscan::LeafScanError;
use serde_json::json;
use thiserror::Error;

use crate::history::HistoryError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No image uploaded")]
    MissingImage,

    #[error("MongoDB not configured")]
    HistoryDisabled,

    #[error("{0}")]
    History(#[from] HistoryError),

    #[error("{0}")]
    Prediction(#[from] LeafScanError),

    #[error("Failed to store upload: {0}")]
    Upload(#[from] std::io::Error),

    #[error("File not found")]
    NotFound,

    #[error("Access denied")]
    Forbidden,

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingImage => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::HistoryDisabled
            | ApiError::History(_)
            | ApiError::Prediction(_)
            | ApiError::Upload(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable category for prediction failures
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            ApiError::Prediction(e) if e.is_input_error() => Some("invalid_image"),
            ApiError::Prediction(_) | ApiError::Internal(_) => Some("model_failure"),
            ApiError::Upload(_) => Some("upload_failure"),
            ApiError::History(_) => Some("history_failure"),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        let body = match self.kind() {
            Some(kind) => json!({ "error": self.to_string(), "kind": kind }),
            None => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
