// src/error.rs

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::episode::IdentifierError;
use crate::upstream::UpstreamError;

/// Errors surfaced to HTTP callers as `{"error": ...}` bodies.
///
/// Per-server fetch failures never appear here: the aggregator logs them and
/// omits the server. A broken cache never appears here either; it degrades
/// to direct upstream calls.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} is required")]
    MissingParam(&'static str),
    #[error("{0}")]
    InvalidIdentifier(#[from] IdentifierError),
    #[error("type must be \"sub\" or \"dub\", got {0:?}")]
    InvalidTrack(String),
    #[error("unknown server {0:?}")]
    UnknownServer(String),
    #[error("upstream unavailable: {0}")]
    Upstream(#[from] UpstreamError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingParam(_)
            | ApiError::InvalidIdentifier(_)
            | ApiError::InvalidTrack(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownServer(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Presence check for required, non-empty query parameters.
pub fn require_param<'a>(name: &'static str, value: &'a str) -> Result<&'a str, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::MissingParam(name));
    }
    Ok(trimmed)
}
