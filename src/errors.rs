use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy surfaced by every endpoint as a structured `{error}` body.
///
/// Handlers and services return this directly; lower-level failures (SQLx,
/// object store) convert into the `Internal`/`Upstream` variants.
#[derive(Debug, Error)]
pub enum AppError {
    /// No usable session/token on the request (401).
    #[error("{0}")]
    Unauthenticated(String),

    /// Role or ownership mismatch (403).
    #[error("{0}")]
    Forbidden(String),

    /// Malformed body or folder-type mismatch (400).
    #[error("{0}")]
    Validation(String),

    /// Missing project/folder/file/session (404).
    #[error("{0}")]
    NotFound(String),

    /// Folder cycle or similar structural conflict (400).
    #[error("{0}")]
    Conflict(String),

    /// A relayed part PUT exceeded its computed timeout (504).
    #[error("upstream request timed out after {timeout_secs}s ({size_bytes} bytes)")]
    UpstreamTimeout { size_bytes: u64, timeout_secs: u64 },

    /// The object store rejected or failed the request (502, or the
    /// upstream status when one was received).
    #[error("{message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    /// Anything else (500).
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) | AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::Upstream { status, .. } => status
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        if let AppError::UpstreamTimeout { size_bytes, .. } = &self {
            body["timeout"] = json!(true);
            body["sizeBytes"] = json!(size_bytes);
        }

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("record not found".into()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<s3::error::S3Error> for AppError {
    fn from(err: s3::error::S3Error) -> Self {
        AppError::Upstream {
            status: None,
            message: err.to_string(),
        }
    }
}
