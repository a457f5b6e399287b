//! Error taxonomy shared by every subsystem.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArgoError>;

#[derive(Debug, Error)]
pub enum ArgoError {
    /// The external message store is missing or cannot be opened.
    #[error("message source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Rejected before any side effect.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Embedding or completion failure, propagated untouched from the provider.
    #[error("model provider error: {0}")]
    Provider(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ArgoError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Stable machine-readable tag, used as the `type` field of error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation_error",
            Self::Provider(_) => "provider_error",
            Self::Storage(_) => "storage_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Provider(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for ArgoError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<r2d2::Error> for ArgoError {
    fn from(e: r2d2::Error) -> Self {
        Self::Storage(format!("failed to get connection from pool: {}", e))
    }
}

impl From<bincode::Error> for ArgoError {
    fn from(e: bincode::Error) -> Self {
        Self::Storage(format!("embedding encoding error: {}", e))
    }
}

impl From<serde_json::Error> for ArgoError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("metadata JSON error: {}", e))
    }
}

impl From<validator::ValidationErrors> for ArgoError {
    fn from(e: validator::ValidationErrors) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<reqwest::Error> for ArgoError {
    fn from(e: reqwest::Error) -> Self {
        Self::Provider(e.to_string())
    }
}

impl IntoResponse for ArgoError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.to_string(),
            "type": self.kind(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_map_to_statuses() {
        let cases = [
            (ArgoError::SourceUnavailable("gone".into()), StatusCode::SERVICE_UNAVAILABLE, "source_unavailable"),
            (ArgoError::not_found("discussion abc"), StatusCode::NOT_FOUND, "not_found"),
            (ArgoError::validation("empty"), StatusCode::BAD_REQUEST, "validation_error"),
            (ArgoError::provider("timeout"), StatusCode::BAD_GATEWAY, "provider_error"),
            (ArgoError::storage("locked"), StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        ];
        for (err, status, kind) in cases {
            assert_eq!(err.status_code(), status);
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn test_not_found_message() {
        let err = ArgoError::not_found("discussion abc");
        assert_eq!(err.to_string(), "discussion abc not found");
    }

    #[test]
    fn test_rusqlite_errors_are_storage() {
        let err: ArgoError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.kind(), "storage_error");
    }
}
