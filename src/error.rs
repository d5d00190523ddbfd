use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{repository::RepositoryError, storage::StorageError};

/// AppError
///
/// Every failure a handler can report. Validation and not-found conditions carry the
/// message shown to the client; persistence and filesystem failures are logged and
/// surfaced as an opaque 500.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),

    /// Owner, product, image or position absent.
    #[error("{0}")]
    NotFound(String),

    /// Missing, invalid or expired session, or an identity that may not act here.
    #[error("{0}")]
    Auth(String),

    #[error("Internal server error")]
    Repository(#[from] RepositoryError),

    #[error("Internal server error")]
    Storage(#[from] StorageError),

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            // Client-caused repository outcomes are reported like validation failures.
            Self::Repository(RepositoryError::Conflict(_))
            | Self::Repository(RepositoryError::ImageLimitReached(_)) => StatusCode::BAD_REQUEST,
            Self::Repository(_) | Self::Storage(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Repository(RepositoryError::Conflict(_)) => {
                "Username or profile slug already exists".to_string()
            }
            Self::Repository(RepositoryError::ImageLimitReached(max)) => {
                format!("Maximum {max} additional images allowed")
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            match &self {
                Self::Repository(e) => tracing::error!(error = ?e, "repository failure"),
                Self::Storage(e) => tracing::error!(error = ?e, "storage failure"),
                Self::Internal(detail) => tracing::error!(%detail, "internal failure"),
                _ => {}
            }
        }

        (status, Json(json!({ "error": self.client_message() }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
