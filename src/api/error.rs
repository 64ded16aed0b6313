//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::archive::{ArchiveError, StorageError};
use crate::assistant::AssistantError;
use crate::auth::AuthError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced to HTTP clients.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    ServiceUnavailable(String),
    BadGateway(String),
    Internal(String),
}

impl ApiError {
    /// Categorize an untyped repository error by its message.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("not found") || lowered.contains("no rows") {
            ApiError::NotFound(message)
        } else if lowered.contains("unique constraint") || lowered.contains("foreign key") {
            ApiError::BadRequest(message)
        } else {
            ApiError::Internal(message)
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::NotFound(m)
            | ApiError::BadRequest(m)
            | ApiError::Unauthorized(m)
            | ApiError::ServiceUnavailable(m)
            | ApiError::BadGateway(m)
            | ApiError::Internal(m) => m,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, message = self.message(), "request failed");
        }
        // Internal detail stays in the log, not the body.
        let body = match &self {
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.message().to_string(),
        };
        (status, Json(json!({ "error": body }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::from_anyhow(err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Disabled => {
                ApiError::ServiceUnavailable("Authentication is disabled".to_string())
            }
            AuthError::InvalidSharedSecret => {
                ApiError::Unauthorized("Unable to verify credentials".to_string())
            }
            AuthError::MissingToken => ApiError::Unauthorized("No token provided".to_string()),
            AuthError::InvalidToken(_) => {
                ApiError::Unauthorized("Unable to verify credentials".to_string())
            }
        }
    }
}

impl From<AssistantError> for ApiError {
    fn from(err: AssistantError) -> Self {
        match err {
            AssistantError::Disabled => {
                ApiError::ServiceUnavailable("Assistant integration is disabled".to_string())
            }
            other => ApiError::BadGateway(other.to_string()),
        }
    }
}

impl From<ArchiveError> for ApiError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Storage(StorageError::NotFound { .. }) => {
                ApiError::NotFound("Archived messages not found".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_anyhow_categorizes_by_message() {
        assert!(matches!(
            ApiError::from_anyhow(anyhow::anyhow!("row not found")),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from_anyhow(anyhow::anyhow!("UNIQUE constraint failed")),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from_anyhow(anyhow::anyhow!("disk on fire")),
            ApiError::Internal(_)
        ));
    }

    #[test]
    fn missing_archive_object_maps_to_not_found() {
        let err = ArchiveError::Storage(StorageError::NotFound {
            bucket: "b".to_string(),
            name: "n".to_string(),
        });
        assert!(matches!(ApiError::from(err), ApiError::NotFound(_)));
    }
}
