/// Unified error types for the CratePilot backend
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the backend
#[derive(Error, Debug)]
pub enum AppError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Missing, invalid or expired credential with no viable refresh
    #[error("Authentication failed: {0}")]
    Unauthenticated(String),

    /// Entitlement store unreachable during resolution
    #[error("Entitlement lookup failed: {0}")]
    EntitlementLookupFailed(String),

    /// Free-tier daily export cap reached
    #[error("Daily export limit reached")]
    QuotaExceeded { exports_today: u32, limit: u32 },

    /// Global or per-caller rate window exhausted
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    /// Uploaded library database missing from storage
    #[error("Library database not found: {0}")]
    ResourceNotFound(String),

    /// Playlist exceeds the free-tier track-count ceiling
    #[error("Playlist exceeds the free tier track limit")]
    PlaylistTooLarge,

    /// The external import operation failed
    #[error("Import failed: {0}")]
    UpstreamOperationFailed(String),

    /// Client went away mid-stream; never surfaced to a caller
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Library / artifact storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Structured error response body
///
/// Every user-visible failure carries a machine tag and a human message.
/// Quota and upgrade-relevant errors carry extra fields so a client can render
/// an upgrade call-to-action without string-matching the message.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exports_today: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_required: Option<bool>,
}

impl ErrorResponse {
    fn new(error: &str, message: String) -> Self {
        Self {
            error: error.to_string(),
            message,
            exports_today: None,
            limit: None,
            retry_after: None,
            upgrade_required: None,
        }
    }
}

/// Convert AppError to HTTP response
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Unauthenticated(_) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("Unauthenticated", "Please sign in to continue".to_string()),
            ),
            AppError::EntitlementLookupFailed(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(
                    "EntitlementLookupFailed",
                    "Could not load your account details, please try again".to_string(),
                ),
            ),
            AppError::QuotaExceeded {
                exports_today,
                limit,
            } => {
                let mut body = ErrorResponse::new(
                    "QuotaExceeded",
                    format!(
                        "Daily export limit reached ({}/{}). Upgrade to premium for unlimited exports.",
                        exports_today, limit
                    ),
                );
                body.exports_today = Some(exports_today);
                body.limit = Some(limit);
                body.upgrade_required = Some(true);
                (StatusCode::TOO_MANY_REQUESTS, body)
            }
            AppError::RateLimited { retry_after_secs } => {
                let mut body = ErrorResponse::new(
                    "RateLimited",
                    format!("Too many requests, retry in {} seconds", retry_after_secs),
                );
                body.retry_after = Some(retry_after_secs);
                (StatusCode::TOO_MANY_REQUESTS, body)
            }
            AppError::ResourceNotFound(ref name) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new(
                    "ResourceNotFound",
                    format!(
                        "Library database \"{}\" not found. Please upload a database first.",
                        name
                    ),
                ),
            ),
            AppError::PlaylistTooLarge => {
                let mut body = ErrorResponse::new(
                    "PlaylistTooLarge",
                    "This playlist exceeds the free tier track limit. Upgrade to premium to process larger playlists."
                        .to_string(),
                );
                body.upgrade_required = Some(true);
                (StatusCode::FORBIDDEN, body)
            }
            AppError::UpstreamOperationFailed(ref msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("ImportFailed", msg.clone()),
            ),
            AppError::Validation(ref msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("InvalidRequest", msg.clone()),
            ),
            AppError::ClientDisconnected => {
                // The connection is gone; this body is never actually written.
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("ClientDisconnected", "Client disconnected".to_string()),
                )
            }
            AppError::Database(_) | AppError::Io(_) | AppError::Storage(_) | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                // Don't leak details
                ErrorResponse::new("InternalServerError", "Internal server error".to_string()),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for backend operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exceeded_body() {
        let err = AppError::QuotaExceeded {
            exports_today: 1,
            limit: 1,
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_internal_error_does_not_leak() {
        let err = AppError::Internal("secret connection string".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_unauthenticated_status() {
        let err = AppError::Unauthenticated("bad token".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_error_response_serialization() {
        let mut body = ErrorResponse::new("QuotaExceeded", "limit reached".to_string());
        body.exports_today = Some(1);
        body.limit = Some(1);
        body.upgrade_required = Some(true);

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "QuotaExceeded");
        assert_eq!(json["exports_today"], 1);
        assert_eq!(json["limit"], 1);
        assert_eq!(json["upgrade_required"], true);
        // Unset extension fields are omitted entirely
        assert!(json.get("retry_after").is_none());
    }
}
