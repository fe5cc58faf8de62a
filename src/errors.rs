use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

/// Error taxonomy for the booking engine. Payment-integrity failures
/// (`BadSignature`, `AmountMismatch`, `UnknownReference`) are surfaced here
/// for internal paths; the gateway-facing handlers never return them raw —
/// they answer the gateway's own acknowledgment contract instead.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("slot is no longer available")]
    SlotConflict,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("bookings can only be cancelled at least 6 hours before start")]
    TooLateToCancel,

    #[error("invalid gateway signature")]
    BadSignature,

    #[error("reported amount does not match the stored payment")]
    AmountMismatch,

    #[error("unknown payment reference")]
    UnknownReference,

    /// Idempotency short-circuit: the work was already done by an earlier
    /// call. Treated as success at the HTTP boundary.
    #[error("already processed")]
    AlreadyProcessed,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::SlotConflict => StatusCode::CONFLICT,
            // Opaque 403: no existence leak for resources the caller does
            // not own.
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::TooLateToCancel => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadSignature | ApiError::AmountMismatch => StatusCode::BAD_REQUEST,
            ApiError::UnknownReference => StatusCode::NOT_FOUND,
            ApiError::AlreadyProcessed => StatusCode::OK,
            ApiError::Storage(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let message = match &self {
            // Never leak storage details to callers.
            ApiError::Storage(e) => {
                tracing::error!("storage error: {:?}", e);
                "internal error".to_string()
            }
            ApiError::Internal(e) => {
                tracing::error!("internal error: {:?}", e);
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            success: status.is_success(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_status() {
        assert_eq!(ApiError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::SlotConflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(ApiError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::TooLateToCancel.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ApiError::AlreadyProcessed.status_code(), StatusCode::OK);
    }
}
