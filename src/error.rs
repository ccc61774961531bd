use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Everything a room-directory operation can fail with. Every user-facing
/// call returns exactly one of these; store failures never crash the process.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid {field}: {reason}")]
    Validation {
        field: &'static str,
        reason: &'static str,
    },

    #[error("no room matches that code or id")]
    RoomNotFound,

    #[error("already a member of this room")]
    AlreadyMember,

    #[error("room is at capacity")]
    RoomFull,

    #[error("room has expired")]
    RoomExpired,

    #[error("no public rooms are open right now")]
    NoRoomsAvailable,

    /// Transient store failure. Surfaced to the caller so they can decide
    /// whether to retry; nothing in here retries non-idempotent writes.
    #[error("store unavailable: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("store operation timed out")]
    Timeout,

    #[error("tripcode derivation failed")]
    Hash,
}

impl ServiceError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::RoomNotFound | Self::NoRoomsAvailable => StatusCode::NOT_FOUND,
            Self::AlreadyMember | Self::RoomFull => StatusCode::CONFLICT,
            Self::RoomExpired => StatusCode::GONE,
            Self::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Hash => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_distinguish_client_and_server_faults() {
        assert_eq!(
            ServiceError::Validation { field: "name", reason: "must not be blank" }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ServiceError::RoomNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ServiceError::AlreadyMember.status(), StatusCode::CONFLICT);
        assert_eq!(ServiceError::RoomExpired.status(), StatusCode::GONE);
        assert_eq!(ServiceError::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
