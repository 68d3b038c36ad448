//! JSON rendering of domain errors.

use crate::error::{AuthError, SyncError, TaggingError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn error_response(status: StatusCode, kind: &'static str, message: String) -> Response {
    if status.is_server_error() {
        error!("{} ({}): {}", status, kind, message);
    }
    (
        status,
        Json(ErrorBody {
            error: kind,
            message,
        }),
    )
        .into_response()
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::MissingConfiguration(_) | AuthError::Persist(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AuthError::CorruptCredentialFile { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::ExchangeFailed(_) => StatusCode::BAD_GATEWAY,
            AuthError::LoginStateMismatch => StatusCode::BAD_REQUEST,
            AuthError::NoCredential
            | AuthError::ReauthenticationRequired
            | AuthError::Rejected => StatusCode::UNAUTHORIZED,
        };
        error_response(status, self.kind(), self.to_string())
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = match self {
            SyncError::Auth(e) => return e.into_response(),
            SyncError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            SyncError::Network { .. } | SyncError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
            SyncError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SyncError::CycleInProgress => StatusCode::CONFLICT,
        };
        error_response(status, self.kind(), self.to_string())
    }
}

impl IntoResponse for TaggingError {
    fn into_response(self) -> Response {
        let status = match self {
            TaggingError::MoodOutOfRange { .. } => StatusCode::BAD_REQUEST,
            TaggingError::PlayNotFound(_) => StatusCode::NOT_FOUND,
            TaggingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, self.kind(), self.to_string())
    }
}
