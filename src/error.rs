//! Error taxonomy for the shim API.
//!
//! Every variant maps to a stable `status` tag plus a human-readable
//! message, serialized as `{"status": ..., "message": ...}`. JWT and
//! remote-provider failures are never retried here: retrying a consumed
//! nonce or a non-idempotent courseWork create cannot succeed safely,
//! so the caller decides.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid fields: {}", .0.join(", "))]
    InvalidFields(Vec<String>),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Auth(&'static str),

    #[error("token signature could not be verified")]
    InvalidSignature,

    #[error("token expired or outside clock-skew tolerance")]
    ExpiredToken,

    #[error("no launch session matches this request")]
    UnknownState,

    #[error("launch session already consumed")]
    ReplaySession,

    #[error("malformed content item payload")]
    MalformedContentItem,

    #[error("assignment has no linked content item")]
    AssignmentNotLinked,

    #[error("remote provider error ({status}): {message}")]
    RemoteProvider { status: u16, message: String },

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable machine-readable tag for clients.
    pub fn status_tag(&self) -> &'static str {
        match self {
            ApiError::Validation(_) | ApiError::InvalidFields(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::Auth(_) => "auth_error",
            ApiError::InvalidSignature => "invalid_signature",
            ApiError::ExpiredToken => "expired_token",
            ApiError::UnknownState => "unknown_state",
            ApiError::ReplaySession => "replay_session",
            ApiError::MalformedContentItem => "malformed_content_item",
            ApiError::AssignmentNotLinked => "assignment_not_linked",
            ApiError::RemoteProvider { .. } => "remote_provider_error",
            ApiError::Db(sqlx::Error::RowNotFound) => "not_found",
            ApiError::Db(_) | ApiError::Internal(_) => "internal_error",
        }
    }

    fn http_status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::InvalidFields(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::InvalidSignature
            | ApiError::ExpiredToken
            | ApiError::UnknownState
            | ApiError::ReplaySession
            | ApiError::MalformedContentItem => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::AssignmentNotLinked => StatusCode::CONFLICT,
            // surface the provider's own status verbatim when it is a valid code
            ApiError::RemoteProvider { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ApiError::Db(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            ApiError::Db(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        if status.is_server_error() {
            tracing::error!(error = %self, "internal error");
        }
        let body = serde_json::json!({
            "status": self.status_tag(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_lists_fields() {
        let e = ApiError::InvalidFields(vec!["tool_login_url".into(), "redirect_uris".into()]);
        assert_eq!(e.status_tag(), "validation_error");
        assert_eq!(e.to_string(), "invalid fields: tool_login_url, redirect_uris");
    }

    #[test]
    fn remote_provider_surfaces_status() {
        let e = ApiError::RemoteProvider { status: 429, message: "quota".into() };
        assert_eq!(e.http_status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(e.status_tag(), "remote_provider_error");
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let e = ApiError::Db(sqlx::Error::RowNotFound);
        assert_eq!(e.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(e.status_tag(), "not_found");
    }
}
