//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and its mapping
//! onto HTTP responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use gallery_core::{GalleryError, PortError};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::config::ConfigError;
use crate::web::token::TokenError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An error from a core gallery operation.
    #[error(transparent)]
    Gallery(#[from] GalleryError),

    /// The bearer token could not be verified or issued.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// No bearer token accompanied a protected request.
    #[error("Missing bearer token")]
    MissingToken,

    /// A malformed request rejected before reaching the core.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PortError> for ApiError {
    fn from(e: PortError) -> Self {
        ApiError::Gallery(GalleryError::Port(e))
    }
}

/// The JSON body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable reason, e.g. `token_expired` or `reauth_required`.
    pub error: String,
    pub detail: String,
    /// Seconds to wait before retrying; only present on 429.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ApiError {
    /// The status code and machine-readable reason for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Gallery(e) => match e {
                GalleryError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
                GalleryError::InvalidLoginSession => {
                    (StatusCode::UNAUTHORIZED, "invalid_login_session")
                }
                GalleryError::ReauthRequired => (StatusCode::UNAUTHORIZED, "reauth_required"),
                GalleryError::Port(p) => match p {
                    PortError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                    PortError::Unauthorized => (StatusCode::UNAUTHORIZED, "reauth_required"),
                    PortError::FloodWait(_) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
                    PortError::InvalidCode => (StatusCode::UNAUTHORIZED, "invalid_code"),
                    PortError::PasswordRequired => (StatusCode::UNAUTHORIZED, "password_needed"),
                    PortError::InvalidPassword => (StatusCode::UNAUTHORIZED, "invalid_password"),
                    PortError::CodeAlreadySent => (StatusCode::BAD_REQUEST, "code_already_sent"),
                    PortError::Unexpected(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
                },
            },
            ApiError::Token(TokenError::Expired) => (StatusCode::UNAUTHORIZED, "token_expired"),
            ApiError::Token(TokenError::Invalid) => (StatusCode::UNAUTHORIZED, "invalid_token"),
            ApiError::Token(TokenError::Signing(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
            ApiError::MissingToken => (StatusCode::UNAUTHORIZED, "missing_token"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::Config(_) | ApiError::Database(_) | ApiError::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        }
    }

    fn retry_after(&self) -> Option<u64> {
        match self {
            ApiError::Gallery(GalleryError::Port(PortError::FloodWait(seconds))) => Some(*seconds),
            _ => None,
        }
    }

    /// The message shown to the caller. Infrastructure failures are reduced to
    /// a generic sentence; their details only go to the log.
    fn detail(&self) -> String {
        match self {
            ApiError::Config(_) | ApiError::Database(_) | ApiError::Io(_) => {
                "An internal error occurred.".to_string()
            }
            ApiError::Token(TokenError::Signing(_)) => "Could not issue a token.".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!("Request failed: {:?}", self);
        }

        let retry_after = self.retry_after();
        let body = ErrorBody {
            error: code.to_string(),
            detail: self.detail(),
            retry_after,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases: Vec<(ApiError, StatusCode, &str)> = vec![
            (
                GalleryError::Validation("phone".into()).into(),
                StatusCode::BAD_REQUEST,
                "invalid_request",
            ),
            (PortError::CodeAlreadySent.into(), StatusCode::BAD_REQUEST, "code_already_sent"),
            (ApiError::MissingToken, StatusCode::UNAUTHORIZED, "missing_token"),
            (TokenError::Invalid.into(), StatusCode::UNAUTHORIZED, "invalid_token"),
            (TokenError::Expired.into(), StatusCode::UNAUTHORIZED, "token_expired"),
            (GalleryError::ReauthRequired.into(), StatusCode::UNAUTHORIZED, "reauth_required"),
            (
                GalleryError::InvalidLoginSession.into(),
                StatusCode::UNAUTHORIZED,
                "invalid_login_session",
            ),
            (PortError::InvalidCode.into(), StatusCode::UNAUTHORIZED, "invalid_code"),
            (PortError::InvalidPassword.into(), StatusCode::UNAUTHORIZED, "invalid_password"),
            (PortError::FloodWait(30).into(), StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            (
                PortError::NotFound("Photo not found.".into()).into(),
                StatusCode::NOT_FOUND,
                "not_found",
            ),
            (
                PortError::Unexpected("boom".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
            ),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status_and_code(), (status, code), "{:?}", err);
        }
    }

    #[tokio::test]
    async fn flood_wait_surfaces_seconds_verbatim() {
        let response = ApiError::from(PortError::FloodWait(42)).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
        let body = body_json(response).await;
        assert_eq!(body["error"], "rate_limited");
        assert_eq!(body["retry_after"], 42);
    }

    #[tokio::test]
    async fn internal_details_stay_out_of_the_body() {
        let response =
            ApiError::from(std::io::Error::other("scratch dir /srv/uploads: permission denied"))
                .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "internal");
        assert!(!body["detail"].as_str().unwrap().contains("/srv/uploads"));
        assert!(body.get("retry_after").is_none());
    }
}
