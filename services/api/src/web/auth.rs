//! services/api/src/web/auth.rs
//!
//! Login endpoints driving the phone → code → password flow, plus the
//! session status and logout endpoints.

use axum::{extract::State, Extension, Json};
use gallery_core::{UserId, VerifyOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use crate::error::{ApiError, ErrorBody};
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SendCodeRequest {
    #[serde(default)]
    pub phone: String,
}

#[derive(Serialize, ToSchema)]
pub struct SendCodeResponse {
    /// Always `code_sent`.
    pub status: String,
    /// Identifies the login attempt in the following verify call.
    pub session_id: String,
    pub message: String,
}

#[derive(Deserialize, ToSchema)]
pub struct VerifyRequest {
    #[serde(default)]
    pub session_id: String,
    pub code: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct VerifyResponse {
    /// `password_needed` or `login_successful`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct AuthStatusResponse {
    pub is_logged_in: bool,
}

#[derive(Serialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /api/login/send-code - Ask Telegram to send a login code
#[utoipa::path(
    post,
    path = "/api/login/send-code",
    request_body = SendCodeRequest,
    responses(
        (status = 200, description = "Code sent", body = SendCodeResponse),
        (status = 400, description = "Missing phone or code already sent", body = ErrorBody),
        (status = 429, description = "Rate limited by Telegram", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
pub async fn send_code_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendCodeRequest>,
) -> Result<Json<SendCodeResponse>, ApiError> {
    let session_id = state.gallery.request_code(&req.phone).await?;
    Ok(Json(SendCodeResponse {
        status: "code_sent".to_string(),
        session_id,
        message: "OTP has been sent to your Telegram account.".to_string(),
    }))
}

/// POST /api/login/verify - Submit the login code and, if asked, the 2FA password
#[utoipa::path(
    post,
    path = "/api/login/verify",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Password needed or login successful", body = VerifyResponse),
        (status = 400, description = "Missing code", body = ErrorBody),
        (status = 401, description = "Invalid code, password, or login session", body = ErrorBody),
        (status = 429, description = "Rate limited by Telegram", body = ErrorBody)
    )
)]
pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let outcome = state
        .gallery
        .verify(&req.session_id, req.code.as_deref(), req.password.as_deref())
        .await?;

    let response = match outcome {
        VerifyOutcome::PasswordNeeded => VerifyResponse {
            status: "password_needed".to_string(),
            token: None,
            message: Some(
                "Two-factor authentication is enabled. Please enter your password.".to_string(),
            ),
        },
        VerifyOutcome::Authorized(user_id) => {
            let token = state.tokens.issue(user_id)?;
            info!(%user_id, "Login successful");
            VerifyResponse {
                status: "login_successful".to_string(),
                token: Some(token),
                message: None,
            }
        }
    };
    Ok(Json(response))
}

/// GET /api/auth/status - Whether the bearer's Telegram session still authorizes
#[utoipa::path(
    get,
    path = "/api/auth/status",
    responses(
        (status = 200, description = "Session is live", body = AuthStatusResponse),
        (status = 401, description = "Token rejected or reauthentication required", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn auth_status_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<UserId>,
) -> Result<Json<AuthStatusResponse>, ApiError> {
    state.gallery.client(user_id).await?;
    Ok(Json(AuthStatusResponse { is_logged_in: true }))
}

/// POST /api/logout - End the Telegram session and forget it
#[utoipa::path(
    post,
    path = "/api/logout",
    responses(
        (status = 200, description = "Logged out", body = StatusResponse),
        (status = 401, description = "Token rejected", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<UserId>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.gallery.logout(user_id).await?;
    Ok(Json(StatusResponse {
        status: "logged_out".to_string(),
        message: "You have been logged out.".to_string(),
    }))
}
