use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;

use super::RequestClient;
use crate::{
    dtos::auth::{ChallengeResponse, LoginRequest, TokenResponse},
    services::{LoginCommand, LoginOutcome},
    utils::{Password, ValidatedJson},
    AppState,
};

/// Login with username and password
///
/// Principals with a second factor receive a short-lived challenge token
/// (202) unless a valid backup code is supplied.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenResponse),
        (status = 202, description = "Second factor required", body = ChallengeResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Invalid backup code", body = ErrorResponse),
        (status = 429, description = "Too many login attempts", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    RequestClient(client): RequestClient,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Response, AppError> {
    let command = LoginCommand {
        tenant: req.tenant,
        username: req.username,
        password: Password::new(req.password),
        backup_code: req.backup_code,
    };

    let response = match state.sessions.login(command, client).await? {
        LoginOutcome::Authenticated(issued) => {
            (StatusCode::OK, Json(TokenResponse::from(issued))).into_response()
        }
        LoginOutcome::ChallengeIssued(issued) => (
            StatusCode::ACCEPTED,
            Json(ChallengeResponse::new(
                "Second factor required. Submit a TOTP code to /s/auth/2fa/verify",
                issued,
            )),
        )
            .into_response(),
    };

    Ok(response)
}
