use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{RegisterRequest, RegisterResponse},
    services::RegisterCommand,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Register a principal together with a new organization it administers
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Principal registered", body = RegisterResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 409, description = "Organization name already exists", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let registration = state
        .registration
        .register(RegisterCommand {
            username: req.username,
            email: req.email,
            password: Password::new(req.password),
            organization: req.organization,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(RegisterResponse::from(registration))))
}
