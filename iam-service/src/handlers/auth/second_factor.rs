use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::ChallengeResponse,
        second_factor::{BackupCodesResponse, DisableRequest, SetupResponse, VerifyRequest},
        MessageResponse,
    },
    middleware::AuthPrincipal,
    utils::{OptionalValidatedJson, ValidatedJson},
    AppState,
};

/// Provision a TOTP secret
///
/// The secret is stored but not enforced until the first code is verified.
#[utoipa::path(
    post,
    path = "/s/auth/2fa/setup",
    responses(
        (status = 200, description = "Secret provisioned", body = SetupResponse),
        (status = 401, description = "Unauthenticated", body = ErrorResponse),
        (status = 409, description = "Second factor already enabled", body = ErrorResponse)
    ),
    tag = "Second factor",
    security(("bearer_auth" = []))
)]
pub async fn setup(
    State(state): State<AppState>,
    AuthPrincipal(ctx): AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    let provisioned = state.sessions.setup_second_factor(&ctx.principal).await?;

    Ok(Json(SetupResponse {
        secret: provisioned.secret,
        provisioning_uri: provisioned.provisioning_uri,
    }))
}

/// Verify a TOTP code and receive a full session token
#[utoipa::path(
    post,
    path = "/s/auth/2fa/verify",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Code accepted", body = ChallengeResponse),
        (status = 400, description = "Second factor not set up", body = ErrorResponse),
        (status = 401, description = "Unauthenticated or challenge no longer valid", body = ErrorResponse),
        (status = 403, description = "Invalid code", body = ErrorResponse)
    ),
    tag = "Second factor",
    security(("bearer_auth" = []))
)]
pub async fn verify(
    State(state): State<AppState>,
    AuthPrincipal(ctx): AuthPrincipal,
    ValidatedJson(req): ValidatedJson<VerifyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let issued = state
        .sessions
        .verify_second_factor(&ctx.principal, &ctx.claims, &req.code)
        .await?;

    Ok(Json(ChallengeResponse::new("Second factor verified", issued)))
}

/// Disable the second factor and delete all backup codes
///
/// The body is optional; a principal without an enabled second factor may
/// send none.
#[utoipa::path(
    post,
    path = "/s/auth/2fa/disable",
    request_body = DisableRequest,
    responses(
        (status = 200, description = "Second factor disabled", body = MessageResponse),
        (status = 401, description = "Unauthenticated", body = ErrorResponse),
        (status = 403, description = "Invalid code or second factor outstanding", body = ErrorResponse)
    ),
    tag = "Second factor",
    security(("bearer_auth" = []))
)]
pub async fn disable(
    State(state): State<AppState>,
    AuthPrincipal(ctx): AuthPrincipal,
    OptionalValidatedJson(req): OptionalValidatedJson<DisableRequest>,
) -> Result<impl IntoResponse, AppError> {
    let code = req.and_then(|r| r.code);
    state
        .sessions
        .disable_second_factor(&ctx.principal, code.as_deref())
        .await?;

    Ok(Json(MessageResponse {
        message: "Second factor disabled".to_string(),
    }))
}

/// Replace all backup codes with a fresh batch
#[utoipa::path(
    post,
    path = "/s/auth/backup-codes/regenerate",
    responses(
        (status = 200, description = "New backup codes, shown once", body = BackupCodesResponse),
        (status = 400, description = "Second factor not enabled", body = ErrorResponse),
        (status = 401, description = "Unauthenticated", body = ErrorResponse)
    ),
    tag = "Second factor",
    security(("bearer_auth" = []))
)]
pub async fn regenerate_backup_codes(
    State(state): State<AppState>,
    AuthPrincipal(ctx): AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    let backup_codes = state.sessions.regenerate_backup_codes(&ctx.principal).await?;
    Ok(Json(BackupCodesResponse { backup_codes }))
}
