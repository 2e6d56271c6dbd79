use axum::{response::IntoResponse, Json};
use service_core::error::AppError;

use crate::middleware::AuthPrincipal;

/// Current principal's profile
#[utoipa::path(
    get,
    path = "/s/auth/profile",
    responses(
        (status = 200, description = "Profile", body = PrincipalResponse),
        (status = 401, description = "Unauthenticated", body = ErrorResponse),
        (status = 403, description = "Access denied", body = ErrorResponse)
    ),
    tag = "Profile",
    security(("bearer_auth" = []))
)]
pub async fn get_profile(AuthPrincipal(ctx): AuthPrincipal) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ctx.principal.sanitized()))
}
