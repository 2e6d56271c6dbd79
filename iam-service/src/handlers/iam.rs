//! Tenant-scoped authoring of policies, groups and roles. The caller's
//! tenant comes from the authenticated principal, never from the body.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::iam::{
        AttachPolicyRequest, AttachmentResponse, CreateGroupRequest, CreatePolicyRequest,
        CreatePrincipalRequest, CreateRoleRequest, MemberRequest,
    },
    middleware::AuthPrincipal,
    services::NewMember,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Create a principal in the caller's organization
///
/// The new principal is active immediately and holds SelfManage.
#[utoipa::path(
    post,
    path = "/s/iam/principals",
    request_body = CreatePrincipalRequest,
    responses(
        (status = 201, description = "Principal created", body = PrincipalResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 403, description = "Access denied", body = ErrorResponse),
        (status = 409, description = "Username or email already registered", body = ErrorResponse)
    ),
    tag = "IAM",
    security(("bearer_auth" = []))
)]
pub async fn create_principal(
    State(state): State<AppState>,
    AuthPrincipal(ctx): AuthPrincipal,
    ValidatedJson(req): ValidatedJson<CreatePrincipalRequest>,
) -> Result<impl IntoResponse, AppError> {
    let principal = state
        .registration
        .create_principal(
            ctx.principal.tenant_id,
            NewMember {
                username: req.username,
                email: req.email,
                password: Password::new(req.password),
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(principal.sanitized())))
}

/// Create a policy in the caller's organization
#[utoipa::path(
    post,
    path = "/s/iam/policies",
    request_body = CreatePolicyRequest,
    responses(
        (status = 201, description = "Policy created", body = PolicyDocument),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 403, description = "Access denied", body = ErrorResponse),
        (status = 409, description = "Slug already exists", body = ErrorResponse)
    ),
    tag = "IAM",
    security(("bearer_auth" = []))
)]
pub async fn create_policy(
    State(state): State<AppState>,
    AuthPrincipal(ctx): AuthPrincipal,
    ValidatedJson(req): ValidatedJson<CreatePolicyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let document = state
        .directory
        .create_policy(ctx.principal.tenant_id, req.into())
        .await?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// Attach a policy to a principal, group or role
#[utoipa::path(
    post,
    path = "/s/iam/policies/{policy_id}/attachments",
    params(("policy_id" = Uuid, Path, description = "Policy id")),
    request_body = AttachPolicyRequest,
    responses(
        (status = 200, description = "Policy attached", body = AttachmentResponse),
        (status = 403, description = "Access denied", body = ErrorResponse),
        (status = 404, description = "Policy or target not found", body = ErrorResponse)
    ),
    tag = "IAM",
    security(("bearer_auth" = []))
)]
pub async fn attach_policy(
    State(state): State<AppState>,
    AuthPrincipal(ctx): AuthPrincipal,
    Path(policy_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<AttachPolicyRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .directory
        .attach_policy(ctx.principal.tenant_id, policy_id, req.target())
        .await?;

    Ok(Json(AttachmentResponse {
        policy_id,
        target_id: req.target_id,
    }))
}

/// Create a group
#[utoipa::path(
    post,
    path = "/s/iam/groups",
    request_body = CreateGroupRequest,
    responses(
        (status = 201, description = "Group created", body = Group),
        (status = 403, description = "Access denied", body = ErrorResponse),
        (status = 409, description = "Group name already exists", body = ErrorResponse)
    ),
    tag = "IAM",
    security(("bearer_auth" = []))
)]
pub async fn create_group(
    State(state): State<AppState>,
    AuthPrincipal(ctx): AuthPrincipal,
    ValidatedJson(req): ValidatedJson<CreateGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let group = state
        .directory
        .create_group(ctx.principal.tenant_id, &req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

/// Add a principal to a group
#[utoipa::path(
    post,
    path = "/s/iam/groups/{group_id}/members",
    params(("group_id" = Uuid, Path, description = "Group id")),
    request_body = MemberRequest,
    responses(
        (status = 204, description = "Member added"),
        (status = 403, description = "Access denied", body = ErrorResponse),
        (status = 404, description = "Group or principal not found", body = ErrorResponse)
    ),
    tag = "IAM",
    security(("bearer_auth" = []))
)]
pub async fn add_group_member(
    State(state): State<AppState>,
    AuthPrincipal(ctx): AuthPrincipal,
    Path(group_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<MemberRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .directory
        .add_group_member(ctx.principal.tenant_id, group_id, req.principal_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create a role
#[utoipa::path(
    post,
    path = "/s/iam/roles",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 403, description = "Access denied", body = ErrorResponse),
        (status = 409, description = "Role name already exists", body = ErrorResponse)
    ),
    tag = "IAM",
    security(("bearer_auth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    AuthPrincipal(ctx): AuthPrincipal,
    ValidatedJson(req): ValidatedJson<CreateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let role = state
        .directory
        .create_role(ctx.principal.tenant_id, &req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// Assign a role to a principal
#[utoipa::path(
    post,
    path = "/s/iam/roles/{role_id}/members",
    params(("role_id" = Uuid, Path, description = "Role id")),
    request_body = MemberRequest,
    responses(
        (status = 204, description = "Role assigned"),
        (status = 403, description = "Access denied", body = ErrorResponse),
        (status = 404, description = "Role or principal not found", body = ErrorResponse)
    ),
    tag = "IAM",
    security(("bearer_auth" = []))
)]
pub async fn assign_role(
    State(state): State<AppState>,
    AuthPrincipal(ctx): AuthPrincipal,
    Path(role_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<MemberRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .directory
        .assign_role(ctx.principal.tenant_id, role_id, req.principal_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
