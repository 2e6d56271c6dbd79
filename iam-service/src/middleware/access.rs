use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use super::auth::AuthContext;
use crate::models::policy::expand_resource;
use crate::services::{PolicyEvaluator, ServiceError};

/// `(action, resource template)` guard for one route. The template may use
/// `{user_id}` and `{org_id}`; both resolve to the caller.
#[derive(Clone)]
pub struct AccessRule {
    pub evaluator: PolicyEvaluator,
    pub action: &'static str,
    pub resource: &'static str,
}

impl AccessRule {
    pub fn new(evaluator: PolicyEvaluator, action: &'static str, resource: &'static str) -> Self {
        Self {
            evaluator,
            action,
            resource,
        }
    }
}

/// Must run after the auth gate.
pub async fn require_access(
    State(rule): State<AccessRule>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = req.extensions().get::<AuthContext>().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!(
            "Auth context missing from request extensions"
        ))
    })?;

    let principal = &context.principal;
    let resource = expand_resource(rule.resource, principal.principal_id, principal.tenant_id);

    let allowed = rule
        .evaluator
        .evaluate(principal, rule.action, &resource)
        .await
        .map_err(ServiceError::from)?;

    if !allowed {
        tracing::warn!(
            principal_id = %principal.principal_id,
            action = rule.action,
            resource = %resource,
            "Access denied"
        );
        return Err(ServiceError::AccessDenied.into());
    }

    Ok(next.run(req).await)
}
