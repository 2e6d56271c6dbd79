//! Enforcement gate: bearer token → verified claims → live principal.
//!
//! Two scopes exist. The protected scope admits only fully authenticated
//! session tokens. The verification scope, used by the TOTP verify route
//! alone, additionally admits challenge tokens so a principal can finish a
//! two-step login.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::models::Principal;
use crate::services::{ServiceError, SessionClaims, TokenKind};
use crate::AppState;

/// Verified identity attached to the request by the gate.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal: Principal,
    pub claims: SessionClaims,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateScope {
    Protected,
    Verification,
}

/// Gate for every protected route.
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    gate(state, GateScope::Protected, req, next).await
}

/// Gate for the TOTP verify route; the only place a challenge token is accepted.
pub async fn verification_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    gate(state, GateScope::Verification, req, next).await
}

async fn gate(
    state: AppState,
    scope: GateScope,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

    let claims = state.jwt.validate(token).map_err(|e| {
        tracing::debug!(error = %e, "Token rejected");
        AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token"))
    })?;

    let principal = state
        .store
        .find_principal(claims.sub)
        .await
        .map_err(ServiceError::from)?
        .filter(|p| p.is_active && p.tenant_id == claims.tenant_id)
        .ok_or_else(|| {
            tracing::warn!(principal_id = %claims.sub, "Token principal missing, inactive or in another tenant");
            AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token"))
        })?;

    admit(scope, &principal, &claims)?;

    req.extensions_mut().insert(AuthContext { principal, claims });
    Ok(next.run(req).await)
}

fn admit(scope: GateScope, principal: &Principal, claims: &SessionClaims) -> Result<(), AppError> {
    let fully_authenticated = claims.kind == TokenKind::Session
        && (claims.second_factor_satisfied || !principal.requires_second_factor);

    if scope == GateScope::Protected && !fully_authenticated {
        tracing::info!(principal_id = %principal.principal_id, "Second factor outstanding");
        return Err(ServiceError::SecondFactorRequired.into());
    }
    Ok(())
}

/// Extractor for the authenticated principal and its token claims.
pub struct AuthPrincipal(pub AuthContext);

#[async_trait]
impl<S> FromRequestParts<S> for AuthPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let context = parts.extensions.get::<AuthContext>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Auth context missing from request extensions"
            ))
        })?;

        Ok(AuthPrincipal(context.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn principal(requires_second_factor: bool) -> Principal {
        let mut p = Principal::new(Uuid::new_v4(), "alice".into(), "a@x.test".into(), "h".into());
        p.requires_second_factor = requires_second_factor;
        p
    }

    fn claims(p: &Principal, kind: TokenKind, satisfied: bool) -> SessionClaims {
        let now = Utc::now().timestamp();
        SessionClaims {
            sub: p.principal_id,
            tenant_id: p.tenant_id,
            name: p.username.clone(),
            exp: now + 60,
            iat: now,
            jti: Uuid::new_v4(),
            second_factor_satisfied: satisfied,
            kind,
        }
    }

    #[test]
    fn test_protected_scope_requires_full_session() {
        let plain = principal(false);
        assert!(admit(GateScope::Protected, &plain, &claims(&plain, TokenKind::Session, true)).is_ok());

        let enrolled = principal(true);
        assert!(admit(GateScope::Protected, &enrolled, &claims(&enrolled, TokenKind::Session, true)).is_ok());
        assert!(matches!(
            admit(GateScope::Protected, &enrolled, &claims(&enrolled, TokenKind::Challenge, false)),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn test_verification_scope_accepts_challenge() {
        let enrolled = principal(true);
        assert!(admit(
            GateScope::Verification,
            &enrolled,
            &claims(&enrolled, TokenKind::Challenge, false)
        )
        .is_ok());
    }
}
