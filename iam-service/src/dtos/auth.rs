use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::PrincipalResponse;
use crate::services::{IssuedToken, Registration};

pub const BEARER: &str = "Bearer";

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 64, message = "Username must be 3-64 characters"))]
    #[schema(example = "alice")]
    pub username: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "alice@acme.example")]
    pub email: String,

    #[validate(length(min = 1, max = 256, message = "Password is required"))]
    #[schema(example = "correct-horse-battery", min_length = 8)]
    pub password: String,

    /// Organization to create; omitted generates a name. Every
    /// registration creates a new organization.
    #[validate(length(max = 128, message = "Organization name is too long"))]
    #[schema(example = "Acme")]
    pub organization: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub principal: PrincipalResponse,
    #[schema(example = "acme")]
    pub tenant_slug: String,
    pub tenant_id: Uuid,
    pub tenant_created: bool,
    pub is_tenant_admin: bool,
}

impl From<Registration> for RegisterResponse {
    fn from(r: Registration) -> Self {
        Self {
            principal: r.principal.sanitized(),
            tenant_slug: r.tenant.tenant_slug,
            tenant_id: r.tenant.tenant_id,
            tenant_created: r.tenant_created,
            is_tenant_admin: r.is_tenant_admin,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    /// Tenant slug; omitted means the default tenant.
    #[schema(example = "acme")]
    pub tenant: Option<String>,

    #[validate(length(min = 1, message = "Username is required"))]
    #[schema(example = "alice")]
    pub username: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "correct-horse-battery")]
    pub password: String,

    /// One-time backup code, used instead of a TOTP challenge.
    pub backup_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    /// Seconds until expiry.
    #[schema(example = 86400)]
    pub expires_in: i64,
}

impl From<IssuedToken> for TokenResponse {
    fn from(issued: IssuedToken) -> Self {
        Self {
            token: issued.token,
            token_type: BEARER.to_string(),
            expires_in: issued.expires_in,
        }
    }
}

/// Token plus a human-readable note; used for challenges and verification.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChallengeResponse {
    #[schema(example = "Second factor required")]
    pub message: String,
    pub token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    #[schema(example = 300)]
    pub expires_in: i64,
}

impl ChallengeResponse {
    pub fn new(message: &str, issued: IssuedToken) -> Self {
        Self {
            message: message.to_string(),
            token: issued.token,
            token_type: BEARER.to_string(),
            expires_in: issued.expires_in,
        }
    }
}
