//! Principal model: an authenticable account inside exactly one tenant.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, FromRow)]
pub struct Principal {
    pub principal_id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    /// Base32 TOTP secret; empty while no authenticator is provisioned.
    pub totp_secret: String,
    pub requires_second_factor: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Principal {
    pub fn new(tenant_id: Uuid, username: String, email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            principal_id: Uuid::new_v4(),
            tenant_id,
            username,
            email,
            password_hash,
            is_active: true,
            totp_secret: String::new(),
            requires_second_factor: false,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn has_totp_secret(&self) -> bool {
        !self.totp_secret.is_empty()
    }

    pub fn sanitized(&self) -> PrincipalResponse {
        PrincipalResponse::from(self)
    }
}

// Keep hashes and TOTP secrets out of logs.
impl std::fmt::Debug for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Principal")
            .field("principal_id", &self.principal_id)
            .field("tenant_id", &self.tenant_id)
            .field("username", &self.username)
            .field("is_active", &self.is_active)
            .field("requires_second_factor", &self.requires_second_factor)
            .finish_non_exhaustive()
    }
}

/// Principal as exposed over the API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PrincipalResponse {
    pub principal_id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub requires_second_factor: bool,
    pub created_utc: DateTime<Utc>,
}

impl From<&Principal> for PrincipalResponse {
    fn from(p: &Principal) -> Self {
        Self {
            principal_id: p.principal_id,
            tenant_id: p.tenant_id,
            username: p.username.clone(),
            email: p.email.clone(),
            is_active: p.is_active,
            requires_second_factor: p.requires_second_factor,
            created_utc: p.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_credentials() {
        let mut principal = Principal::new(
            Uuid::new_v4(),
            "alice".to_string(),
            "alice@example.com".to_string(),
            "$argon2id$v=19$secret-hash".to_string(),
        );
        principal.totp_secret = "JBSWY3DPEHPK3PXP".to_string();

        let debug = format!("{:?}", principal);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("secret-hash"));
        assert!(!debug.contains("JBSWY3DPEHPK3PXP"));
    }

    #[test]
    fn test_new_principal_has_no_second_factor() {
        let principal = Principal::new(
            Uuid::new_v4(),
            "bob".to_string(),
            "bob@example.com".to_string(),
            "hash".to_string(),
        );
        assert!(principal.is_active);
        assert!(!principal.has_totp_secret());
        assert!(!principal.requires_second_factor);
    }
}
