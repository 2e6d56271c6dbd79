use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::Principal;

/// HS256 token minting and verification for sessions and second-factor challenges.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    session_ttl: Duration,
    challenge_ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Full session, usable on every protected route.
    Session,
    /// Short-lived token proving only that the password was correct.
    Challenge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Principal id
    pub sub: Uuid,
    pub tenant_id: Uuid,
    /// Username at issue time
    pub name: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: Uuid,
    pub second_factor_satisfied: bool,
    pub kind: TokenKind,
}

/// A freshly signed token and its claims.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: SessionClaims,
    pub expires_in: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let secret = config.secret.expose_secret().as_bytes();
        if secret.is_empty() {
            return Err(anyhow::anyhow!("JWT secret must not be empty"));
        }

        tracing::info!(
            session_ttl_minutes = config.session_ttl_minutes,
            challenge_ttl_minutes = config.challenge_ttl_minutes,
            "JWT service initialized with HS256"
        );

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            session_ttl: Duration::minutes(config.session_ttl_minutes),
            challenge_ttl: Duration::minutes(config.challenge_ttl_minutes),
        })
    }

    /// Full session token with the second factor satisfied.
    pub fn issue_session(&self, principal: &Principal) -> Result<IssuedToken, anyhow::Error> {
        self.issue(principal, TokenKind::Session, self.session_ttl)
    }

    /// Challenge token awaiting a TOTP code.
    pub fn issue_challenge(&self, principal: &Principal) -> Result<IssuedToken, anyhow::Error> {
        self.issue(principal, TokenKind::Challenge, self.challenge_ttl)
    }

    fn issue(
        &self,
        principal: &Principal,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken, anyhow::Error> {
        let now = Utc::now();

        let claims = SessionClaims {
            sub: principal.principal_id,
            tenant_id: principal.tenant_id,
            name: principal.username.clone(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4(),
            second_factor_satisfied: kind == TokenKind::Session,
            kind,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode token: {}", e))?;

        Ok(IssuedToken {
            token,
            claims,
            expires_in: ttl.num_seconds(),
        })
    }

    /// Verify signature and expiry. No clock leeway.
    pub fn validate(&self, token: &str) -> Result<SessionClaims, anyhow::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        let token_data = decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid token: {}", e))?;

        Ok(token_data.claims)
    }

    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl.num_seconds()
    }

    pub fn challenge_ttl_seconds(&self) -> i64 {
        self.challenge_ttl.num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn service(secret: &str) -> JwtService {
        JwtService::new(&JwtConfig {
            secret: SecretString::new(secret.to_string()),
            session_ttl_minutes: 1440,
            challenge_ttl_minutes: 5,
        })
        .unwrap()
    }

    fn principal() -> Principal {
        Principal::new(
            Uuid::new_v4(),
            "alice".to_string(),
            "alice@example.com".to_string(),
            "hash".to_string(),
        )
    }

    #[test]
    fn test_session_token_round_trip() {
        let jwt = service("unit-test-secret");
        let alice = principal();

        let issued = jwt.issue_session(&alice).unwrap();
        let claims = jwt.validate(&issued.token).unwrap();

        assert_eq!(claims.sub, alice.principal_id);
        assert_eq!(claims.tenant_id, alice.tenant_id);
        assert_eq!(claims.name, "alice");
        assert_eq!(claims.kind, TokenKind::Session);
        assert!(claims.second_factor_satisfied);
        assert_eq!(issued.expires_in, 24 * 60 * 60);
        assert_eq!(claims.exp - claims.iat, 24 * 60 * 60);
    }

    #[test]
    fn test_challenge_token_is_short_and_unsatisfied() {
        let jwt = service("unit-test-secret");
        let issued = jwt.issue_challenge(&principal()).unwrap();
        let claims = jwt.validate(&issued.token).unwrap();

        assert_eq!(claims.kind, TokenKind::Challenge);
        assert!(!claims.second_factor_satisfied);
        assert_eq!(claims.exp - claims.iat, 5 * 60);
    }

    #[test]
    fn test_expired_token_rejected() {
        let jwt = service("unit-test-secret");
        let issued = jwt
            .issue(&principal(), TokenKind::Session, Duration::seconds(-1))
            .unwrap();
        assert!(jwt.validate(&issued.token).is_err());
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let ours = service("unit-test-secret");
        let theirs = service("some-other-secret");
        let issued = theirs.issue_session(&principal()).unwrap();
        assert!(ours.validate(&issued.token).is_err());
    }

    #[test]
    fn test_empty_secret_refused() {
        let result = JwtService::new(&JwtConfig {
            secret: SecretString::new(String::new()),
            session_ttl_minutes: 1440,
            challenge_ttl_minutes: 5,
        });
        assert!(result.is_err());
    }
}
