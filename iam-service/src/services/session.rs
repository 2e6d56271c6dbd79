//! Login state machine and second-factor lifecycle.
//!
//! ```text
//! AwaitingCredentials ──password ok──▶ CredentialsValid
//!   CredentialsValid ──no 2FA──────────────▶ Authenticated (session token)
//!   CredentialsValid ──2FA, backup code ok──▶ Authenticated (session token)
//!   CredentialsValid ──2FA, no backup code──▶ AwaitingSecondFactor (challenge token)
//!   AwaitingSecondFactor ──TOTP ok─────────▶ Authenticated (session token)
//! ```
//!
//! Unknown usernames, wrong passwords and inactive accounts produce the same
//! `InvalidCredentials` error and cost the same argon2 work.

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::audit::AuditSink;
use super::error::ServiceError;
use super::jwt::{IssuedToken, JwtService, SessionClaims, TokenKind};
use super::second_factor::{check_backup_code, ProvisionedSecret, SecondFactorManager};
use super::store::IamStore;
use crate::models::{
    BackupCode, ChallengeRecord, ClientInfo, LoginActivity, LoginStatus, Principal, Tenant,
};
use crate::utils::{
    verify_dummy_blocking, verify_password_blocking, Password, PasswordHashString,
};

#[derive(Debug)]
pub struct LoginCommand {
    /// Tenant slug; `None` means the default tenant.
    pub tenant: Option<String>,
    pub username: String,
    pub password: Password,
    pub backup_code: Option<String>,
}

#[derive(Debug)]
pub enum LoginOutcome {
    /// Fully authenticated; 24h session token.
    Authenticated(IssuedToken),
    /// Password accepted, TOTP still owed; short-lived challenge token.
    ChallengeIssued(IssuedToken),
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn IamStore>,
    jwt: JwtService,
    second_factor: SecondFactorManager,
    audit: AuditSink,
    default_tenant_slug: String,
    challenge_max_attempts: i32,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn IamStore>,
        jwt: JwtService,
        second_factor: SecondFactorManager,
        audit: AuditSink,
        default_tenant_slug: String,
        challenge_max_attempts: i32,
    ) -> Self {
        Self {
            store,
            jwt,
            second_factor,
            audit,
            default_tenant_slug,
            challenge_max_attempts,
        }
    }

    #[tracing::instrument(skip(self, command, client), fields(username = %command.username))]
    pub async fn login(
        &self,
        command: LoginCommand,
        client: ClientInfo,
    ) -> Result<LoginOutcome, ServiceError> {
        let slug = command
            .tenant
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.default_tenant_slug.clone());

        let tenant = self.store.find_tenant_by_slug(slug.trim()).await?;
        let principal = match &tenant {
            Some(t) => {
                self.store
                    .find_principal_by_username(t.tenant_id, &command.username)
                    .await?
            }
            None => None,
        };

        let Some(principal) = principal else {
            verify_dummy_blocking(command.password).await;
            self.record(tenant.as_ref(), None, &command.username, &client, LoginStatus::UserNotFound);
            tracing::info!("Login failed: unknown principal");
            return Err(ServiceError::InvalidCredentials);
        };

        let password_ok = verify_password_blocking(
            command.password,
            PasswordHashString::new(principal.password_hash.clone()),
        )
        .await?;

        if !password_ok {
            self.record_for(&principal, &client, LoginStatus::InvalidPassword);
            tracing::info!(principal_id = %principal.principal_id, "Login failed: invalid password");
            return Err(ServiceError::InvalidCredentials);
        }

        if !principal.is_active {
            self.record_for(&principal, &client, LoginStatus::Inactive);
            tracing::info!(principal_id = %principal.principal_id, "Login failed: inactive principal");
            return Err(ServiceError::InvalidCredentials);
        }

        if !principal.requires_second_factor {
            let issued = self.jwt.issue_session(&principal)?;
            self.record_for(&principal, &client, LoginStatus::Success);
            return Ok(LoginOutcome::Authenticated(issued));
        }

        match command.backup_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                if self.redeem_backup_code(&principal, code).await? {
                    let issued = self.jwt.issue_session(&principal)?;
                    self.record_for(&principal, &client, LoginStatus::Success);
                    tracing::info!(principal_id = %principal.principal_id, "Login completed with backup code");
                    Ok(LoginOutcome::Authenticated(issued))
                } else {
                    self.record_for(&principal, &client, LoginStatus::InvalidBackupCode);
                    Err(ServiceError::InvalidBackupCode)
                }
            }
            _ => {
                self.purge_spent_challenges(principal.principal_id).await;
                let issued = self.jwt.issue_challenge(&principal)?;
                let expires_utc = Utc::now() + Duration::seconds(issued.expires_in);
                self.store
                    .insert_challenge(&ChallengeRecord::new(
                        issued.claims.jti,
                        principal.principal_id,
                        expires_utc,
                    ))
                    .await?;
                self.record_for(&principal, &client, LoginStatus::ChallengeIssued);
                Ok(LoginOutcome::ChallengeIssued(issued))
            }
        }
    }

    /// Best effort; a failed purge never blocks the login.
    async fn purge_spent_challenges(&self, principal_id: Uuid) {
        match self
            .store
            .purge_spent_challenges(principal_id, self.challenge_max_attempts)
            .await
        {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "Spent challenges removed"),
            Err(e) => tracing::warn!(error = %e, "Failed to purge spent challenges"),
        }
    }

    /// Find the first unused code matching `code` and consume it.
    async fn redeem_backup_code(&self, principal: &Principal, code: &str) -> Result<bool, ServiceError> {
        let candidates = self.store.unused_backup_codes(principal.principal_id).await?;
        if candidates.is_empty() {
            return Ok(false);
        }

        let submitted = code.to_string();
        let matched = tokio::task::spawn_blocking(move || find_backup_code(&candidates, &submitted))
            .await
            .map_err(|e| anyhow::anyhow!("Backup code check task failed: {}", e))?;

        match matched {
            // A concurrent login may have consumed the same code first.
            Some(code_id) => Ok(self.store.consume_backup_code(code_id).await?),
            None => Ok(false),
        }
    }

    /// Provision a new TOTP secret. The second factor is not enforced until
    /// the first code is verified.
    #[tracing::instrument(skip(self, principal), fields(principal_id = %principal.principal_id))]
    pub async fn setup_second_factor(
        &self,
        principal: &Principal,
    ) -> Result<ProvisionedSecret, ServiceError> {
        if principal.requires_second_factor {
            return Err(ServiceError::Conflict(
                "second factor already enabled; disable it first".to_string(),
            ));
        }

        let provisioned = self.second_factor.provision_secret(&principal.username)?;
        self.store
            .set_totp_secret(principal.principal_id, &provisioned.secret)
            .await?;

        tracing::info!("TOTP secret provisioned");
        Ok(provisioned)
    }

    /// Check a TOTP code for the bearer of `claims`. Enables the second
    /// factor on first success and returns a full session token. Challenge
    /// tokens are single-use and burn after the configured failure count.
    #[tracing::instrument(skip(self, principal, claims, code), fields(principal_id = %principal.principal_id))]
    pub async fn verify_second_factor(
        &self,
        principal: &Principal,
        claims: &SessionClaims,
        code: &str,
    ) -> Result<IssuedToken, ServiceError> {
        if !principal.has_totp_secret() {
            return Err(ServiceError::InvalidInput(
                "second factor has not been set up".to_string(),
            ));
        }

        let is_challenge = claims.kind == TokenKind::Challenge;
        if is_challenge {
            self.ensure_challenge_open(principal.principal_id, claims.jti).await?;
        }

        if !self.second_factor.validate_code(&principal.totp_secret, code) {
            if is_challenge {
                let attempts = self.store.record_challenge_failure(claims.jti).await?;
                tracing::warn!(attempts, "Invalid TOTP code for challenge");
            } else {
                tracing::warn!("Invalid TOTP code");
            }
            return Err(ServiceError::InvalidSecondFactor);
        }

        if is_challenge
            && !self
                .store
                .redeem_challenge(claims.jti, self.challenge_max_attempts)
                .await?
        {
            return Err(ServiceError::Unauthenticated("challenge is no longer valid"));
        }

        if !principal.requires_second_factor {
            self.store.enable_second_factor(principal.principal_id).await?;
            tracing::info!("Second factor enabled");
        }

        Ok(self.jwt.issue_session(principal)?)
    }

    async fn ensure_challenge_open(&self, principal_id: Uuid, challenge_id: Uuid) -> Result<(), ServiceError> {
        let open = self
            .store
            .find_challenge(challenge_id)
            .await?
            .is_some_and(|c| {
                c.principal_id == principal_id && c.is_open(self.challenge_max_attempts, Utc::now())
            });

        if open {
            Ok(())
        } else {
            Err(ServiceError::Unauthenticated("challenge is no longer valid"))
        }
    }

    /// Turn the second factor off. When a code is supplied it must be valid.
    #[tracing::instrument(skip(self, principal, code), fields(principal_id = %principal.principal_id))]
    pub async fn disable_second_factor(
        &self,
        principal: &Principal,
        code: Option<&str>,
    ) -> Result<(), ServiceError> {
        if let Some(code) = code {
            if principal.has_totp_secret()
                && !self.second_factor.validate_code(&principal.totp_secret, code)
            {
                return Err(ServiceError::InvalidSecondFactor);
            }
        }

        self.store.disable_second_factor(principal.principal_id).await?;
        tracing::info!("Second factor disabled, backup codes removed");
        Ok(())
    }

    /// Replace every backup code with a fresh batch and return the plain codes.
    #[tracing::instrument(skip(self, principal), fields(principal_id = %principal.principal_id))]
    pub async fn regenerate_backup_codes(
        &self,
        principal: &Principal,
    ) -> Result<Vec<String>, ServiceError> {
        if !principal.requires_second_factor {
            return Err(ServiceError::InvalidInput(
                "enable the second factor before generating backup codes".to_string(),
            ));
        }

        let manager = self.second_factor.clone();
        let generated = tokio::task::spawn_blocking(move || manager.generate_backup_codes())
            .await
            .map_err(|e| anyhow::anyhow!("Backup code generation task failed: {}", e))??;

        let records: Vec<BackupCode> = generated
            .hashed
            .into_iter()
            .map(|hash| BackupCode::new(principal.principal_id, hash.into_string()))
            .collect();

        self.store
            .replace_backup_codes(principal.principal_id, &records)
            .await?;

        tracing::info!(count = records.len(), "Backup codes regenerated");
        Ok(generated.plain)
    }

    fn record_for(&self, principal: &Principal, client: &ClientInfo, status: LoginStatus) {
        self.audit.record(LoginActivity::new(
            Some(principal.tenant_id),
            Some(principal.principal_id),
            principal.username.clone(),
            client,
            status,
        ));
    }

    fn record(
        &self,
        tenant: Option<&Tenant>,
        principal_id: Option<Uuid>,
        username: &str,
        client: &ClientInfo,
        status: LoginStatus,
    ) {
        self.audit.record(LoginActivity::new(
            tenant.map(|t| t.tenant_id),
            principal_id,
            username.to_string(),
            client,
            status,
        ));
    }
}

fn find_backup_code(candidates: &[BackupCode], submitted: &str) -> Option<Uuid> {
    candidates
        .iter()
        .find(|c| check_backup_code(submitted, &c.code_hash))
        .map(|c| c.code_id)
}
