//! Persistence seam for the IAM engine.
//!
//! Every decision re-reads the store; nothing here is cached. `PgStore` is
//! the production implementation, `MemoryStore` backs tests and local runs.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    BackupCode, ChallengeRecord, Group, LoginActivity, Policy, PolicyDocument, Principal, Role,
    Statement, Tenant,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict(
                    db_err
                        .constraint()
                        .unwrap_or("unique constraint")
                        .to_string(),
                )
            }
            _ => StoreError::Database(anyhow::anyhow!(err)),
        }
    }
}

/// Where a policy is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyTarget {
    Principal(Uuid),
    Group(Uuid),
    Role(Uuid),
}

/// Policy ids reachable from a principal, by path.
#[derive(Debug, Clone, Default)]
pub struct PolicySources {
    pub direct: Vec<Uuid>,
    pub via_groups: Vec<Uuid>,
    pub via_roles: Vec<Uuid>,
}

#[async_trait]
pub trait IamStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    // Tenants
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError>;
    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, StoreError>;
    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StoreError>;

    // Principals
    async fn insert_principal(&self, principal: &Principal) -> Result<(), StoreError>;
    async fn find_principal(&self, principal_id: Uuid) -> Result<Option<Principal>, StoreError>;
    async fn find_principal_by_username(
        &self,
        tenant_id: Uuid,
        username: &str,
    ) -> Result<Option<Principal>, StoreError>;
    async fn count_principals(&self, tenant_id: Uuid) -> Result<i64, StoreError>;
    /// Store a freshly provisioned secret without enabling the second factor.
    async fn set_totp_secret(&self, principal_id: Uuid, secret: &str) -> Result<(), StoreError>;
    async fn enable_second_factor(&self, principal_id: Uuid) -> Result<(), StoreError>;
    /// Clear the secret, drop the requirement and delete every backup code, atomically.
    async fn disable_second_factor(&self, principal_id: Uuid) -> Result<(), StoreError>;

    // Backup codes
    /// Replace the principal's whole batch, atomically.
    async fn replace_backup_codes(
        &self,
        principal_id: Uuid,
        codes: &[BackupCode],
    ) -> Result<(), StoreError>;
    async fn unused_backup_codes(&self, principal_id: Uuid) -> Result<Vec<BackupCode>, StoreError>;
    /// Mark a code used. Returns false when it was already used (lost a race).
    async fn consume_backup_code(&self, code_id: Uuid) -> Result<bool, StoreError>;

    // Challenges
    async fn insert_challenge(&self, challenge: &ChallengeRecord) -> Result<(), StoreError>;
    async fn find_challenge(&self, challenge_id: Uuid)
        -> Result<Option<ChallengeRecord>, StoreError>;
    /// Increment the failure counter, returning the new value.
    async fn record_challenge_failure(&self, challenge_id: Uuid) -> Result<i32, StoreError>;
    /// Redeem an open challenge. Returns false if it was already redeemed,
    /// expired or out of attempts.
    async fn redeem_challenge(
        &self,
        challenge_id: Uuid,
        max_attempts: i32,
    ) -> Result<bool, StoreError>;
    /// Delete the principal's challenges that can no longer be redeemed
    /// (expired, redeemed or out of attempts). Returns the number removed.
    async fn purge_spent_challenges(
        &self,
        principal_id: Uuid,
        max_attempts: i32,
    ) -> Result<u64, StoreError>;

    // Groups and roles
    async fn insert_group(&self, group: &Group) -> Result<(), StoreError>;
    async fn find_group(&self, group_id: Uuid) -> Result<Option<Group>, StoreError>;
    async fn add_group_member(&self, group_id: Uuid, principal_id: Uuid) -> Result<(), StoreError>;
    async fn insert_role(&self, role: &Role) -> Result<(), StoreError>;
    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, StoreError>;
    async fn assign_role(&self, role_id: Uuid, principal_id: Uuid) -> Result<(), StoreError>;

    // Policies
    /// Insert a policy with all of its statements, atomically.
    async fn insert_policy(&self, document: &PolicyDocument) -> Result<(), StoreError>;
    async fn find_policy(&self, policy_id: Uuid) -> Result<Option<Policy>, StoreError>;
    async fn list_policies(&self, tenant_id: Uuid) -> Result<Vec<Policy>, StoreError>;
    /// Idempotent: attaching an already attached policy is not an error.
    async fn attach_policy(&self, policy_id: Uuid, target: PolicyTarget) -> Result<(), StoreError>;
    async fn policy_sources(&self, principal_id: Uuid) -> Result<PolicySources, StoreError>;
    async fn statements_for_policies(
        &self,
        policy_ids: &[Uuid],
    ) -> Result<Vec<Statement>, StoreError>;

    // Audit
    async fn insert_login_activity(&self, activity: &LoginActivity) -> Result<(), StoreError>;
}
