//! In-process `IamStore` used by tests and local experiments.
//!
//! One mutex guards the whole state, so every trait call is atomic the same
//! way the PostgreSQL transactions are.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::store::{IamStore, PolicySources, PolicyTarget, StoreError};
use crate::models::{
    BackupCode, ChallengeRecord, Group, LoginActivity, Policy, PolicyDocument, Principal, Role,
    Statement, Tenant,
};

#[derive(Default)]
struct State {
    tenants: HashMap<Uuid, Tenant>,
    principals: HashMap<Uuid, Principal>,
    groups: HashMap<Uuid, Group>,
    group_members: HashSet<(Uuid, Uuid)>,
    roles: HashMap<Uuid, Role>,
    principal_roles: HashSet<(Uuid, Uuid)>,
    policies: HashMap<Uuid, Policy>,
    statements: Vec<Statement>,
    principal_policies: HashSet<(Uuid, Uuid)>,
    group_policies: HashSet<(Uuid, Uuid)>,
    role_policies: HashSet<(Uuid, Uuid)>,
    backup_codes: HashMap<Uuid, BackupCode>,
    challenges: HashMap<Uuid, ChallengeRecord>,
    login_activity: Vec<LoginActivity>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|e| StoreError::Database(anyhow::anyhow!("Memory store mutex poisoned: {}", e)))
    }

    /// Snapshot of the audit trail, oldest first.
    pub fn login_activity(&self) -> Vec<LoginActivity> {
        self.state
            .lock()
            .map(|s| s.login_activity.clone())
            .unwrap_or_default()
    }

    /// Snapshot of a principal's stored challenges.
    pub fn challenges_for(&self, principal_id: Uuid) -> Vec<ChallengeRecord> {
        self.state
            .lock()
            .map(|s| {
                s.challenges
                    .values()
                    .filter(|c| c.principal_id == principal_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of a principal's backup codes, used or not.
    pub fn backup_codes_for(&self, principal_id: Uuid) -> Vec<BackupCode> {
        self.state
            .lock()
            .map(|s| {
                s.backup_codes
                    .values()
                    .filter(|c| c.principal_id == principal_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn conflict(what: &str) -> StoreError {
    StoreError::Conflict(what.to_string())
}

#[async_trait]
impl IamStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.tenants.values().any(|t| {
            t.tenant_slug == tenant.tenant_slug || t.tenant_name == tenant.tenant_name
        }) {
            return Err(conflict("tenants_tenant_slug_key"));
        }
        state.tenants.insert(tenant.tenant_id, tenant.clone());
        Ok(())
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, StoreError> {
        Ok(self.lock()?.tenants.get(&tenant_id).cloned())
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StoreError> {
        Ok(self
            .lock()?
            .tenants
            .values()
            .find(|t| t.tenant_slug == slug)
            .cloned())
    }

    async fn insert_principal(&self, principal: &Principal) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.principals.values().any(|p| {
            p.tenant_id == principal.tenant_id
                && (p.username == principal.username || p.email == principal.email)
        }) {
            return Err(conflict("principals_tenant_id_username_key"));
        }
        state
            .principals
            .insert(principal.principal_id, principal.clone());
        Ok(())
    }

    async fn find_principal(&self, principal_id: Uuid) -> Result<Option<Principal>, StoreError> {
        Ok(self.lock()?.principals.get(&principal_id).cloned())
    }

    async fn find_principal_by_username(
        &self,
        tenant_id: Uuid,
        username: &str,
    ) -> Result<Option<Principal>, StoreError> {
        Ok(self
            .lock()?
            .principals
            .values()
            .find(|p| p.tenant_id == tenant_id && p.username == username)
            .cloned())
    }

    async fn count_principals(&self, tenant_id: Uuid) -> Result<i64, StoreError> {
        Ok(self
            .lock()?
            .principals
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .count() as i64)
    }

    async fn set_totp_secret(&self, principal_id: Uuid, secret: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if let Some(p) = state.principals.get_mut(&principal_id) {
            p.totp_secret = secret.to_string();
            p.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn enable_second_factor(&self, principal_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if let Some(p) = state.principals.get_mut(&principal_id) {
            p.requires_second_factor = true;
            p.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn disable_second_factor(&self, principal_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if let Some(p) = state.principals.get_mut(&principal_id) {
            p.totp_secret.clear();
            p.requires_second_factor = false;
            p.updated_utc = Utc::now();
        }
        state
            .backup_codes
            .retain(|_, c| c.principal_id != principal_id);
        Ok(())
    }

    async fn replace_backup_codes(
        &self,
        principal_id: Uuid,
        codes: &[BackupCode],
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state
            .backup_codes
            .retain(|_, c| c.principal_id != principal_id);
        for code in codes {
            state.backup_codes.insert(code.code_id, code.clone());
        }
        Ok(())
    }

    async fn unused_backup_codes(&self, principal_id: Uuid) -> Result<Vec<BackupCode>, StoreError> {
        let mut codes: Vec<BackupCode> = self
            .lock()?
            .backup_codes
            .values()
            .filter(|c| c.principal_id == principal_id && !c.used)
            .cloned()
            .collect();
        codes.sort_by_key(|c| c.created_utc);
        Ok(codes)
    }

    async fn consume_backup_code(&self, code_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.backup_codes.get_mut(&code_id) {
            Some(code) if !code.used => {
                code.used = true;
                code.used_utc = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_challenge(&self, challenge: &ChallengeRecord) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.challenges.contains_key(&challenge.challenge_id) {
            return Err(conflict("challenge_tokens_pkey"));
        }
        state
            .challenges
            .insert(challenge.challenge_id, challenge.clone());
        Ok(())
    }

    async fn find_challenge(
        &self,
        challenge_id: Uuid,
    ) -> Result<Option<ChallengeRecord>, StoreError> {
        Ok(self.lock()?.challenges.get(&challenge_id).cloned())
    }

    async fn record_challenge_failure(&self, challenge_id: Uuid) -> Result<i32, StoreError> {
        let mut state = self.lock()?;
        Ok(match state.challenges.get_mut(&challenge_id) {
            Some(c) => {
                c.failed_attempts += 1;
                c.failed_attempts
            }
            None => 0,
        })
    }

    async fn redeem_challenge(
        &self,
        challenge_id: Uuid,
        max_attempts: i32,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let now = Utc::now();
        match state.challenges.get_mut(&challenge_id) {
            Some(c) if c.is_open(max_attempts, now) => {
                c.redeemed_utc = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_spent_challenges(
        &self,
        principal_id: Uuid,
        max_attempts: i32,
    ) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let before = state.challenges.len();
        state
            .challenges
            .retain(|_, c| c.principal_id != principal_id || c.is_open(max_attempts, now));
        Ok((before - state.challenges.len()) as u64)
    }

    async fn insert_group(&self, group: &Group) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state
            .groups
            .values()
            .any(|g| g.tenant_id == group.tenant_id && g.group_name == group.group_name)
        {
            return Err(conflict("groups_tenant_id_group_name_key"));
        }
        state.groups.insert(group.group_id, group.clone());
        Ok(())
    }

    async fn find_group(&self, group_id: Uuid) -> Result<Option<Group>, StoreError> {
        Ok(self.lock()?.groups.get(&group_id).cloned())
    }

    async fn add_group_member(&self, group_id: Uuid, principal_id: Uuid) -> Result<(), StoreError> {
        self.lock()?.group_members.insert((group_id, principal_id));
        Ok(())
    }

    async fn insert_role(&self, role: &Role) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state
            .roles
            .values()
            .any(|r| r.tenant_id == role.tenant_id && r.role_name == role.role_name)
        {
            return Err(conflict("roles_tenant_id_role_name_key"));
        }
        state.roles.insert(role.role_id, role.clone());
        Ok(())
    }

    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, StoreError> {
        Ok(self.lock()?.roles.get(&role_id).cloned())
    }

    async fn assign_role(&self, role_id: Uuid, principal_id: Uuid) -> Result<(), StoreError> {
        self.lock()?.principal_roles.insert((role_id, principal_id));
        Ok(())
    }

    async fn insert_policy(&self, document: &PolicyDocument) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let policy = &document.policy;
        if state
            .policies
            .values()
            .any(|p| p.tenant_id == policy.tenant_id && p.policy_slug == policy.policy_slug)
        {
            return Err(conflict("policies_tenant_id_policy_slug_key"));
        }
        state.policies.insert(policy.policy_id, policy.clone());
        state.statements.extend(document.statements.iter().cloned());
        Ok(())
    }

    async fn find_policy(&self, policy_id: Uuid) -> Result<Option<Policy>, StoreError> {
        Ok(self.lock()?.policies.get(&policy_id).cloned())
    }

    async fn list_policies(&self, tenant_id: Uuid) -> Result<Vec<Policy>, StoreError> {
        let mut policies: Vec<Policy> = self
            .lock()?
            .policies
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect();
        policies.sort_by_key(|p| p.created_utc);
        Ok(policies)
    }

    async fn attach_policy(&self, policy_id: Uuid, target: PolicyTarget) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        match target {
            PolicyTarget::Principal(id) => state.principal_policies.insert((policy_id, id)),
            PolicyTarget::Group(id) => state.group_policies.insert((policy_id, id)),
            PolicyTarget::Role(id) => state.role_policies.insert((policy_id, id)),
        };
        Ok(())
    }

    async fn policy_sources(&self, principal_id: Uuid) -> Result<PolicySources, StoreError> {
        let state = self.lock()?;

        let direct = state
            .principal_policies
            .iter()
            .filter(|(_, p)| *p == principal_id)
            .map(|(policy, _)| *policy)
            .collect();

        let groups: HashSet<Uuid> = state
            .group_members
            .iter()
            .filter(|(_, p)| *p == principal_id)
            .map(|(g, _)| *g)
            .collect();
        let via_groups = state
            .group_policies
            .iter()
            .filter(|(_, g)| groups.contains(g))
            .map(|(policy, _)| *policy)
            .collect();

        let roles: HashSet<Uuid> = state
            .principal_roles
            .iter()
            .filter(|(_, p)| *p == principal_id)
            .map(|(r, _)| *r)
            .collect();
        let via_roles = state
            .role_policies
            .iter()
            .filter(|(_, r)| roles.contains(r))
            .map(|(policy, _)| *policy)
            .collect();

        Ok(PolicySources {
            direct,
            via_groups,
            via_roles,
        })
    }

    async fn statements_for_policies(
        &self,
        policy_ids: &[Uuid],
    ) -> Result<Vec<Statement>, StoreError> {
        Ok(self
            .lock()?
            .statements
            .iter()
            .filter(|s| policy_ids.contains(&s.policy_id))
            .cloned()
            .collect())
    }

    async fn insert_login_activity(&self, activity: &LoginActivity) -> Result<(), StoreError> {
        self.lock()?.login_activity.push(activity.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_consume_backup_code_once() {
        let store = MemoryStore::new();
        let principal = Uuid::new_v4();
        let code = BackupCode::new(principal, "hash".to_string());
        store
            .replace_backup_codes(principal, std::slice::from_ref(&code))
            .await
            .unwrap();

        assert!(store.consume_backup_code(code.code_id).await.unwrap());
        assert!(!store.consume_backup_code(code.code_id).await.unwrap());
        assert!(store.unused_backup_codes(principal).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_share_one_code() {
        let store = Arc::new(MemoryStore::new());
        let principal = Uuid::new_v4();
        let code = BackupCode::new(principal, "hash".to_string());
        store
            .replace_backup_codes(principal, std::slice::from_ref(&code))
            .await
            .unwrap();

        let code_id = code.code_id;
        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.consume_backup_code(code_id).await.unwrap() })
            })
            .collect();

        let mut wins = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_redeem_challenge_once() {
        let store = MemoryStore::new();
        let challenge = ChallengeRecord::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Utc::now() + Duration::minutes(5),
        );
        store.insert_challenge(&challenge).await.unwrap();

        assert!(store.redeem_challenge(challenge.challenge_id, 3).await.unwrap());
        assert!(!store.redeem_challenge(challenge.challenge_id, 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_keeps_only_open_challenges() {
        let store = MemoryStore::new();
        let principal = Uuid::new_v4();
        let now = Utc::now();

        let open = ChallengeRecord::new(Uuid::new_v4(), principal, now + Duration::minutes(5));
        let expired = ChallengeRecord::new(Uuid::new_v4(), principal, now - Duration::seconds(1));
        let redeemed = ChallengeRecord::new(Uuid::new_v4(), principal, now + Duration::minutes(5));
        let burned = ChallengeRecord::new(Uuid::new_v4(), principal, now + Duration::minutes(5));
        let someone_else = ChallengeRecord::new(Uuid::new_v4(), Uuid::new_v4(), now - Duration::seconds(1));
        for challenge in [&open, &expired, &redeemed, &burned, &someone_else] {
            store.insert_challenge(challenge).await.unwrap();
        }
        store.redeem_challenge(redeemed.challenge_id, 3).await.unwrap();
        for _ in 0..3 {
            store.record_challenge_failure(burned.challenge_id).await.unwrap();
        }

        assert_eq!(store.purge_spent_challenges(principal, 3).await.unwrap(), 3);

        let left = store.challenges_for(principal);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].challenge_id, open.challenge_id);
        assert_eq!(store.challenges_for(someone_else.principal_id).len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_username_in_tenant_conflicts() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let first = Principal::new(tenant, "alice".into(), "a@example.com".into(), "h".into());
        let second = Principal::new(tenant, "alice".into(), "b@example.com".into(), "h".into());
        let elsewhere = Principal::new(Uuid::new_v4(), "alice".into(), "a@example.com".into(), "h".into());

        store.insert_principal(&first).await.unwrap();
        assert!(matches!(
            store.insert_principal(&second).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(store.insert_principal(&elsewhere).await.is_ok());
    }
}
