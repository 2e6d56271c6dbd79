//! Default policies every tenant starts with.

use rand::{distributions::Alphanumeric, Rng};
use uuid::Uuid;

use super::store::{IamStore, StoreError};
use crate::models::{Effect, Policy, PolicyDocument, Statement};

pub struct PolicyTemplate {
    pub name: &'static str,
    pub slug_prefix: &'static str,
    pub description: &'static str,
    pub effect: Effect,
    pub actions: &'static [&'static str],
    pub resources: &'static [&'static str],
}

pub const FULL_ACCESS: PolicyTemplate = PolicyTemplate {
    name: "FullAccess",
    slug_prefix: "full-access",
    description: "Every action on every resource in the organization",
    effect: Effect::Allow,
    actions: &["*"],
    resources: &["*"],
};

pub const READ_ONLY: PolicyTemplate = PolicyTemplate {
    name: "ReadOnly",
    slug_prefix: "read-only",
    description: "Read users, groups, roles and policies",
    effect: Effect::Allow,
    actions: &["user:read", "group:read", "role:read", "policy:read"],
    resources: &["*"],
};

pub const SELF_MANAGE: PolicyTemplate = PolicyTemplate {
    name: "SelfManage",
    slug_prefix: "self-manage",
    description: "Read and update one's own user record",
    effect: Effect::Allow,
    actions: &["user:read", "user:update"],
    resources: &["org:{org_id}:user:{user_id}"],
};

pub const DEFAULT_TEMPLATES: [&PolicyTemplate; 3] = [&FULL_ACCESS, &READ_ONLY, &SELF_MANAGE];

/// Ids of a tenant's default policies.
#[derive(Debug, Clone, Copy)]
pub struct SeededPolicies {
    pub full_access: Uuid,
    pub read_only: Uuid,
    pub self_manage: Uuid,
}

impl PolicyTemplate {
    pub fn instantiate(&self, tenant_id: Uuid) -> PolicyDocument {
        let policy = Policy::new(
            tenant_id,
            self.name.to_string(),
            format!("{}-{}", self.slug_prefix, slug_suffix()),
            self.description.to_string(),
        );
        let statement = Statement::new(
            policy.policy_id,
            tenant_id,
            self.effect,
            self.actions.iter().map(|a| a.to_string()).collect(),
            self.resources.iter().map(|r| r.to_string()).collect(),
        );

        PolicyDocument {
            policy,
            statements: vec![statement],
        }
    }

    fn owns_slug(&self, slug: &str) -> bool {
        slug.strip_prefix(self.slug_prefix)
            .is_some_and(|rest| rest.starts_with('-'))
    }
}

fn slug_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Create whichever default policies the tenant is missing. Safe to re-run.
#[tracing::instrument(skip(store))]
pub async fn seed_default_policies(
    store: &dyn IamStore,
    tenant_id: Uuid,
) -> Result<SeededPolicies, StoreError> {
    let existing = store.list_policies(tenant_id).await?;
    let mut ids = [Uuid::nil(); 3];

    for (slot, template) in ids.iter_mut().zip(DEFAULT_TEMPLATES) {
        if let Some(found) = existing.iter().find(|p| template.owns_slug(&p.policy_slug)) {
            *slot = found.policy_id;
            continue;
        }

        let document = template.instantiate(tenant_id);
        store.insert_policy(&document).await?;
        tracing::info!(policy = template.name, slug = %document.policy.policy_slug, "Seeded default policy");
        *slot = document.policy.policy_id;
    }

    Ok(SeededPolicies {
        full_access: ids[0],
        read_only: ids[1],
        self_manage: ids[2],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tenant;
    use crate::services::memory::MemoryStore;

    #[test]
    fn test_slug_ownership() {
        assert!(FULL_ACCESS.owns_slug("full-access-a1b2c3"));
        assert!(!FULL_ACCESS.owns_slug("full-accessory-a1b2c3"));
        assert!(!READ_ONLY.owns_slug("full-access-a1b2c3"));
    }

    #[test]
    fn test_instantiated_slug_has_suffix() {
        let doc = SELF_MANAGE.instantiate(Uuid::new_v4());
        let suffix = doc.policy.policy_slug.strip_prefix("self-manage-").unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_eq!(doc.statements[0].resources[0].resource, "org:{org_id}:user:{user_id}");
    }

    #[tokio::test]
    async fn test_seeding_is_idempotent() {
        let store = MemoryStore::new();
        let tenant = Tenant::new("Acme".into(), "acme".into());
        store.insert_tenant(&tenant).await.unwrap();

        let first = seed_default_policies(&store, tenant.tenant_id).await.unwrap();
        let second = seed_default_policies(&store, tenant.tenant_id).await.unwrap();

        assert_eq!(first.full_access, second.full_access);
        assert_eq!(first.self_manage, second.self_manage);
        assert_eq!(store.list_policies(tenant.tenant_id).await.unwrap().len(), 3);
    }
}
