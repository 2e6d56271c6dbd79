//! Policy evaluation: aggregate every policy reachable from a principal and
//! resolve Allow/Deny for one action on one resource.
//!
//! Resolution order: any matching Deny wins immediately, otherwise any
//! matching Allow grants, otherwise the answer is deny.

use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use super::store::{IamStore, StoreError};
use crate::models::{Effect, Principal, Statement};

#[derive(Clone)]
pub struct PolicyEvaluator {
    store: Arc<dyn IamStore>,
}

impl PolicyEvaluator {
    pub fn new(store: Arc<dyn IamStore>) -> Self {
        Self { store }
    }

    /// `resource` must already have its placeholders substituted.
    #[tracing::instrument(skip(self, principal), fields(principal_id = %principal.principal_id))]
    pub async fn evaluate(
        &self,
        principal: &Principal,
        action: &str,
        resource: &str,
    ) -> Result<bool, StoreError> {
        let policy_ids = self.effective_policy_ids(principal.principal_id).await?;
        if policy_ids.is_empty() {
            tracing::debug!("No policies attached, denying");
            return Ok(false);
        }

        let statements = self.store.statements_for_policies(&policy_ids).await?;
        let allowed = decide(
            &statements,
            principal.tenant_id,
            principal.principal_id,
            action,
            resource,
        );

        tracing::debug!(
            policies = policy_ids.len(),
            statements = statements.len(),
            allowed,
            "Policy evaluated"
        );
        Ok(allowed)
    }

    /// Direct ∪ group ∪ role policy ids, without duplicates.
    pub async fn effective_policy_ids(&self, principal_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let sources = self.store.policy_sources(principal_id).await?;

        let ids: HashSet<Uuid> = sources
            .direct
            .into_iter()
            .chain(sources.via_groups)
            .chain(sources.via_roles)
            .collect();

        Ok(ids.into_iter().collect())
    }
}

/// Pure decision over a loaded statement set.
pub fn decide(
    statements: &[Statement],
    tenant_id: Uuid,
    principal_id: Uuid,
    action: &str,
    resource: &str,
) -> bool {
    let mut allowed = false;

    for statement in statements {
        if !statement.matches_action(action)
            || !statement.matches_resource(resource, tenant_id, principal_id)
        {
            continue;
        }

        match statement.effect {
            Effect::Deny => return false,
            Effect::Allow => allowed = true,
        }
    }

    allowed
}
