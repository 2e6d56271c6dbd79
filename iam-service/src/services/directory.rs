//! Tenant-scoped authoring of policies, groups and roles.
//!
//! Every entity referenced by a request must live in the caller's tenant;
//! anything else is reported as not found so tenants cannot probe each other.

use std::sync::Arc;
use uuid::Uuid;

use super::error::ServiceError;
use super::store::{IamStore, PolicyTarget, StoreError};
use crate::models::tenant::slugify;
use crate::models::{Effect, Group, Policy, PolicyDocument, Role, Statement};

#[derive(Debug, Clone)]
pub struct StatementSpec {
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewPolicy {
    pub name: String,
    /// Derived from `name` when absent.
    pub slug: Option<String>,
    pub description: String,
    pub statements: Vec<StatementSpec>,
}

#[derive(Clone)]
pub struct DirectoryService {
    store: Arc<dyn IamStore>,
}

impl DirectoryService {
    pub fn new(store: Arc<dyn IamStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, request), fields(policy_name = %request.name))]
    pub async fn create_policy(
        &self,
        tenant_id: Uuid,
        request: NewPolicy,
    ) -> Result<PolicyDocument, ServiceError> {
        let name = non_blank(&request.name, "policy name")?;
        let slug = slugify(request.slug.as_deref().unwrap_or(name));
        if slug.is_empty() {
            return Err(ServiceError::InvalidInput(
                "policy slug must contain letters or digits".to_string(),
            ));
        }
        if request.statements.is_empty() {
            return Err(ServiceError::InvalidInput(
                "policy needs at least one statement".to_string(),
            ));
        }

        let policy = Policy::new(
            tenant_id,
            name.to_string(),
            slug,
            request.description.trim().to_string(),
        );

        let mut statements = Vec::with_capacity(request.statements.len());
        for entry in request.statements {
            let actions = clean_list(entry.actions, "actions")?;
            let resources = clean_list(entry.resources, "resources")?;
            statements.push(Statement::new(
                policy.policy_id,
                tenant_id,
                entry.effect,
                actions,
                resources,
            ));
        }

        let document = PolicyDocument { policy, statements };
        self.store
            .insert_policy(&document)
            .await
            .map_err(|e| conflict_as(e, "policy slug already exists"))?;

        tracing::info!(
            policy_id = %document.policy.policy_id,
            statements = document.statements.len(),
            "Policy created"
        );
        Ok(document)
    }

    #[tracing::instrument(skip(self))]
    pub async fn attach_policy(
        &self,
        tenant_id: Uuid,
        policy_id: Uuid,
        target: PolicyTarget,
    ) -> Result<(), ServiceError> {
        self.store
            .find_policy(policy_id)
            .await?
            .filter(|p| p.tenant_id == tenant_id)
            .ok_or(ServiceError::NotFound("policy"))?;

        match target {
            PolicyTarget::Principal(id) => self.principal_in_tenant(tenant_id, id).await?,
            PolicyTarget::Group(id) => {
                self.group_in_tenant(tenant_id, id).await?;
            }
            PolicyTarget::Role(id) => {
                self.role_in_tenant(tenant_id, id).await?;
            }
        }

        self.store.attach_policy(policy_id, target).await?;
        tracing::info!("Policy attached");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_group(&self, tenant_id: Uuid, name: &str) -> Result<Group, ServiceError> {
        let group = Group::new(tenant_id, non_blank(name, "group name")?.to_string());
        self.store
            .insert_group(&group)
            .await
            .map_err(|e| conflict_as(e, "group name already exists"))?;

        tracing::info!(group_id = %group.group_id, "Group created");
        Ok(group)
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_group_member(
        &self,
        tenant_id: Uuid,
        group_id: Uuid,
        principal_id: Uuid,
    ) -> Result<(), ServiceError> {
        self.group_in_tenant(tenant_id, group_id).await?;
        self.principal_in_tenant(tenant_id, principal_id).await?;
        self.store.add_group_member(group_id, principal_id).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_role(&self, tenant_id: Uuid, name: &str) -> Result<Role, ServiceError> {
        let role = Role::new(tenant_id, non_blank(name, "role name")?.to_string());
        self.store
            .insert_role(&role)
            .await
            .map_err(|e| conflict_as(e, "role name already exists"))?;

        tracing::info!(role_id = %role.role_id, "Role created");
        Ok(role)
    }

    #[tracing::instrument(skip(self))]
    pub async fn assign_role(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        principal_id: Uuid,
    ) -> Result<(), ServiceError> {
        self.role_in_tenant(tenant_id, role_id).await?;
        self.principal_in_tenant(tenant_id, principal_id).await?;
        self.store.assign_role(role_id, principal_id).await?;
        Ok(())
    }

    async fn principal_in_tenant(&self, tenant_id: Uuid, principal_id: Uuid) -> Result<(), ServiceError> {
        self.store
            .find_principal(principal_id)
            .await?
            .filter(|p| p.tenant_id == tenant_id)
            .map(|_| ())
            .ok_or(ServiceError::NotFound("principal"))
    }

    async fn group_in_tenant(&self, tenant_id: Uuid, group_id: Uuid) -> Result<Group, ServiceError> {
        self.store
            .find_group(group_id)
            .await?
            .filter(|g| g.tenant_id == tenant_id)
            .ok_or(ServiceError::NotFound("group"))
    }

    async fn role_in_tenant(&self, tenant_id: Uuid, role_id: Uuid) -> Result<Role, ServiceError> {
        self.store
            .find_role(role_id)
            .await?
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or(ServiceError::NotFound("role"))
    }
}

fn non_blank<'a>(value: &'a str, field: &str) -> Result<&'a str, ServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ServiceError::InvalidInput(format!("{} must not be empty", field)))
    } else {
        Ok(trimmed)
    }
}

fn clean_list(values: Vec<String>, field: &str) -> Result<Vec<String>, ServiceError> {
    let cleaned: Vec<String> = values
        .into_iter()
        .map(|v| v.trim().to_string())
        .collect();

    if cleaned.is_empty() || cleaned.iter().any(String::is_empty) {
        return Err(ServiceError::InvalidInput(format!(
            "statement {} must be a non-empty list of non-empty strings",
            field
        )));
    }
    Ok(cleaned)
}

fn conflict_as(err: StoreError, message: &str) -> ServiceError {
    match err {
        StoreError::Conflict(_) => ServiceError::Conflict(message.to_string()),
        other => ServiceError::Store(other),
    }
}
