//! Policy documents: tenant-scoped sets of Allow/Deny statements over
//! actions and resources.
//!
//! Actions are strings such as `user:read`; resources are strings such as
//! `org:<tenant>:user:<principal>`. The literal `*` matches anything in
//! either position. Stored resource patterns may carry the placeholders
//! `{user_id}` and `{org_id}`, which are expanded per principal at
//! evaluation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

pub const WILDCARD: &str = "*";
pub const USER_ID_PLACEHOLDER: &str = "{user_id}";
pub const ORG_ID_PLACEHOLDER: &str = "{org_id}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

impl std::str::FromStr for Effect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            other => Err(format!("Invalid effect: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Policy {
    pub policy_id: Uuid,
    pub tenant_id: Uuid,
    pub policy_name: String,
    pub policy_slug: String,
    pub description: String,
    pub created_utc: DateTime<Utc>,
}

impl Policy {
    pub fn new(tenant_id: Uuid, policy_name: String, policy_slug: String, description: String) -> Self {
        Self {
            policy_id: Uuid::new_v4(),
            tenant_id,
            policy_name,
            policy_slug,
            description,
            created_utc: Utc::now(),
        }
    }
}

/// A resource pattern bound to the tenant it may match in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResourceGrant {
    pub tenant_id: Uuid,
    pub resource: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Statement {
    pub statement_id: Uuid,
    pub policy_id: Uuid,
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<ResourceGrant>,
}

impl Statement {
    /// Build a statement whose resources all belong to `tenant_id`.
    pub fn new(
        policy_id: Uuid,
        tenant_id: Uuid,
        effect: Effect,
        actions: Vec<String>,
        resources: Vec<String>,
    ) -> Self {
        Self {
            statement_id: Uuid::new_v4(),
            policy_id,
            effect,
            actions,
            resources: resources
                .into_iter()
                .map(|resource| ResourceGrant {
                    tenant_id,
                    resource,
                })
                .collect(),
        }
    }

    pub fn matches_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == WILDCARD || a == action)
    }

    /// Resource match for a principal of `tenant_id`. Entries belonging to
    /// another tenant never match, wildcard or not.
    ///
    /// Stored entries keep their `{user_id}` and `{org_id}` placeholders.
    /// They are expanded with the evaluated principal's own ids before the
    /// comparison, so one statement grants each principal its own resource.
    pub fn matches_resource(&self, resource: &str, tenant_id: Uuid, principal_id: Uuid) -> bool {
        self.resources.iter().any(|grant| {
            grant.tenant_id == tenant_id
                && (grant.resource == WILDCARD
                    || expand_resource(&grant.resource, principal_id, tenant_id) == resource)
        })
    }
}

/// Policy together with its statements.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PolicyDocument {
    #[serde(flatten)]
    pub policy: Policy,
    pub statements: Vec<Statement>,
}

/// Substitute `{user_id}` and `{org_id}` in a resource template.
pub fn expand_resource(template: &str, principal_id: Uuid, tenant_id: Uuid) -> String {
    template
        .replace(USER_ID_PLACEHOLDER, &principal_id.to_string())
        .replace(ORG_ID_PLACEHOLDER, &tenant_id.to_string())
}
