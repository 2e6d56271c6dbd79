use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::Effect;
use crate::services::{NewPolicy, PolicyTarget, StatementSpec};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct StatementRequest {
    pub effect: Effect,
    #[validate(length(min = 1, message = "At least one action is required"))]
    #[schema(example = json!(["group:read"]))]
    pub actions: Vec<String>,
    #[validate(length(min = 1, message = "At least one resource is required"))]
    #[schema(example = json!(["org:{org_id}:group"]))]
    pub resources: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePolicyRequest {
    #[validate(length(min = 1, max = 128, message = "Name must be 1-128 characters"))]
    #[schema(example = "Group Readers")]
    pub name: String,
    #[validate(length(min = 1, max = 128, message = "Slug must be 1-128 characters"))]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    #[validate(length(min = 1, message = "At least one statement is required"), nested)]
    pub statements: Vec<StatementRequest>,
}

impl From<CreatePolicyRequest> for NewPolicy {
    fn from(req: CreatePolicyRequest) -> Self {
        Self {
            name: req.name,
            slug: req.slug,
            description: req.description,
            statements: req
                .statements
                .into_iter()
                .map(|s| StatementSpec {
                    effect: s.effect,
                    actions: s.actions,
                    resources: s.resources,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Principal,
    Group,
    Role,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AttachPolicyRequest {
    pub target_type: AttachmentKind,
    pub target_id: Uuid,
}

impl AttachPolicyRequest {
    pub fn target(&self) -> PolicyTarget {
        match self.target_type {
            AttachmentKind::Principal => PolicyTarget::Principal(self.target_id),
            AttachmentKind::Group => PolicyTarget::Group(self.target_id),
            AttachmentKind::Role => PolicyTarget::Role(self.target_id),
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreatePrincipalRequest {
    #[validate(length(min = 3, max = 64, message = "Username must be 3-64 characters"))]
    #[schema(example = "bob")]
    pub username: String,
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "bob@acme.example")]
    pub email: String,
    #[validate(length(min = 1, max = 256, message = "Password is required"))]
    #[schema(min_length = 8)]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 128, message = "Name must be 1-128 characters"))]
    #[schema(example = "engineering")]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 128, message = "Name must be 1-128 characters"))]
    #[schema(example = "auditor")]
    pub name: String,
}

/// Body for group membership and role assignment.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct MemberRequest {
    pub principal_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AttachmentResponse {
    pub policy_id: Uuid,
    pub target_id: Uuid,
}
