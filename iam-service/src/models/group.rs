use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Named collection of principals; policies attached to a group apply to every member.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Group {
    pub group_id: Uuid,
    pub tenant_id: Uuid,
    pub group_name: String,
    pub created_utc: DateTime<Utc>,
}

impl Group {
    pub fn new(tenant_id: Uuid, group_name: String) -> Self {
        Self {
            group_id: Uuid::new_v4(),
            tenant_id,
            group_name,
            created_utc: Utc::now(),
        }
    }
}
