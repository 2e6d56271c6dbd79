//! Role model: a named permission bundle assigned to principals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Role {
    pub role_id: Uuid,
    pub tenant_id: Uuid,
    pub role_name: String,
    pub created_utc: DateTime<Utc>,
}

impl Role {
    pub fn new(tenant_id: Uuid, role_name: String) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            tenant_id,
            role_name,
            created_utc: Utc::now(),
        }
    }
}
