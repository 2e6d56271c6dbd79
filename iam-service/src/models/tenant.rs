//! Tenant model: the isolation boundary for principals, groups, roles and policies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub tenant_slug: String,
    pub created_utc: DateTime<Utc>,
}

impl Tenant {
    pub fn new(tenant_name: String, tenant_slug: String) -> Self {
        Self {
            tenant_id: Uuid::new_v4(),
            tenant_name,
            tenant_slug,
            created_utc: Utc::now(),
        }
    }
}

/// Derive a URL-safe slug from a display name: lowercase ASCII alphanumerics
/// separated by single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}
