use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// One-time recovery code. Only the argon2 hash is stored.
#[derive(Debug, Clone, FromRow)]
pub struct BackupCode {
    pub code_id: Uuid,
    pub principal_id: Uuid,
    pub code_hash: String,
    pub used: bool,
    pub used_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl BackupCode {
    pub fn new(principal_id: Uuid, code_hash: String) -> Self {
        Self {
            code_id: Uuid::new_v4(),
            principal_id,
            code_hash,
            used: false,
            used_utc: None,
            created_utc: Utc::now(),
        }
    }
}
