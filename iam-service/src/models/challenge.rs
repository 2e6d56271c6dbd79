//! Server-side record of an outstanding second-factor challenge.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct ChallengeRecord {
    /// Matches the `jti` claim of the challenge token.
    pub challenge_id: Uuid,
    pub principal_id: Uuid,
    pub expires_utc: DateTime<Utc>,
    pub failed_attempts: i32,
    pub redeemed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl ChallengeRecord {
    pub fn new(challenge_id: Uuid, principal_id: Uuid, expires_utc: DateTime<Utc>) -> Self {
        Self {
            challenge_id,
            principal_id,
            expires_utc,
            failed_attempts: 0,
            redeemed_utc: None,
            created_utc: Utc::now(),
        }
    }

    /// Still redeemable: not redeemed, not expired, attempts left.
    pub fn is_open(&self, max_attempts: i32, now: DateTime<Utc>) -> bool {
        self.redeemed_utc.is_none() && self.expires_utc > now && self.failed_attempts < max_attempts
    }
}
