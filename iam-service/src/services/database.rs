//! PostgreSQL implementation of `IamStore`.
//!
//! Multi-row writes (policy documents, backup-code batches, second-factor
//! disable) run in a single transaction. Single-use state transitions are
//! conditional UPDATEs whose affected-row count decides the winner.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

use super::store::{IamStore, PolicySources, PolicyTarget, StoreError};
use crate::models::{
    BackupCode, ChallengeRecord, Effect, Group, LoginActivity, Policy, PolicyDocument, Principal,
    ResourceGrant, Role, Statement, Tenant,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct StatementRow {
    statement_id: Uuid,
    policy_id: Uuid,
    effect_code: String,
}

#[derive(FromRow)]
struct ActionRow {
    statement_id: Uuid,
    action: String,
}

#[derive(FromRow)]
struct ResourceRow {
    statement_id: Uuid,
    tenant_id: Uuid,
    resource: String,
}

#[async_trait]
impl IamStore for PgStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ==================== Tenants ====================

    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tenants (tenant_id, tenant_name, tenant_slug, created_utc)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(tenant.tenant_id)
        .bind(&tenant.tenant_name)
        .bind(&tenant.tenant_slug)
        .bind(tenant.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, StoreError> {
        Ok(
            sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StoreError> {
        Ok(
            sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    // ==================== Principals ====================

    async fn insert_principal(&self, principal: &Principal) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO principals (
                principal_id, tenant_id, username, email, password_hash, is_active,
                totp_secret, requires_second_factor, created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(principal.principal_id)
        .bind(principal.tenant_id)
        .bind(&principal.username)
        .bind(&principal.email)
        .bind(&principal.password_hash)
        .bind(principal.is_active)
        .bind(&principal.totp_secret)
        .bind(principal.requires_second_factor)
        .bind(principal.created_utc)
        .bind(principal.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_principal(&self, principal_id: Uuid) -> Result<Option<Principal>, StoreError> {
        Ok(
            sqlx::query_as::<_, Principal>("SELECT * FROM principals WHERE principal_id = $1")
                .bind(principal_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_principal_by_username(
        &self,
        tenant_id: Uuid,
        username: &str,
    ) -> Result<Option<Principal>, StoreError> {
        Ok(sqlx::query_as::<_, Principal>(
            "SELECT * FROM principals WHERE tenant_id = $1 AND username = $2",
        )
        .bind(tenant_id)
        .bind(username)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn count_principals(&self, tenant_id: Uuid) -> Result<i64, StoreError> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM principals WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn set_totp_secret(&self, principal_id: Uuid, secret: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE principals SET totp_secret = $2, updated_utc = NOW() WHERE principal_id = $1",
        )
        .bind(principal_id)
        .bind(secret)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn enable_second_factor(&self, principal_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE principals SET requires_second_factor = TRUE, updated_utc = NOW()
            WHERE principal_id = $1
            "#,
        )
        .bind(principal_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn disable_second_factor(&self, principal_id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE principals
            SET totp_secret = '', requires_second_factor = FALSE, updated_utc = NOW()
            WHERE principal_id = $1
            "#,
        )
        .bind(principal_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM backup_codes WHERE principal_id = $1")
            .bind(principal_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ==================== Backup codes ====================

    async fn replace_backup_codes(
        &self,
        principal_id: Uuid,
        codes: &[BackupCode],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM backup_codes WHERE principal_id = $1")
            .bind(principal_id)
            .execute(&mut *tx)
            .await?;

        for code in codes {
            sqlx::query(
                r#"
                INSERT INTO backup_codes (code_id, principal_id, code_hash, used, used_utc, created_utc)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(code.code_id)
            .bind(principal_id)
            .bind(&code.code_hash)
            .bind(code.used)
            .bind(code.used_utc)
            .bind(code.created_utc)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn unused_backup_codes(&self, principal_id: Uuid) -> Result<Vec<BackupCode>, StoreError> {
        Ok(sqlx::query_as::<_, BackupCode>(
            r#"
            SELECT * FROM backup_codes
            WHERE principal_id = $1 AND used = FALSE
            ORDER BY created_utc
            "#,
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn consume_backup_code(&self, code_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE backup_codes SET used = TRUE, used_utc = NOW() WHERE code_id = $1 AND used = FALSE",
        )
        .bind(code_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    // ==================== Challenges ====================

    async fn insert_challenge(&self, challenge: &ChallengeRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO challenge_tokens (
                challenge_id, principal_id, expires_utc, failed_attempts, redeemed_utc, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(challenge.challenge_id)
        .bind(challenge.principal_id)
        .bind(challenge.expires_utc)
        .bind(challenge.failed_attempts)
        .bind(challenge.redeemed_utc)
        .bind(challenge.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_challenge(
        &self,
        challenge_id: Uuid,
    ) -> Result<Option<ChallengeRecord>, StoreError> {
        Ok(sqlx::query_as::<_, ChallengeRecord>(
            "SELECT * FROM challenge_tokens WHERE challenge_id = $1",
        )
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn record_challenge_failure(&self, challenge_id: Uuid) -> Result<i32, StoreError> {
        let attempts = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE challenge_tokens SET failed_attempts = failed_attempts + 1
            WHERE challenge_id = $1
            RETURNING failed_attempts
            "#,
        )
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(attempts.unwrap_or(0))
    }

    async fn redeem_challenge(
        &self,
        challenge_id: Uuid,
        max_attempts: i32,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE challenge_tokens SET redeemed_utc = NOW()
            WHERE challenge_id = $1
              AND redeemed_utc IS NULL
              AND expires_utc > NOW()
              AND failed_attempts < $2
            "#,
        )
        .bind(challenge_id)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn purge_spent_challenges(
        &self,
        principal_id: Uuid,
        max_attempts: i32,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM challenge_tokens
            WHERE principal_id = $1
              AND (expires_utc <= NOW() OR redeemed_utc IS NOT NULL OR failed_attempts >= $2)
            "#,
        )
        .bind(principal_id)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ==================== Groups and roles ====================

    async fn insert_group(&self, group: &Group) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO groups (group_id, tenant_id, group_name, created_utc) VALUES ($1, $2, $3, $4)",
        )
        .bind(group.group_id)
        .bind(group.tenant_id)
        .bind(&group.group_name)
        .bind(group.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_group(&self, group_id: Uuid) -> Result<Option<Group>, StoreError> {
        Ok(
            sqlx::query_as::<_, Group>("SELECT * FROM groups WHERE group_id = $1")
                .bind(group_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn add_group_member(&self, group_id: Uuid, principal_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO group_members (group_id, principal_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(group_id)
        .bind(principal_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_role(&self, role: &Role) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO roles (role_id, tenant_id, role_name, created_utc) VALUES ($1, $2, $3, $4)",
        )
        .bind(role.role_id)
        .bind(role.tenant_id)
        .bind(&role.role_name)
        .bind(role.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, StoreError> {
        Ok(
            sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE role_id = $1")
                .bind(role_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn assign_role(&self, role_id: Uuid, principal_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO principal_roles (role_id, principal_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(role_id)
        .bind(principal_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Policies ====================

    async fn insert_policy(&self, document: &PolicyDocument) -> Result<(), StoreError> {
        let policy = &document.policy;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO policies (policy_id, tenant_id, policy_name, policy_slug, description, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(policy.policy_id)
        .bind(policy.tenant_id)
        .bind(&policy.policy_name)
        .bind(&policy.policy_slug)
        .bind(&policy.description)
        .bind(policy.created_utc)
        .execute(&mut *tx)
        .await?;

        for statement in &document.statements {
            sqlx::query(
                "INSERT INTO policy_statements (statement_id, policy_id, effect_code) VALUES ($1, $2, $3)",
            )
            .bind(statement.statement_id)
            .bind(policy.policy_id)
            .bind(statement.effect.as_str())
            .execute(&mut *tx)
            .await?;

            for action in &statement.actions {
                sqlx::query(
                    "INSERT INTO statement_actions (statement_id, action) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                )
                .bind(statement.statement_id)
                .bind(action)
                .execute(&mut *tx)
                .await?;
            }

            for grant in &statement.resources {
                sqlx::query(
                    r#"
                    INSERT INTO statement_resources (statement_id, tenant_id, resource)
                    VALUES ($1, $2, $3)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(statement.statement_id)
                .bind(grant.tenant_id)
                .bind(&grant.resource)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_policy(&self, policy_id: Uuid) -> Result<Option<Policy>, StoreError> {
        Ok(
            sqlx::query_as::<_, Policy>("SELECT * FROM policies WHERE policy_id = $1")
                .bind(policy_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_policies(&self, tenant_id: Uuid) -> Result<Vec<Policy>, StoreError> {
        Ok(sqlx::query_as::<_, Policy>(
            "SELECT * FROM policies WHERE tenant_id = $1 ORDER BY created_utc",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn attach_policy(&self, policy_id: Uuid, target: PolicyTarget) -> Result<(), StoreError> {
        let (sql, target_id) = match target {
            PolicyTarget::Principal(id) => (
                "INSERT INTO principal_policies (policy_id, principal_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                id,
            ),
            PolicyTarget::Group(id) => (
                "INSERT INTO group_policies (policy_id, group_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                id,
            ),
            PolicyTarget::Role(id) => (
                "INSERT INTO role_policies (policy_id, role_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                id,
            ),
        };

        sqlx::query(sql)
            .bind(policy_id)
            .bind(target_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn policy_sources(&self, principal_id: Uuid) -> Result<PolicySources, StoreError> {
        let direct = sqlx::query_scalar::<_, Uuid>(
            "SELECT policy_id FROM principal_policies WHERE principal_id = $1",
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?;

        let via_groups = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT gp.policy_id
            FROM group_policies gp
            JOIN group_members gm ON gm.group_id = gp.group_id
            WHERE gm.principal_id = $1
            "#,
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?;

        let via_roles = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT rp.policy_id
            FROM role_policies rp
            JOIN principal_roles pr ON pr.role_id = rp.role_id
            WHERE pr.principal_id = $1
            "#,
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(PolicySources {
            direct,
            via_groups,
            via_roles,
        })
    }

    async fn statements_for_policies(
        &self,
        policy_ids: &[Uuid],
    ) -> Result<Vec<Statement>, StoreError> {
        if policy_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, StatementRow>(
            "SELECT statement_id, policy_id, effect_code FROM policy_statements WHERE policy_id = ANY($1)",
        )
        .bind(policy_ids)
        .fetch_all(&self.pool)
        .await?;

        let statement_ids: Vec<Uuid> = rows.iter().map(|r| r.statement_id).collect();

        let actions = sqlx::query_as::<_, ActionRow>(
            "SELECT statement_id, action FROM statement_actions WHERE statement_id = ANY($1)",
        )
        .bind(&statement_ids)
        .fetch_all(&self.pool)
        .await?;

        let resources = sqlx::query_as::<_, ResourceRow>(
            "SELECT statement_id, tenant_id, resource FROM statement_resources WHERE statement_id = ANY($1)",
        )
        .bind(&statement_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut actions_by_statement: HashMap<Uuid, Vec<String>> = HashMap::new();
        for row in actions {
            actions_by_statement
                .entry(row.statement_id)
                .or_default()
                .push(row.action);
        }

        let mut resources_by_statement: HashMap<Uuid, Vec<ResourceGrant>> = HashMap::new();
        for row in resources {
            resources_by_statement
                .entry(row.statement_id)
                .or_default()
                .push(ResourceGrant {
                    tenant_id: row.tenant_id,
                    resource: row.resource,
                });
        }

        rows.into_iter()
            .map(|row| {
                let effect: Effect = row.effect_code.parse().map_err(|e: String| {
                    StoreError::Database(anyhow::anyhow!(
                        "statement {} has corrupt effect: {}",
                        row.statement_id,
                        e
                    ))
                })?;
                Ok(Statement {
                    statement_id: row.statement_id,
                    policy_id: row.policy_id,
                    effect,
                    actions: actions_by_statement
                        .remove(&row.statement_id)
                        .unwrap_or_default(),
                    resources: resources_by_statement
                        .remove(&row.statement_id)
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    // ==================== Audit ====================

    async fn insert_login_activity(&self, activity: &LoginActivity) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO login_activity (
                activity_id, tenant_id, principal_id, username, ip_address, user_agent,
                os_name, browser_name, device_type, status_code, success, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(activity.activity_id)
        .bind(activity.tenant_id)
        .bind(activity.principal_id)
        .bind(&activity.username)
        .bind(&activity.ip_address)
        .bind(&activity.user_agent)
        .bind(&activity.os_name)
        .bind(&activity.browser_name)
        .bind(&activity.device_type)
        .bind(&activity.status_code)
        .bind(activity.success)
        .bind(activity.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
