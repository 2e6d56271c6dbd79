//! Principal registration and tenant provisioning.
//!
//! Public registration always provisions a fresh tenant: it seeds the
//! default policies and makes the registrant its administrator
//! (FullAccess). Joining an existing tenant only happens through
//! [`RegistrationService::create_principal`], which the HTTP layer gates
//! behind `user:create` on the tenant; those members receive SelfManage.

use std::sync::Arc;

use secrecy::ExposeSecret;
use uuid::Uuid;

use super::error::ServiceError;
use super::seeds::seed_default_policies;
use super::store::{IamStore, PolicyTarget, StoreError};
use crate::config::BootstrapAdmin;
use crate::models::tenant::slugify;
use crate::models::{Principal, Tenant};
use crate::utils::{hash_password_blocking, Password};

/// Fresh slugs tried before giving up on a taken one.
const SLUG_ATTEMPTS: usize = 5;

#[derive(Debug)]
pub struct RegisterCommand {
    pub username: String,
    pub email: String,
    pub password: Password,
    /// Name of the organization to create; `None` generates one.
    pub organization: Option<String>,
}

/// Principal added to an existing tenant by one of its administrators.
#[derive(Debug)]
pub struct NewMember {
    pub username: String,
    pub email: String,
    pub password: Password,
}

#[derive(Debug)]
pub struct Registration {
    pub principal: Principal,
    pub tenant: Tenant,
    pub tenant_created: bool,
    pub is_tenant_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    FullAccess,
    SelfManage,
}

#[derive(Clone)]
pub struct RegistrationService {
    store: Arc<dyn IamStore>,
    default_tenant_slug: String,
    password_min_length: usize,
    bootstrap_admin: Option<BootstrapAdmin>,
}

impl RegistrationService {
    pub fn new(
        store: Arc<dyn IamStore>,
        default_tenant_slug: String,
        password_min_length: usize,
    ) -> Self {
        Self {
            store,
            default_tenant_slug,
            password_min_length,
            bootstrap_admin: None,
        }
    }

    pub fn with_bootstrap_admin(mut self, admin: Option<BootstrapAdmin>) -> Self {
        self.bootstrap_admin = admin;
        self
    }

    /// Make sure the default tenant exists with its policies, plus the
    /// configured operator account while the tenant is still empty. Run at
    /// startup.
    pub async fn bootstrap_default_tenant(&self) -> Result<Tenant, ServiceError> {
        let slug = self.default_tenant_slug.clone();
        let tenant = match self.store.find_tenant_by_slug(&slug).await? {
            Some(tenant) => tenant,
            None => {
                let tenant = Tenant::new(slug.clone(), slug.clone());
                match self.store.insert_tenant(&tenant).await {
                    Ok(()) => {
                        tracing::info!(tenant_id = %tenant.tenant_id, slug = %tenant.tenant_slug, "Default tenant created");
                        tenant
                    }
                    // Another instance created it first.
                    Err(StoreError::Conflict(_)) => self
                        .store
                        .find_tenant_by_slug(&slug)
                        .await?
                        .ok_or(ServiceError::NotFound("default tenant"))?,
                    Err(e) => return Err(e.into()),
                }
            }
        };
        seed_default_policies(self.store.as_ref(), tenant.tenant_id).await?;

        if let Some(admin) = &self.bootstrap_admin {
            if self.store.count_principals(tenant.tenant_id).await? == 0 {
                let member = NewMember {
                    username: admin.username.clone(),
                    email: admin.email.clone(),
                    password: Password::new(admin.password.expose_secret().clone()),
                };
                match self.enroll(&tenant, member, Grant::FullAccess).await {
                    Ok(principal) => tracing::info!(
                        principal_id = %principal.principal_id,
                        "Bootstrap administrator created"
                    ),
                    Err(ServiceError::Conflict(_)) => {
                        tracing::debug!("Bootstrap administrator already present")
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(tenant)
    }

    /// Create a new tenant and its first principal, who administers it.
    #[tracing::instrument(skip(self, command), fields(username = %command.username))]
    pub async fn register(&self, command: RegisterCommand) -> Result<Registration, ServiceError> {
        self.check_credentials(&command.username, &command.password)?;

        let name = match command.organization.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => {
                if slugify(name).is_empty() {
                    return Err(ServiceError::InvalidInput(
                        "organization name must contain letters or digits".to_string(),
                    ));
                }
                name.to_string()
            }
            _ => format!("Organization {}", random_hex(8)),
        };

        // Hash first; a failure must not leave an empty tenant behind.
        let password_hash = hash_password_blocking(command.password).await?;
        let tenant = self.create_tenant(&name).await?;

        let principal = Principal::new(
            tenant.tenant_id,
            command.username,
            command.email.trim().to_lowercase(),
            password_hash.into_string(),
        );
        self.insert_with_grant(&tenant, &principal, Grant::FullAccess).await?;

        tracing::info!(
            principal_id = %principal.principal_id,
            tenant_id = %tenant.tenant_id,
            slug = %tenant.tenant_slug,
            "Principal registered with new tenant"
        );

        Ok(Registration {
            principal,
            tenant,
            tenant_created: true,
            is_tenant_admin: true,
        })
    }

    /// Add an active principal with SelfManage to an existing tenant.
    #[tracing::instrument(skip(self, member), fields(tenant_id = %tenant_id, username = %member.username))]
    pub async fn create_principal(
        &self,
        tenant_id: Uuid,
        member: NewMember,
    ) -> Result<Principal, ServiceError> {
        let tenant = self
            .store
            .find_tenant(tenant_id)
            .await?
            .ok_or(ServiceError::NotFound("tenant"))?;

        let principal = self.enroll(&tenant, member, Grant::SelfManage).await?;
        tracing::info!(principal_id = %principal.principal_id, "Principal created");
        Ok(principal)
    }

    async fn enroll(
        &self,
        tenant: &Tenant,
        member: NewMember,
        grant: Grant,
    ) -> Result<Principal, ServiceError> {
        self.check_credentials(&member.username, &member.password)?;
        let password_hash = hash_password_blocking(member.password).await?;

        let principal = Principal::new(
            tenant.tenant_id,
            member.username,
            member.email.trim().to_lowercase(),
            password_hash.into_string(),
        );
        self.insert_with_grant(tenant, &principal, grant).await?;
        Ok(principal)
    }

    async fn insert_with_grant(
        &self,
        tenant: &Tenant,
        principal: &Principal,
        grant: Grant,
    ) -> Result<(), ServiceError> {
        let seeded = seed_default_policies(self.store.as_ref(), tenant.tenant_id).await?;

        self.store
            .insert_principal(principal)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => {
                    ServiceError::Conflict("username or email already registered".to_string())
                }
                other => ServiceError::Store(other),
            })?;

        let policy_id = match grant {
            Grant::FullAccess => seeded.full_access,
            Grant::SelfManage => seeded.self_manage,
        };
        self.store
            .attach_policy(policy_id, PolicyTarget::Principal(principal.principal_id))
            .await?;
        Ok(())
    }

    fn check_credentials(&self, username: &str, password: &Password) -> Result<(), ServiceError> {
        validate_username(username)?;
        if password.as_str().chars().count() < self.password_min_length {
            return Err(ServiceError::InvalidInput(format!(
                "password must be at least {} characters",
                self.password_min_length
            )));
        }
        Ok(())
    }

    /// Insert a tenant named `name`. A taken slug gets a random suffix; a
    /// taken name is a conflict.
    async fn create_tenant(&self, name: &str) -> Result<Tenant, ServiceError> {
        let base = slugify(name);
        let mut slug = base.clone();

        for _ in 0..SLUG_ATTEMPTS {
            if self.store.find_tenant_by_slug(&slug).await?.is_none() {
                let tenant = Tenant::new(name.to_string(), slug.clone());
                match self.store.insert_tenant(&tenant).await {
                    Ok(()) => return Ok(tenant),
                    Err(StoreError::Conflict(_)) => {
                        // Slug still free means the name is what collided.
                        if self.store.find_tenant_by_slug(&slug).await?.is_none() {
                            return Err(name_taken());
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            slug = format!("{}-{}", base, random_hex(4));
        }

        Err(name_taken())
    }
}

fn name_taken() -> ServiceError {
    ServiceError::Conflict("organization name already exists".to_string())
}

fn random_hex(len: usize) -> String {
    Uuid::new_v4().simple().to_string().chars().take(len).collect()
}

/// Usernames double as TOTP account labels, so the charset is restricted.
pub fn validate_username(username: &str) -> Result<(), ServiceError> {
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if (3..=64).contains(&username.len()) && valid_chars {
        Ok(())
    } else {
        Err(ServiceError::InvalidInput(
            "username must be 3-64 characters of letters, digits, '.', '_' or '-'".to_string(),
        ))
    }
}
