//! User and tenant lookups. The auth core only reads identities; account
//! management lives elsewhere and is consumed through this trait.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{Tenant, User};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// User by email inside a specific tenant.
    async fn find_by_email(
        &self,
        email: &str,
        tenant_id: Uuid,
    ) -> Result<Option<User>, anyhow::Error>;

    /// The user's default-tenant membership, when no tenant hint is given.
    async fn find_default_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error>;

    /// Every membership for the email, across tenants.
    async fn find_all_by_email(&self, email: &str) -> Result<Vec<User>, anyhow::Error>;

    async fn find_by_id(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<User>, anyhow::Error>;

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

const USER_COLUMNS: &str = "user_id, tenant_id, email, password_hash, roles, status_code, \
                            email_verified, default_tenant, created_at";

pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgDirectory {
    async fn find_by_email(
        &self,
        email: &str,
        tenant_id: Uuid,
    ) -> Result<Option<User>, anyhow::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE email = $1 AND tenant_id = $2",
            USER_COLUMNS
        ))
        .bind(email)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_default_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE email = $1 AND default_tenant = TRUE",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_all_by_email(&self, email: &str) -> Result<Vec<User>, anyhow::Error> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE email = $1 ORDER BY created_at",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn find_by_id(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<User>, anyhow::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE user_id = $1 AND tenant_id = $2",
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, anyhow::Error> {
        let tenant = sqlx::query_as::<_, Tenant>(
            "SELECT tenant_id, name, state_code, mfa_required, mfa_allowed_methods, \
                    mfa_grace_period_ends_at, created_at \
             FROM tenants WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tenant)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Fixture-backed directory for tests and local development.
#[derive(Default)]
pub struct MemoryDirectory {
    users: Mutex<Vec<User>>,
    tenants: Mutex<Vec<Tenant>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User) {
        self.users.lock().unwrap().push(user);
    }

    pub fn add_tenant(&self, tenant: Tenant) {
        self.tenants.lock().unwrap().push(tenant);
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn find_by_email(
        &self,
        email: &str,
        tenant_id: Uuid,
    ) -> Result<Option<User>, anyhow::Error> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email && u.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_default_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email && u.default_tenant)
            .cloned())
    }

    async fn find_all_by_email(&self, email: &str) -> Result<Vec<User>, anyhow::Error> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.email == email)
            .cloned()
            .collect())
    }

    async fn find_by_id(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<User>, anyhow::Error> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.user_id == user_id && u.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, anyhow::Error> {
        Ok(self
            .tenants
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.tenant_id == tenant_id)
            .cloned())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
