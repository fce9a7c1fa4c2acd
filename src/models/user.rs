//! User model - tenant-scoped user accounts, read-only to the auth core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Account state codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    PendingApproval,
    Active,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::PendingApproval => "pending_approval",
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
        }
    }
}

/// User entity. One row per (email, tenant) membership; the same email may
/// hold memberships in several tenants, at most one marked as the default.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub roles: Vec<String>,
    pub status_code: String,
    pub email_verified: bool,
    pub default_tenant: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(tenant_id: Uuid, email: String, password_hash: String, roles: Vec<String>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            tenant_id,
            email,
            password_hash,
            roles,
            status_code: UserStatus::Active.as_str().to_string(),
            email_verified: false,
            default_tenant: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status_code == UserStatus::Active.as_str()
    }

    pub fn is_pending_approval(&self) -> bool {
        self.status_code == UserStatus::PendingApproval.as_str()
    }

    pub fn is_suspended(&self) -> bool {
        self.status_code == UserStatus::Suspended.as_str()
    }
}

/// User view returned by the API (no credential material), with the merged
/// permission set resolved at response time.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub email_verified: bool,
    pub status: String,
}

impl UserProfile {
    pub fn from_user(user: &User, permissions: Vec<String>) -> Self {
        Self {
            user_id: user.user_id,
            tenant_id: user.tenant_id,
            email: user.email.clone(),
            roles: user.roles.clone(),
            permissions,
            email_verified: user.email_verified,
            status: user.status_code.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_gates() {
        let mut user = User::new(
            Uuid::new_v4(),
            "a@x.com".to_string(),
            "hash".to_string(),
            vec!["member".to_string()],
        );
        assert!(user.is_active());

        user.status_code = UserStatus::PendingApproval.as_str().to_string();
        assert!(user.is_pending_approval());
        assert!(!user.is_active());

        user.status_code = UserStatus::Suspended.as_str().to_string();
        assert!(user.is_suspended());
    }
}
