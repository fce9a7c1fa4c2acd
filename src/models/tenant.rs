//! Tenant model - root of the multi-tenancy hierarchy, carrying the
//! tenant-level MFA enforcement policy set at administration time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Tenant state codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantState {
    Active,
    Suspended,
}

impl TenantState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantState::Active => "active",
            TenantState::Suspended => "suspended",
        }
    }
}

/// Tenant entity.
#[derive(Debug, Clone, FromRow)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub name: String,
    pub state_code: String,
    /// When true, every member must complete an MFA challenge on login and
    /// trusted devices do not bypass it.
    pub mfa_required: bool,
    /// Method names the tenant permits for challenges (totp, sms, email,
    /// recovery). Empty means all methods are allowed.
    pub mfa_allowed_methods: Vec<String>,
    /// End of the enrollment grace window for a newly enforced MFA policy.
    pub mfa_grace_period_ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: String) -> Self {
        Self {
            tenant_id: Uuid::new_v4(),
            name,
            state_code: TenantState::Active.as_str().to_string(),
            mfa_required: false,
            mfa_allowed_methods: Vec::new(),
            mfa_grace_period_ends_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state_code == TenantState::Active.as_str()
    }

    pub fn is_suspended(&self) -> bool {
        self.state_code == TenantState::Suspended.as_str()
    }
}
