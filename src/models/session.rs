//! Session records and the per-request device/location metadata that feeds
//! them. Metadata extraction is a pure data-gathering step; nothing in the
//! auth flow branches on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the session was established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionProvider {
    Email,
    TenantSwitch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub provider: SessionProvider,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(
        user_id: Uuid,
        tenant_id: Uuid,
        provider: SessionProvider,
        metadata: &DeviceMetadata,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            tenant_id,
            provider,
            ip_address: metadata.ip_address.clone(),
            user_agent: metadata.user_agent.clone(),
            device_fingerprint: metadata.fingerprint.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Device/location metadata gathered once per authenticated request and
/// passed through unchanged to session creation.
#[derive(Debug, Clone, Default)]
pub struct DeviceMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub fingerprint: Option<String>,
}
