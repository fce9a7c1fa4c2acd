//! Refresh token record. The raw token is an opaque random value handed to
//! the client once and never stored; the store key is a one-way hash of it.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// SHA-256 hex of the raw token value.
    pub token_id: String,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// Mint a fresh opaque token and its store record. Returns the raw value
    /// (for the client) together with the record (for the store).
    pub fn mint(user_id: Uuid, tenant_id: Uuid, expires_in_days: i64) -> (String, Self) {
        let mut raw_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw_bytes);
        let raw = hex::encode(raw_bytes);

        let now = Utc::now();
        let record = Self {
            token_id: Self::hash_token(&raw),
            user_id,
            tenant_id,
            expires_at: now + Duration::days(expires_in_days),
            created_at: now,
        };
        (raw, record)
    }

    /// Hash a raw token into its store key.
    pub fn hash_token(raw: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_binds_hash_to_raw() {
        let (raw, record) = RefreshTokenRecord::mint(Uuid::new_v4(), Uuid::new_v4(), 7);
        assert_eq!(record.token_id, RefreshTokenRecord::hash_token(&raw));
        assert_ne!(record.token_id, raw);
        assert!(!record.is_expired());
    }

    #[test]
    fn test_mint_is_unguessable_per_call() {
        let user = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let (raw_a, rec_a) = RefreshTokenRecord::mint(user, tenant, 7);
        let (raw_b, rec_b) = RefreshTokenRecord::mint(user, tenant, 7);
        assert_ne!(raw_a, raw_b);
        assert_ne!(rec_a.token_id, rec_b.token_id);
    }

    #[test]
    fn test_expiry() {
        let (_, mut record) = RefreshTokenRecord::mint(Uuid::new_v4(), Uuid::new_v4(), 7);
        record.expires_at = Utc::now() - Duration::seconds(1);
        assert!(record.is_expired());
    }
}
