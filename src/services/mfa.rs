//! MFA method provider: enrolled-method lookup, code verification, and
//! trusted-device tracking. The challenge flow consumes this through the
//! trait; the Postgres implementation covers TOTP, delivered one-time codes
//! and recovery codes.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Mutex;
use subtle::ConstantTimeEq;
use totp_rs::{Algorithm, Secret, TOTP};
use utoipa::ToSchema;
use uuid::Uuid;

const MAX_OTP_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MfaMethod {
    Totp,
    Sms,
    Email,
    Recovery,
}

impl MfaMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MfaMethod::Totp => "totp",
            MfaMethod::Sms => "sms",
            MfaMethod::Email => "email",
            MfaMethod::Recovery => "recovery",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "totp" => Some(MfaMethod::Totp),
            "sms" => Some(MfaMethod::Sms),
            "email" => Some(MfaMethod::Email),
            "recovery" => Some(MfaMethod::Recovery),
            _ => None,
        }
    }
}

#[async_trait]
pub trait MfaMethodProvider: Send + Sync {
    /// Whether the user has any active enrolled method in this tenant.
    async fn user_has_active_mfa(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<bool, anyhow::Error>;

    /// Active enrolled methods, for intersection with tenant policy.
    async fn enrolled_methods(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Vec<MfaMethod>, anyhow::Error>;

    async fn is_device_trusted(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        fingerprint: &str,
    ) -> Result<bool, anyhow::Error>;

    async fn trust_device(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        fingerprint: &str,
    ) -> Result<(), anyhow::Error>;

    /// Verify a code for the given method. Wrong codes return Ok(false);
    /// Err is reserved for provider failures.
    async fn verify_code(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        method: MfaMethod,
        code: &str,
    ) -> Result<bool, anyhow::Error>;
}

fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// PostgreSQL-backed provider over the MFA enrollment tables.
pub struct PgMfaProvider {
    pool: PgPool,
}

impl PgMfaProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn verify_totp(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        code: &str,
    ) -> Result<bool, anyhow::Error> {
        let secret: Option<String> = sqlx::query_scalar(
            "SELECT totp_secret FROM user_mfa_methods
             WHERE user_id = $1 AND tenant_id = $2 AND method = 'totp' AND status = 'active'",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?
        .flatten();

        let Some(secret) = secret else {
            return Ok(false);
        };

        let secret_bytes = Secret::Encoded(secret)
            .to_bytes()
            .map_err(|e| anyhow::anyhow!("Invalid TOTP secret encoding: {:?}", e))?;
        let totp = TOTP::new(Algorithm::SHA1, 6, 1, 30, secret_bytes)
            .map_err(|e| anyhow::anyhow!("Invalid TOTP parameters: {}", e))?;

        Ok(totp
            .check_current(code)
            .map_err(|e| anyhow::anyhow!("TOTP clock error: {}", e))?)
    }

    /// Hash-and-compare against the latest unexpired delivered code, with an
    /// attempt cap. The code row is consumed on success.
    async fn verify_delivered_code(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        method: MfaMethod,
        code: &str,
    ) -> Result<bool, anyhow::Error> {
        let row: Option<(Uuid, String, i32)> = sqlx::query_as(
            "SELECT code_id, code_hash, attempts FROM mfa_otp_codes
             WHERE user_id = $1 AND tenant_id = $2 AND method = $3
               AND expires_at > $4 AND consumed_at IS NULL
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(method.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        let Some((code_id, stored_hash, attempts)) = row else {
            return Ok(false);
        };

        if attempts >= MAX_OTP_ATTEMPTS {
            tracing::warn!(%user_id, method = method.as_str(), "OTP attempt cap reached");
            return Ok(false);
        }

        if constant_time_eq(&hash_code(code), &stored_hash) {
            sqlx::query("UPDATE mfa_otp_codes SET consumed_at = $1 WHERE code_id = $2")
                .bind(Utc::now())
                .bind(code_id)
                .execute(&self.pool)
                .await?;
            Ok(true)
        } else {
            sqlx::query("UPDATE mfa_otp_codes SET attempts = attempts + 1 WHERE code_id = $1")
                .bind(code_id)
                .execute(&self.pool)
                .await?;
            Ok(false)
        }
    }

    /// Recovery codes are single-use; a matching unused code is marked used.
    async fn verify_recovery_code(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        code: &str,
    ) -> Result<bool, anyhow::Error> {
        let presented_hash = hash_code(code);
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT code_id, code_hash FROM user_recovery_codes
             WHERE user_id = $1 AND tenant_id = $2 AND used_at IS NULL",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        for (code_id, stored_hash) in rows {
            if constant_time_eq(&presented_hash, &stored_hash) {
                sqlx::query("UPDATE user_recovery_codes SET used_at = $1 WHERE code_id = $2")
                    .bind(Utc::now())
                    .bind(code_id)
                    .execute(&self.pool)
                    .await?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl MfaMethodProvider for PgMfaProvider {
    async fn user_has_active_mfa(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<bool, anyhow::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_mfa_methods
             WHERE user_id = $1 AND tenant_id = $2 AND status = 'active'",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn enrolled_methods(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Vec<MfaMethod>, anyhow::Error> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT method FROM user_mfa_methods
             WHERE user_id = $1 AND tenant_id = $2 AND status = 'active'
             ORDER BY method",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(names.iter().filter_map(|n| MfaMethod::parse(n)).collect())
    }

    async fn is_device_trusted(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        fingerprint: &str,
    ) -> Result<bool, anyhow::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM trusted_devices
             WHERE user_id = $1 AND tenant_id = $2 AND fingerprint = $3",
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn trust_device(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        fingerprint: &str,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            "INSERT INTO trusted_devices (user_id, tenant_id, fingerprint, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id, tenant_id, fingerprint) DO NOTHING",
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(fingerprint)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn verify_code(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        method: MfaMethod,
        code: &str,
    ) -> Result<bool, anyhow::Error> {
        match method {
            MfaMethod::Totp => self.verify_totp(user_id, tenant_id, code).await,
            MfaMethod::Sms | MfaMethod::Email => {
                self.verify_delivered_code(user_id, tenant_id, method, code).await
            }
            MfaMethod::Recovery => self.verify_recovery_code(user_id, tenant_id, code).await,
        }
    }
}

/// Scriptable provider for tests: fixed enrollment, one accepted code,
/// in-memory trusted-device set.
#[derive(Default)]
pub struct MockMfaProvider {
    pub enrolled: Vec<MfaMethod>,
    pub accepted_code: Option<String>,
    trusted: Mutex<HashSet<(Uuid, Uuid, String)>>,
}

impl MockMfaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enrollment(enrolled: Vec<MfaMethod>, accepted_code: &str) -> Self {
        Self {
            enrolled,
            accepted_code: Some(accepted_code.to_string()),
            trusted: Mutex::new(HashSet::new()),
        }
    }

    pub fn pre_trust(&self, user_id: Uuid, tenant_id: Uuid, fingerprint: &str) {
        self.trusted
            .lock()
            .unwrap()
            .insert((user_id, tenant_id, fingerprint.to_string()));
    }
}

#[async_trait]
impl MfaMethodProvider for MockMfaProvider {
    async fn user_has_active_mfa(
        &self,
        _user_id: Uuid,
        _tenant_id: Uuid,
    ) -> Result<bool, anyhow::Error> {
        Ok(!self.enrolled.is_empty())
    }

    async fn enrolled_methods(
        &self,
        _user_id: Uuid,
        _tenant_id: Uuid,
    ) -> Result<Vec<MfaMethod>, anyhow::Error> {
        Ok(self.enrolled.clone())
    }

    async fn is_device_trusted(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        fingerprint: &str,
    ) -> Result<bool, anyhow::Error> {
        Ok(self
            .trusted
            .lock()
            .unwrap()
            .contains(&(user_id, tenant_id, fingerprint.to_string())))
    }

    async fn trust_device(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        fingerprint: &str,
    ) -> Result<(), anyhow::Error> {
        self.trusted
            .lock()
            .unwrap()
            .insert((user_id, tenant_id, fingerprint.to_string()));
        Ok(())
    }

    async fn verify_code(
        &self,
        _user_id: Uuid,
        _tenant_id: Uuid,
        method: MfaMethod,
        code: &str,
    ) -> Result<bool, anyhow::Error> {
        Ok(self.enrolled.contains(&method)
            && self.accepted_code.as_deref() == Some(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names_roundtrip() {
        for method in [
            MfaMethod::Totp,
            MfaMethod::Sms,
            MfaMethod::Email,
            MfaMethod::Recovery,
        ] {
            assert_eq!(MfaMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(MfaMethod::parse("carrier-pigeon"), None);
    }

    #[tokio::test]
    async fn test_mock_provider_accepts_only_configured_code() {
        let provider = MockMfaProvider::with_enrollment(vec![MfaMethod::Totp], "123456");
        let user = Uuid::new_v4();
        let tenant = Uuid::new_v4();

        assert!(provider
            .verify_code(user, tenant, MfaMethod::Totp, "123456")
            .await
            .unwrap());
        assert!(!provider
            .verify_code(user, tenant, MfaMethod::Totp, "654321")
            .await
            .unwrap());
        // Not enrolled in SMS, so the right code on the wrong method fails.
        assert!(!provider
            .verify_code(user, tenant, MfaMethod::Sms, "123456")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_mock_trusted_devices() {
        let provider = MockMfaProvider::new();
        let user = Uuid::new_v4();
        let tenant = Uuid::new_v4();

        assert!(!provider.is_device_trusted(user, tenant, "fp").await.unwrap());
        provider.trust_device(user, tenant, "fp").await.unwrap();
        assert!(provider.is_device_trusted(user, tenant, "fp").await.unwrap());
        assert!(!provider
            .is_device_trusted(user, Uuid::new_v4(), "fp")
            .await
            .unwrap());
    }
}
