//! Token lifecycle: access-token issuance, refresh-token rotation with reuse
//! escalation, revocation and introspection.

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{RefreshTokenRecord, User};
use crate::services::audit::{self, AuditEvent, AuditEventKind, AuditSink};
use crate::services::jwt::{AccessTokenClaims, JwtService, TOKEN_TYPE_ACCESS};
use crate::services::token_store::{RotateOutcome, TokenStore};

/// Claims reported by introspection for an active token.
#[derive(Debug, Clone)]
pub struct IntrospectionData {
    pub sub: String,
    pub tenant_id: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub token_type: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: Option<String>,
}

pub struct TokenLifecycleManager {
    jwt: Arc<JwtService>,
    store: Arc<dyn TokenStore>,
    audit: Option<Arc<dyn AuditSink>>,
    refresh_token_expiry_days: i64,
}

impl TokenLifecycleManager {
    pub fn new(
        jwt: Arc<JwtService>,
        store: Arc<dyn TokenStore>,
        audit: Option<Arc<dyn AuditSink>>,
        refresh_token_expiry_days: i64,
    ) -> Self {
        Self {
            jwt,
            store,
            audit,
            refresh_token_expiry_days,
        }
    }

    pub fn issue_access_token(&self, user: &User) -> Result<String, AppError> {
        Ok(self.jwt.issue_access_token(user)?)
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.jwt.access_token_expiry_seconds()
    }

    /// Mint and persist a refresh token. Returns the raw value for the client.
    pub async fn create_refresh_token(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<String, AppError> {
        let (raw, record) =
            RefreshTokenRecord::mint(user_id, tenant_id, self.refresh_token_expiry_days);
        self.store.insert(&record).await?;
        Ok(raw)
    }

    /// Rotate a presented refresh token. Reuse of an already-rotated token
    /// revokes the whole (tenant, user) family; a declared tenant that does
    /// not match the token's binding revokes the just-issued replacement.
    pub async fn rotate_refresh_token(
        &self,
        raw: &str,
        declared_tenant: Option<Uuid>,
    ) -> Result<(String, RefreshTokenRecord), AppError> {
        let presented_id = RefreshTokenRecord::hash_token(raw);
        let mut replacement_bytes = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut replacement_bytes);
        let replacement_raw = hex::encode(replacement_bytes);
        let replacement_id = RefreshTokenRecord::hash_token(&replacement_raw);
        let expires_at = Utc::now() + Duration::days(self.refresh_token_expiry_days);

        match self
            .store
            .rotate(&presented_id, &replacement_id, expires_at)
            .await?
        {
            RotateOutcome::Rotated(record) => {
                if let Some(declared) = declared_tenant {
                    if declared != record.tenant_id {
                        // Cross-tenant presentation: take back the replacement
                        // before answering.
                        self.store.revoke(&replacement_id).await?;
                        audit::record(
                            &self.audit,
                            AuditEvent::new(AuditEventKind::TokenReuseDetected)
                                .tenant(record.tenant_id)
                                .user(record.user_id)
                                .detail("tenant mismatch on refresh"),
                        );
                        return Err(AppError::invalid_token());
                    }
                }
                audit::record(
                    &self.audit,
                    AuditEvent::new(AuditEventKind::TokenRefreshed)
                        .tenant(record.tenant_id)
                        .user(record.user_id),
                );
                Ok((replacement_raw, record))
            }
            RotateOutcome::Reused(record) => {
                let revoked = self
                    .store
                    .revoke_all_for_user(record.tenant_id, record.user_id)
                    .await?;
                tracing::warn!(
                    tenant_id = %record.tenant_id,
                    user_id = %record.user_id,
                    revoked,
                    "Refresh token reuse detected; token family revoked"
                );
                audit::record(
                    &self.audit,
                    AuditEvent::new(AuditEventKind::TokenReuseDetected)
                        .tenant(record.tenant_id)
                        .user(record.user_id)
                        .detail("rotated token presented again"),
                );
                Err(AppError::Unauthorized(anyhow::anyhow!(
                    "Token reuse detected. All sessions have been revoked."
                )))
            }
            RotateOutcome::Unknown => Err(AppError::invalid_token()),
        }
    }

    pub async fn revoke_all_user_tokens(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, AppError> {
        Ok(self.store.revoke_all_for_user(tenant_id, user_id).await?)
    }

    /// Blacklist an access token string for the remainder of its lifetime.
    /// Tokens that cannot be decoded at all are ignored.
    pub async fn blacklist_access_token(&self, raw: &str) -> Result<(), AppError> {
        let Some(claims) = self.jwt.decode_unverified(raw) else {
            return Ok(());
        };
        let remaining = claims.exp - Utc::now().timestamp();
        if remaining > 0 {
            let hash = RefreshTokenRecord::hash_token(raw);
            self.store.blacklist(&hash, remaining).await?;
        }
        Ok(())
    }

    pub async fn is_access_token_blacklisted(&self, raw: &str) -> Result<bool, AppError> {
        let hash = RefreshTokenRecord::hash_token(raw);
        Ok(self.store.is_blacklisted(&hash).await?)
    }

    /// Single-use enforcement for challenge tokens: blacklist the token hash
    /// for the remainder of the challenge TTL on first redemption. Returns
    /// false if it was already redeemed.
    pub async fn redeem_challenge_token(&self, raw: &str) -> Result<bool, AppError> {
        let hash = RefreshTokenRecord::hash_token(raw);
        if self.store.is_blacklisted(&hash).await? {
            return Ok(false);
        }
        self.store
            .blacklist(&hash, self.jwt.mfa_challenge_ttl_seconds())
            .await?;
        Ok(true)
    }

    /// RFC 7009 style revocation: best-effort, idempotent, never tells the
    /// caller whether the token existed. Tries the refresh store first unless
    /// the hint says otherwise, then the access blacklist.
    pub async fn revoke(&self, token: &str, token_type_hint: Option<&str>) -> Result<(), AppError> {
        let token_id = RefreshTokenRecord::hash_token(token);

        let try_refresh = token_type_hint != Some("access_token");
        if try_refresh {
            if let Some(record) = self.store.lookup(&token_id).await? {
                self.store.revoke(&token_id).await?;
                audit::record(
                    &self.audit,
                    AuditEvent::new(AuditEventKind::TokenRevoked)
                        .tenant(record.tenant_id)
                        .user(record.user_id)
                        .detail("refresh token"),
                );
                return Ok(());
            }
        }

        if token_type_hint != Some("refresh_token") {
            self.blacklist_access_token(token).await?;
        }
        Ok(())
    }

    /// RFC 7662 style introspection: `None` means inactive. Never errors on
    /// malformed input.
    pub async fn introspect(
        &self,
        token: &str,
        token_type_hint: Option<&str>,
    ) -> Result<Option<IntrospectionData>, AppError> {
        let try_access = token_type_hint != Some("refresh_token");
        if try_access {
            if let Ok(claims) = self.jwt.validate_access_token(token) {
                if self.is_access_token_blacklisted(token).await? {
                    return Ok(None);
                }
                return Ok(Some(Self::from_access_claims(claims)));
            }
        }

        // Refresh fallback: active means present, unrotated and unexpired.
        let token_id = RefreshTokenRecord::hash_token(token);
        if let Some(record) = self.store.lookup(&token_id).await? {
            return Ok(Some(IntrospectionData {
                sub: record.user_id.to_string(),
                tenant_id: record.tenant_id.to_string(),
                email: None,
                roles: vec![],
                token_type: "refresh_token".to_string(),
                exp: record.expires_at.timestamp(),
                iat: record.created_at.timestamp(),
                jti: None,
            }));
        }

        Ok(None)
    }

    fn from_access_claims(claims: AccessTokenClaims) -> IntrospectionData {
        IntrospectionData {
            sub: claims.sub,
            tenant_id: claims.tenant_id,
            email: Some(claims.email),
            roles: claims.roles,
            token_type: TOKEN_TYPE_ACCESS.to_string(),
            exp: claims.exp,
            iat: claims.iat,
            jti: Some(claims.jti),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::token_store::MemoryTokenStore;
    use std::io::Write;

    // Same throwaway keypair as the jwt tests.
    fn jwt_service() -> (Arc<JwtService>, tempfile::NamedTempFile, tempfile::NamedTempFile) {
        let private_pem = crate::services::jwt::test_keys::PRIVATE_KEY_PEM;
        let public_pem = crate::services::jwt::test_keys::PUBLIC_KEY_PEM;

        let mut private_file = tempfile::NamedTempFile::new().unwrap();
        private_file.write_all(private_pem.as_bytes()).unwrap();
        let mut public_file = tempfile::NamedTempFile::new().unwrap();
        public_file.write_all(public_pem.as_bytes()).unwrap();

        let config = crate::config::JwtConfig {
            private_key_path: private_file.path().to_str().unwrap().to_string(),
            public_key_path: public_file.path().to_str().unwrap().to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            mfa_challenge_ttl_seconds: 300,
        };
        (
            Arc::new(JwtService::new(&config).unwrap()),
            private_file,
            public_file,
        )
    }

    fn manager() -> (
        TokenLifecycleManager,
        Arc<MemoryTokenStore>,
        tempfile::NamedTempFile,
        tempfile::NamedTempFile,
    ) {
        let (jwt, private_file, public_file) = jwt_service();
        let store = Arc::new(MemoryTokenStore::new());
        (
            TokenLifecycleManager::new(jwt, store.clone(), None, 7),
            store,
            private_file,
            public_file,
        )
    }

    fn user() -> User {
        User::new(
            Uuid::new_v4(),
            "a@x.com".to_string(),
            "hash".to_string(),
            vec!["member".to_string()],
        )
    }

    #[tokio::test]
    async fn test_rotation_then_reuse_revokes_family() {
        let (manager, store, _p, _q) = manager();
        let user = user();

        let raw = manager
            .create_refresh_token(user.user_id, user.tenant_id)
            .await
            .unwrap();
        let (new_raw, record) = manager.rotate_refresh_token(&raw, None).await.unwrap();
        assert_eq!(record.user_id, user.user_id);

        // Presenting the original again is reuse and kills the family.
        let err = manager.rotate_refresh_token(&raw, None).await.unwrap_err();
        assert!(err.to_string().contains("reuse"));

        let new_id = RefreshTokenRecord::hash_token(&new_raw);
        assert!(store.lookup(&new_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tenant_mismatch_revokes_replacement() {
        let (manager, store, _p, _q) = manager();
        let user = user();

        let raw = manager
            .create_refresh_token(user.user_id, user.tenant_id)
            .await
            .unwrap();
        let err = manager
            .rotate_refresh_token(&raw, Some(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        // The original is spent and no replacement was handed out, so a
        // retry with the correct tenant is reuse, not recovery.
        let err = manager
            .rotate_refresh_token(&raw, Some(user.tenant_id))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("reuse"));
        assert!(store
            .lookup(&RefreshTokenRecord::hash_token(&raw))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (manager, _store, _p, _q) = manager();
        let user = user();

        let raw = manager
            .create_refresh_token(user.user_id, user.tenant_id)
            .await
            .unwrap();
        manager.revoke(&raw, None).await.unwrap();
        manager.revoke(&raw, None).await.unwrap();
        manager.revoke("completely-unknown", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_introspect_access_token_lifecycle() {
        let (manager, _store, _p, _q) = manager();
        let user = user();

        let access = manager.issue_access_token(&user).unwrap();
        let data = manager.introspect(&access, None).await.unwrap().unwrap();
        assert_eq!(data.sub, user.user_id.to_string());
        assert_eq!(data.token_type, "access");

        manager.blacklist_access_token(&access).await.unwrap();
        assert!(manager.introspect(&access, None).await.unwrap().is_none());

        // Malformed input is inactive, not an error.
        assert!(manager.introspect("garbage", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_challenge_redemption_is_single_use() {
        let (manager, _store, _p, _q) = manager();
        assert!(manager.redeem_challenge_token("challenge-raw").await.unwrap());
        assert!(!manager.redeem_challenge_token("challenge-raw").await.unwrap());
    }
}
