//! Session establishment, logout and tenant switching. Logout is total for
//! the (tenant, user) pair; tenant switch issues the new bundle first and
//! cleans up the old tenant best-effort afterwards.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{DeviceMetadata, SessionProvider, SessionRecord, Tenant, User};
use crate::services::audit::{self, AuditEvent, AuditEventKind, AuditSink};
use crate::services::directory::UserDirectory;
use crate::services::jwt::AccessTokenClaims;
use crate::services::session_registry::SessionRegistry;
use crate::services::tokens::TokenLifecycleManager;

/// Fresh credentials handed to the client after login, MFA verification or
/// tenant switch.
#[derive(Debug)]
pub struct CredentialBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

pub struct SessionCoordinator {
    tokens: Arc<TokenLifecycleManager>,
    registry: Arc<dyn SessionRegistry>,
    directory: Arc<dyn UserDirectory>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl SessionCoordinator {
    pub fn new(
        tokens: Arc<TokenLifecycleManager>,
        registry: Arc<dyn SessionRegistry>,
        directory: Arc<dyn UserDirectory>,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Self {
        Self {
            tokens,
            registry,
            directory,
            audit,
        }
    }

    /// Issue the credential bundle and record the session.
    pub async fn establish(
        &self,
        user: &User,
        provider: SessionProvider,
        metadata: &DeviceMetadata,
    ) -> Result<CredentialBundle, AppError> {
        let access_token = self.tokens.issue_access_token(user)?;
        let refresh_token = self
            .tokens
            .create_refresh_token(user.user_id, user.tenant_id)
            .await?;

        let session = SessionRecord::new(user.user_id, user.tenant_id, provider, metadata);
        self.registry.create(&session).await?;

        Ok(CredentialBundle {
            access_token,
            refresh_token,
            expires_in: self.tokens.access_token_expiry_seconds(),
        })
    }

    /// Logout: blacklist the presented access token until its natural expiry,
    /// revoke every refresh token and delete every session for the pair.
    pub async fn logout(
        &self,
        claims: &AccessTokenClaims,
        raw_access_token: &str,
    ) -> Result<(), AppError> {
        let user_id: Uuid = claims
            .sub
            .parse()
            .map_err(|_| AppError::invalid_token())?;
        let tenant_id: Uuid = claims
            .tenant_id
            .parse()
            .map_err(|_| AppError::invalid_token())?;

        self.tokens.blacklist_access_token(raw_access_token).await?;
        let revoked = self.tokens.revoke_all_user_tokens(tenant_id, user_id).await?;
        let sessions = self.registry.delete_all_for_user(tenant_id, user_id).await?;

        tracing::info!(%user_id, %tenant_id, revoked, sessions, "User logged out");
        audit::record(
            &self.audit,
            AuditEvent::new(AuditEventKind::Logout)
                .tenant(tenant_id)
                .user(user_id)
                .email(&claims.email),
        );
        Ok(())
    }

    /// Switch the caller to another tenant they are a member of. The new
    /// bundle is issued first; cleanup of the previous tenant's credentials
    /// is best-effort and never fails the switch.
    pub async fn switch_tenant(
        &self,
        claims: &AccessTokenClaims,
        raw_access_token: &str,
        target_tenant_id: Uuid,
        metadata: &DeviceMetadata,
    ) -> Result<(User, Tenant, CredentialBundle), AppError> {
        let current_user_id: Uuid = claims
            .sub
            .parse()
            .map_err(|_| AppError::invalid_token())?;
        let current_tenant_id: Uuid = claims
            .tenant_id
            .parse()
            .map_err(|_| AppError::invalid_token())?;

        if target_tenant_id == current_tenant_id {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Already in this organization"
            )));
        }

        let target_tenant = self
            .directory
            .find_tenant(target_tenant_id)
            .await?
            .ok_or_else(|| {
                AppError::Forbidden(anyhow::anyhow!("You are not a member of this organization"))
            })?;
        if target_tenant.is_suspended() {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "This organization is suspended"
            )));
        }

        // Membership in the target tenant is keyed by email.
        let target_user = self
            .directory
            .find_by_email(&claims.email, target_tenant_id)
            .await?
            .ok_or_else(|| {
                AppError::Forbidden(anyhow::anyhow!("You are not a member of this organization"))
            })?;
        if !target_user.is_active() {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Your account in this organization is not active"
            )));
        }

        let bundle = self
            .establish(&target_user, SessionProvider::TenantSwitch, metadata)
            .await?;

        // The switch has succeeded; failures below must not undo it.
        if let Err(e) = self
            .tokens
            .revoke_all_user_tokens(current_tenant_id, current_user_id)
            .await
        {
            tracing::warn!(
                tenant_id = %current_tenant_id,
                "Failed to revoke previous tenant tokens after switch: {}",
                e
            );
        }
        if let Err(e) = self
            .registry
            .delete_all_for_user(current_tenant_id, current_user_id)
            .await
        {
            tracing::warn!(
                tenant_id = %current_tenant_id,
                "Failed to delete previous tenant sessions after switch: {}",
                e
            );
        }
        if let Err(e) = self.tokens.blacklist_access_token(raw_access_token).await {
            tracing::warn!("Failed to blacklist switching access token: {}", e);
        }

        audit::record(
            &self.audit,
            AuditEvent::new(AuditEventKind::TenantSwitch)
                .tenant(target_tenant_id)
                .user(target_user.user_id)
                .email(&claims.email)
                .detail(&format!("from {}", current_tenant_id)),
        );

        Ok((target_user, target_tenant, bundle))
    }
}
