//! Credential verification and account-state gating. The limiter is
//! consulted before any directory lookup so denied attempts cost the same
//! whether or not the account exists.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Tenant, User};
use crate::services::audit::{self, AuditEvent, AuditEventKind, AuditSink};
use crate::services::directory::UserDirectory;
use crate::services::rate_limit::AttemptLimiter;
use crate::utils::{verify_password, Password, PasswordHashString};

const LOGIN_BUCKET: &str = "login";

pub struct CredentialAuthenticator {
    directory: Arc<dyn UserDirectory>,
    limiter: Arc<dyn AttemptLimiter>,
    audit: Option<Arc<dyn AuditSink>>,
    email_verification_ready: bool,
}

impl CredentialAuthenticator {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        limiter: Arc<dyn AttemptLimiter>,
        audit: Option<Arc<dyn AuditSink>>,
        email_verification_ready: bool,
    ) -> Self {
        Self {
            directory,
            limiter,
            audit,
            email_verification_ready,
        }
    }

    pub async fn authenticate(
        &self,
        email: &str,
        password: &Password,
        tenant_hint: Option<Uuid>,
        origin_ip: Option<&str>,
    ) -> Result<(User, Tenant), AppError> {
        let limiter_key = format!("{}/{}", email, origin_ip.unwrap_or("unknown"));
        let decision = self.limiter.check_and_record(LOGIN_BUCKET, &limiter_key).await;
        if !decision.allowed {
            audit::record(
                &self.audit,
                AuditEvent::new(AuditEventKind::LoginRateLimited)
                    .email(email)
                    .ip(origin_ip),
            );
            return Err(AppError::TooManyRequests(
                "Too many login attempts. Please try again later.".to_string(),
                decision.retry_after_secs,
            ));
        }

        let user = match tenant_hint {
            Some(tenant_id) => self.directory.find_by_email(email, tenant_id).await?,
            None => self.directory.find_default_by_email(email).await?,
        };
        let Some(user) = user else {
            self.record_failure(email, origin_ip, "unknown account");
            return Err(AppError::invalid_credentials());
        };

        let tenant = self
            .directory
            .find_tenant(user.tenant_id)
            .await?
            .ok_or_else(|| {
                tracing::error!(tenant_id = %user.tenant_id, "User references missing tenant");
                AppError::invalid_credentials()
            })?;
        if tenant.is_suspended() {
            self.record_failure(email, origin_ip, "tenant suspended");
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "This organization is suspended"
            )));
        }

        let stored = PasswordHashString::new(user.password_hash.clone());
        if verify_password(password, &stored).is_err() {
            self.record_failure(email, origin_ip, "password mismatch");
            return Err(AppError::invalid_credentials());
        }

        if user.is_pending_approval() {
            self.record_failure(email, origin_ip, "pending approval");
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Your account is awaiting approval by an administrator"
            )));
        }
        if user.is_suspended() {
            self.record_failure(email, origin_ip, "account suspended");
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Your account is suspended"
            )));
        }
        if self.email_verification_ready && !user.email_verified {
            self.record_failure(email, origin_ip, "email not verified");
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Please verify your email address before logging in"
            )));
        }

        audit::record(
            &self.audit,
            AuditEvent::new(AuditEventKind::LoginSuccess)
                .tenant(user.tenant_id)
                .user(user.user_id)
                .email(email)
                .ip(origin_ip),
        );

        Ok((user, tenant))
    }

    fn record_failure(&self, email: &str, origin_ip: Option<&str>, detail: &str) {
        audit::record(
            &self.audit,
            AuditEvent::new(AuditEventKind::LoginFailure)
                .email(email)
                .ip(origin_ip)
                .detail(detail),
        );
    }
}
