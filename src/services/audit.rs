//! Security audit trail. The sink is optional and strictly best-effort: an
//! audit failure must never change the outcome of an auth flow, so events are
//! recorded on a detached task and failures are logged and dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    LoginSuccess,
    LoginFailure,
    LoginRateLimited,
    MfaChallengeIssued,
    MfaVerifySuccess,
    MfaVerifyFailure,
    TokenRefreshed,
    TokenReuseDetected,
    TokenRevoked,
    Logout,
    TenantSwitch,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::LoginSuccess => "LOGIN_SUCCESS",
            AuditEventKind::LoginFailure => "LOGIN_FAILURE",
            AuditEventKind::LoginRateLimited => "LOGIN_RATE_LIMITED",
            AuditEventKind::MfaChallengeIssued => "MFA_CHALLENGE_ISSUED",
            AuditEventKind::MfaVerifySuccess => "MFA_VERIFY_SUCCESS",
            AuditEventKind::MfaVerifyFailure => "MFA_VERIFY_FAILURE",
            AuditEventKind::TokenRefreshed => "TOKEN_REFRESHED",
            AuditEventKind::TokenReuseDetected => "TOKEN_REUSE_DETECTED",
            AuditEventKind::TokenRevoked => "TOKEN_REVOKED",
            AuditEventKind::Logout => "LOGOUT",
            AuditEventKind::TenantSwitch => "TENANT_SWITCH",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub tenant_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub ip_address: Option<String>,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind) -> Self {
        Self {
            kind,
            tenant_id: None,
            user_id: None,
            email: None,
            ip_address: None,
            detail: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn ip(mut self, ip: Option<&str>) -> Self {
        self.ip_address = ip.map(str::to_string);
        self
    }

    pub fn detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn publish(&self, event: AuditEvent) -> Result<(), anyhow::Error>;
}

/// Fire-and-forget recording. The flow continues immediately; the sink runs
/// on its own task and a failed publish only produces a warning.
pub fn record(sink: &Option<Arc<dyn AuditSink>>, event: AuditEvent) {
    let Some(sink) = sink.clone() else {
        return;
    };
    tokio::spawn(async move {
        let kind = event.kind.as_str();
        if let Err(e) = sink.publish(event).await {
            tracing::warn!(event = kind, "Failed to publish audit event: {}", e);
        }
    });
}

/// Default sink: structured log lines.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn publish(&self, event: AuditEvent) -> Result<(), anyhow::Error> {
        tracing::info!(
            event = event.kind.as_str(),
            tenant_id = ?event.tenant_id,
            user_id = ?event.user_id,
            email = event.email.as_deref().unwrap_or("-"),
            ip = event.ip_address.as_deref().unwrap_or("-"),
            detail = event.detail.as_deref().unwrap_or("-"),
            "audit"
        );
        Ok(())
    }
}

/// Capturing sink for tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    pub events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(&self) -> Vec<AuditEventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn publish(&self, event: AuditEvent) -> Result<(), anyhow::Error> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Sink that always fails, for verifying best-effort semantics.
#[cfg(test)]
pub struct FailingAuditSink;

#[cfg(test)]
#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn publish(&self, _event: AuditEvent) -> Result<(), anyhow::Error> {
        Err(anyhow::anyhow!("audit backend unavailable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_with_no_sink_is_a_noop() {
        record(&None, AuditEvent::new(AuditEventKind::LoginSuccess));
    }

    #[tokio::test]
    async fn test_record_swallows_sink_failure() {
        let sink: Option<Arc<dyn AuditSink>> = Some(Arc::new(FailingAuditSink));
        record(&sink, AuditEvent::new(AuditEventKind::LoginFailure));
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn test_memory_sink_captures_events() {
        let sink = Arc::new(MemoryAuditSink::new());
        let opt: Option<Arc<dyn AuditSink>> = Some(sink.clone());
        record(
            &opt,
            AuditEvent::new(AuditEventKind::LoginSuccess)
                .email("a@example.com")
                .detail("password"),
        );
        // Give the detached task a chance to run.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(sink.kinds(), vec![AuditEventKind::LoginSuccess]);
    }
}
