//! Attempt limiting. Handlers consult the limiter through a narrow
//! check-and-record contract; the production implementation is a `governor`
//! keyed limiter over a dashmap state store, plus an IP-wide middleware
//! layer for the whole router.

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

use crate::error::AppError;

/// Outcome of a single check-and-record call.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after_secs: Option<u64>,
}

impl RateDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_secs: None,
        }
    }
}

/// Atomic check-and-record of one attempt against the `bucket`/`key` counter.
#[async_trait]
pub trait AttemptLimiter: Send + Sync {
    async fn check_and_record(&self, bucket: &str, key: &str) -> RateDecision;
}

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

pub struct GovernorLimiter {
    limiter: KeyedLimiter,
}

impl GovernorLimiter {
    pub fn new(attempts: u32, window_seconds: u64) -> Self {
        let attempts = attempts.max(1);
        let period = Duration::from_millis((window_seconds * 1000) / attempts as u64);
        let quota = Quota::with_period(period)
            .expect("Failed to create quota with valid period")
            .allow_burst(NonZeroU32::new(attempts).expect("attempts is guaranteed to be non-zero"));
        Self {
            limiter: RateLimiter::dashmap(quota),
        }
    }
}

#[async_trait]
impl AttemptLimiter for GovernorLimiter {
    async fn check_and_record(&self, bucket: &str, key: &str) -> RateDecision {
        let compound = format!("{}/{}", bucket, key);
        match self.limiter.check_key(&compound) {
            Ok(_) => RateDecision::allow(),
            Err(negative) => {
                let wait_time = negative.wait_time_from(DefaultClock::default().now());
                RateDecision {
                    allowed: false,
                    retry_after_secs: Some(wait_time.as_secs()),
                }
            }
        }
    }
}

/// Fixed-answer limiter for tests.
pub struct StaticLimiter {
    decision: RateDecision,
}

impl StaticLimiter {
    pub fn permissive() -> Self {
        Self {
            decision: RateDecision::allow(),
        }
    }

    pub fn denying(retry_after_secs: u64) -> Self {
        Self {
            decision: RateDecision {
                allowed: false,
                retry_after_secs: Some(retry_after_secs),
            },
        }
    }
}

#[async_trait]
impl AttemptLimiter for StaticLimiter {
    async fn check_and_record(&self, _bucket: &str, _key: &str) -> RateDecision {
        self.decision
    }
}

/// Router-wide limiter keyed by client IP, applied as axum middleware.
pub type IpRateLimiter = Arc<KeyedLimiter>;

pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    let attempts = attempts.max(1);
    let period = Duration::from_millis((window_seconds * 1000) / attempts as u64);
    let quota = Quota::with_period(period)
        .expect("Failed to create quota with valid period")
        .allow_burst(NonZeroU32::new(attempts).expect("attempts is guaranteed to be non-zero"));
    Arc::new(RateLimiter::dashmap(quota))
}

pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match crate::utils::client_ip(request.headers()) {
        Some(ip) => match limiter.check_key(&ip) {
            Ok(_) => Ok(next.run(request).await),
            Err(negative) => {
                let wait_time = negative.wait_time_from(DefaultClock::default().now());
                Err(AppError::TooManyRequests(
                    "Too many requests from this IP. Please try again later.".to_string(),
                    Some(wait_time.as_secs()),
                ))
            }
        },
        None => {
            tracing::warn!("Could not determine IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_governor_denies_after_burst() {
        let limiter = GovernorLimiter::new(3, 900);

        for _ in 0..3 {
            assert!(limiter.check_and_record("login", "a@x.com/1.2.3.4").await.allowed);
        }
        let denied = limiter.check_and_record("login", "a@x.com/1.2.3.4").await;
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs.is_some());

        // Separate keys have separate budgets.
        assert!(limiter.check_and_record("login", "b@x.com/1.2.3.4").await.allowed);
    }
}
