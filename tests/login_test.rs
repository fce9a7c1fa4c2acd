mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::json;

use common::{build_app, build_app_with_limiter, login, post_json, seed_mfa_tenant, seed_tenant, seed_user};
use gatehouse::services::mfa::MockMfaProvider;
use gatehouse::services::rate_limit::StaticLimiter;

#[tokio::test]
async fn login_without_mfa_returns_full_bundle() {
    let app = build_app(MockMfaProvider::new());
    let tenant = seed_tenant(&app, "Acme");
    seed_user(&app, &tenant, "a@x.com", true);

    let (status, body) = login(&app, "a@x.com", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["access_token"].as_str().unwrap().is_empty());
    assert!(!body["refresh_token"].as_str().unwrap().is_empty());
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["user"]["email"], "a@x.com");
    // Static role grants resolve into a non-empty permission set.
    assert!(!body["user"]["permissions"].as_array().unwrap().is_empty());
    assert!(body.get("requires_mfa").is_none());
}

#[tokio::test]
async fn login_honors_explicit_tenant_hint() {
    let app = build_app(MockMfaProvider::new());
    let home = seed_tenant(&app, "Home");
    let away = seed_tenant(&app, "Away");
    seed_user(&app, &home, "a@x.com", true);
    let away_user = seed_user(&app, &away, "a@x.com", false);

    let (status, body) = login(&app, "a@x.com", json!({ "tenant_id": away.tenant_id })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["tenant_id"], away_user.tenant_id.to_string());
}

#[tokio::test]
async fn wrong_password_and_unknown_email_return_the_same_401() {
    let app = build_app(MockMfaProvider::new());
    let tenant = seed_tenant(&app, "Acme");
    seed_user(&app, &tenant, "a@x.com", true);

    let (status_a, body_a) = post_json(
        &app,
        "/auth/login",
        json!({ "email": "a@x.com", "password": "wrong" }),
        None,
    )
    .await;
    let (status_b, body_b) = login(&app, "ghost@x.com", json!({})).await;

    assert_eq!(status_a, StatusCode::UNAUTHORIZED);
    assert_eq!(status_b, StatusCode::UNAUTHORIZED);
    assert_eq!(body_a["message"], body_b["message"]);
}

#[tokio::test]
async fn rate_limited_login_returns_429_with_retry_after() {
    let app = build_app_with_limiter(
        MockMfaProvider::new(),
        Arc::new(StaticLimiter::denying(42)),
    );
    let tenant = seed_tenant(&app, "Acme");
    seed_user(&app, &tenant, "a@x.com", true);

    let (status, body) = login(&app, "a@x.com", json!({})).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "too_many_requests");
}

#[tokio::test]
async fn mandated_mfa_without_methods_blocks_with_setup_flag() {
    let app = build_app(MockMfaProvider::new());
    let tenant = seed_mfa_tenant(&app, "Strict", true, Some(Utc::now() - Duration::days(1)));
    seed_user(&app, &tenant, "a@x.com", true);

    let (status, body) = login(&app, "a@x.com", json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["requires_mfa_setup"], true);
    assert!(body.get("access_token").is_none());
}

#[tokio::test]
async fn grace_period_login_succeeds_with_warning() {
    let app = build_app(MockMfaProvider::new());
    let tenant = seed_mfa_tenant(&app, "Gracious", true, Some(Utc::now() + Duration::days(5)));
    seed_user(&app, &tenant, "a@x.com", true);

    let (status, body) = login(&app, "a@x.com", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["access_token"].as_str().unwrap().is_empty());
    assert!(body["mfa_warning"]
        .as_str()
        .unwrap()
        .contains("multi-factor"));
}

#[tokio::test]
async fn invalid_email_shape_is_rejected_before_auth() {
    let app = build_app(MockMfaProvider::new());

    let (status, body) = post_json(
        &app,
        "/auth/login",
        json!({ "email": "not-an-email", "password": "x" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");
}
