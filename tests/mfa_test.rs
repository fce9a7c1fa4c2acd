mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{build_app, login, post_json, seed_mfa_tenant, seed_tenant, seed_user};
use gatehouse::services::mfa::{MfaMethod, MockMfaProvider};

const CODE: &str = "123456";

#[tokio::test]
async fn enrolled_user_gets_challenge_then_tokens() {
    let app = build_app(MockMfaProvider::with_enrollment(vec![MfaMethod::Totp], CODE));
    let tenant = seed_tenant(&app, "Acme");
    seed_user(&app, &tenant, "a@x.com", true);

    let (status, body) = login(&app, "a@x.com", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requires_mfa"], true);
    assert!(body.get("access_token").is_none());
    let challenge = body["challenge_token"].as_str().unwrap().to_string();
    assert_eq!(body["available_methods"], json!(["totp"]));

    // A wrong code fails without burning the challenge.
    let (status, _) = post_json(
        &app,
        "/auth/mfa/verify",
        json!({ "challenge_token": challenge, "code": "999999", "method": "totp" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The same challenge with the right code completes the login.
    let (status, body) = post_json(
        &app,
        "/auth/mfa/verify",
        json!({ "challenge_token": challenge, "code": CODE, "method": "totp" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["access_token"].as_str().unwrap().is_empty());
    assert!(!body["refresh_token"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn challenge_token_is_single_use() {
    let app = build_app(MockMfaProvider::with_enrollment(vec![MfaMethod::Totp], CODE));
    let tenant = seed_tenant(&app, "Acme");
    seed_user(&app, &tenant, "a@x.com", true);

    let (_, body) = login(&app, "a@x.com", json!({})).await;
    let challenge = body["challenge_token"].as_str().unwrap().to_string();

    let (status, _) = post_json(
        &app,
        "/auth/mfa/verify",
        json!({ "challenge_token": challenge, "code": CODE, "method": "totp" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Replaying the same challenge inside its TTL fails.
    let (status, _) = post_json(
        &app,
        "/auth/mfa/verify",
        json!({ "challenge_token": challenge, "code": CODE, "method": "totp" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn method_outside_the_challenge_is_rejected() {
    let app = build_app(MockMfaProvider::with_enrollment(vec![MfaMethod::Totp], CODE));
    let tenant = seed_tenant(&app, "Acme");
    seed_user(&app, &tenant, "a@x.com", true);

    let (_, body) = login(&app, "a@x.com", json!({})).await;
    let challenge = body["challenge_token"].as_str().unwrap().to_string();

    let (status, _) = post_json(
        &app,
        "/auth/mfa/verify",
        json!({ "challenge_token": challenge, "code": CODE, "method": "sms" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn trusted_device_bypasses_challenge_unless_tenant_mandates() {
    // Non-mandating tenant: trusted fingerprint skips the challenge.
    let app = build_app(MockMfaProvider::with_enrollment(vec![MfaMethod::Totp], CODE));
    let tenant = seed_tenant(&app, "Lenient");
    let user = seed_user(&app, &tenant, "a@x.com", true);
    app.mfa.pre_trust(user.user_id, tenant.tenant_id, "fp-1");

    let (status, body) = login(&app, "a@x.com", json!({ "device_fingerprint": "fp-1" })).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["access_token"].as_str().unwrap().is_empty());

    // Mandating tenant: the same trusted fingerprint is still challenged.
    let app = build_app(MockMfaProvider::with_enrollment(vec![MfaMethod::Totp], CODE));
    let tenant = seed_mfa_tenant(&app, "Strict", true, None);
    let user = seed_user(&app, &tenant, "a@x.com", true);
    app.mfa.pre_trust(user.user_id, tenant.tenant_id, "fp-1");

    let (status, body) = login(&app, "a@x.com", json!({ "device_fingerprint": "fp-1" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requires_mfa"], true);
}

#[tokio::test]
async fn remember_device_trusts_the_fingerprint_for_next_login() {
    let app = build_app(MockMfaProvider::with_enrollment(vec![MfaMethod::Totp], CODE));
    let tenant = seed_tenant(&app, "Acme");
    seed_user(&app, &tenant, "a@x.com", true);

    let (_, body) = login(
        &app,
        "a@x.com",
        json!({ "device_fingerprint": "fp-2", "remember_device": true }),
    )
    .await;
    let challenge = body["challenge_token"].as_str().unwrap().to_string();
    let (status, _) = post_json(
        &app,
        "/auth/mfa/verify",
        json!({ "challenge_token": challenge, "code": CODE, "method": "totp" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Same device again: no challenge this time.
    let (status, body) = login(&app, "a@x.com", json!({ "device_fingerprint": "fp-2" })).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["access_token"].as_str().unwrap().is_empty());
    assert!(body.get("requires_mfa").is_none());
}

#[tokio::test]
async fn garbage_challenge_token_is_unauthorized() {
    let app = build_app(MockMfaProvider::with_enrollment(vec![MfaMethod::Totp], CODE));

    let (status, _) = post_json(
        &app,
        "/auth/mfa/verify",
        json!({ "challenge_token": "garbage", "code": CODE, "method": "totp" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
