mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{build_app, login, post_json, seed_tenant, seed_user};
use gatehouse::services::mfa::MockMfaProvider;
use gatehouse::services::SessionRegistry;

#[tokio::test]
async fn logout_kills_access_refresh_and_sessions() {
    let app = build_app(MockMfaProvider::new());
    let tenant = seed_tenant(&app, "Acme");
    let user = seed_user(&app, &tenant, "a@x.com", true);

    let (_, body) = login(&app, "a@x.com", json!({})).await;
    let access = body["access_token"].as_str().unwrap().to_string();
    let refresh = body["refresh_token"].as_str().unwrap().to_string();
    assert_eq!(
        app.registry
            .list_for_user(tenant.tenant_id, user.user_id)
            .await
            .unwrap()
            .len(),
        1
    );

    let (status, _) = post_json(&app, "/auth/logout", json!({}), Some(&access)).await;
    assert_eq!(status, StatusCode::OK);

    // The access token is rejected everywhere, including introspection.
    let (status, _) = post_json(&app, "/auth/logout", json!({}), Some(&access)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (_, body) = post_json(&app, "/auth/introspect", json!({ "token": access }), None).await;
    assert_eq!(body["active"], false);

    // Refresh tokens and sessions are gone.
    let (status, _) = post_json(
        &app,
        "/auth/refresh",
        json!({ "refresh_token": refresh }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app
        .registry
        .list_for_user(tenant.tenant_id, user.user_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn logout_requires_a_bearer_token() {
    let app = build_app(MockMfaProvider::new());
    let (status, _) = post_json(&app, "/auth/logout", json!({}), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn switch_tenant_issues_new_bundle_and_invalidates_the_old_one() {
    let app = build_app(MockMfaProvider::new());
    let home = seed_tenant(&app, "Home");
    let away = seed_tenant(&app, "Away");
    let home_user = seed_user(&app, &home, "a@x.com", true);
    let away_user = seed_user(&app, &away, "a@x.com", false);

    let (_, body) = login(&app, "a@x.com", json!({})).await;
    let access = body["access_token"].as_str().unwrap().to_string();
    let refresh = body["refresh_token"].as_str().unwrap().to_string();

    let (status, body) = post_json(
        &app,
        "/auth/switch-tenant",
        json!({ "tenant_id": away.tenant_id }),
        Some(&access),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["tenant_id"], away.tenant_id.to_string());
    let new_access = body["access_token"].as_str().unwrap().to_string();
    let claims = app.jwt.validate_access_token(&new_access).unwrap();
    assert_eq!(claims.tenant_id, away.tenant_id.to_string());

    // Old-tenant credentials and sessions are dead.
    let (status, _) = post_json(&app, "/auth/logout", json!({}), Some(&access)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = post_json(
        &app,
        "/auth/refresh",
        json!({ "refresh_token": refresh }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app
        .registry
        .list_for_user(home.tenant_id, home_user.user_id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        app.registry
            .list_for_user(away.tenant_id, away_user.user_id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn switch_to_non_member_tenant_is_forbidden() {
    let app = build_app(MockMfaProvider::new());
    let home = seed_tenant(&app, "Home");
    let away = seed_tenant(&app, "Away");
    seed_user(&app, &home, "a@x.com", true);

    let (_, body) = login(&app, "a@x.com", json!({})).await;
    let access = body["access_token"].as_str().unwrap().to_string();

    let (status, body) = post_json(
        &app,
        "/auth/switch-tenant",
        json!({ "tenant_id": away.tenant_id }),
        Some(&access),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    // The failed switch does not invalidate the current credentials.
    let (status, _) = post_json(&app, "/auth/logout", json!({}), Some(&access)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn switch_to_current_tenant_is_a_bad_request() {
    let app = build_app(MockMfaProvider::new());
    let home = seed_tenant(&app, "Home");
    seed_user(&app, &home, "a@x.com", true);

    let (_, body) = login(&app, "a@x.com", json!({})).await;
    let access = body["access_token"].as_str().unwrap().to_string();

    let (status, _) = post_json(
        &app,
        "/auth/switch-tenant",
        json!({ "tenant_id": home.tenant_id }),
        Some(&access),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let app = build_app(MockMfaProvider::new());
    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/health")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::util::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
