pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{extract::State, http::HeaderValue, routing::get, routing::post, Json, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AuthConfig;
use crate::dtos::HealthResponse;
use crate::error::AppError;
use crate::services::audit::AuditSink;
use crate::services::authenticator::CredentialAuthenticator;
use crate::services::coordinator::SessionCoordinator;
use crate::services::directory::UserDirectory;
use crate::services::jwt::JwtService;
use crate::services::mfa::MfaMethodProvider;
use crate::services::permissions::RoleCatalog;
use crate::services::policy::MfaPolicyEvaluator;
use crate::services::rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware};
use crate::services::session_registry::SessionRegistry;
use crate::services::token_store::TokenStore;
use crate::services::tokens::TokenLifecycleManager;

/// Shared application state: every collaborator behind its trait, optional
/// ones behind `Option`.
#[derive(Clone)]
pub struct AppState {
    pub jwt: Arc<JwtService>,
    pub authenticator: Arc<CredentialAuthenticator>,
    pub policy: Arc<MfaPolicyEvaluator>,
    pub mfa: Arc<dyn MfaMethodProvider>,
    pub tokens: Arc<TokenLifecycleManager>,
    pub coordinator: Arc<SessionCoordinator>,
    pub directory: Arc<dyn UserDirectory>,
    pub registry: Arc<dyn SessionRegistry>,
    pub token_store: Arc<dyn TokenStore>,
    pub role_catalog: Option<Arc<dyn RoleCatalog>>,
    pub audit: Option<Arc<dyn AuditSink>>,
    pub service_name: String,
    pub service_version: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::login,
        handlers::auth::mfa_verify,
        handlers::auth::refresh,
        handlers::auth::logout,
        handlers::auth::revoke,
        handlers::auth::introspect,
        handlers::auth::switch_tenant,
        health_check,
    ),
    components(schemas(
        dtos::LoginRequest,
        dtos::LoginResponse,
        dtos::AuthResponse,
        dtos::MfaChallengeResponse,
        dtos::MfaVerifyRequest,
        dtos::RefreshRequest,
        dtos::RefreshResponse,
        dtos::RevokeRequest,
        dtos::IntrospectRequest,
        dtos::IntrospectResponse,
        dtos::SwitchTenantRequest,
        dtos::MessageResponse,
        dtos::ErrorResponse,
        dtos::HealthResponse,
        models::UserProfile,
        services::mfa::MfaMethod,
    )),
    modifiers(&SecurityAddon),
    tags((name = "auth", description = "Authentication and session lifecycle"))
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 500, description = "A backing store is unreachable"),
    ),
    tag = "auth"
)]
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    state.token_store.health_check().await?;
    state.registry.health_check().await?;
    state.directory.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        service: state.service_name.clone(),
        version: state.service_version.clone(),
    }))
}

/// Assemble the router: auth routes, health, CORS, request tracing, IP rate
/// limiting and (when enabled) the Swagger UI.
pub fn build_router(state: AppState, config: &AuthConfig) -> Result<Router, AppError> {
    let mut origins = Vec::with_capacity(config.security.allowed_origins.len());
    for origin in &config.security.allowed_origins {
        origins.push(origin.parse::<HeaderValue>().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Invalid CORS origin {}: {}", origin, e))
        })?);
    }
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let ip_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );

    let mut router = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/mfa/verify", post(handlers::auth::mfa_verify))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/revoke", post(handlers::auth::revoke))
        .route("/auth/introspect", post(handlers::auth::introspect))
        .route("/auth/switch-tenant", post(handlers::auth::switch_tenant))
        .route("/health", get(health_check));

    if config.swagger.enabled {
        router = router
            .merge(SwaggerUi::new("/swagger-ui").url("/.well-known/openapi.json", ApiDoc::openapi()));
    }

    Ok(router
        .layer(axum::middleware::from_fn_with_state(
            ip_limiter,
            ip_rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Initialize structured logging from the configured level, honoring
/// RUST_LOG overrides.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));
    fmt().with_env_filter(filter).with_target(true).init();
}
