use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

use gatehouse::config::AuthConfig;
use gatehouse::services::authenticator::CredentialAuthenticator;
use gatehouse::services::coordinator::SessionCoordinator;
use gatehouse::services::directory::PgDirectory;
use gatehouse::services::jwt::JwtService;
use gatehouse::services::mfa::PgMfaProvider;
use gatehouse::services::policy::MfaPolicyEvaluator;
use gatehouse::services::rate_limit::GovernorLimiter;
use gatehouse::services::session_registry::RedisSessionRegistry;
use gatehouse::services::token_store::RedisTokenStore;
use gatehouse::services::tokens::TokenLifecycleManager;
use gatehouse::services::TracingAuditSink;
use gatehouse::{build_router, init_tracing, AppState};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();

    let config = AuthConfig::from_env().map_err(|e| anyhow::anyhow!("{}", e))?;
    init_tracing(&config.log_level);
    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting"
    );

    let jwt = Arc::new(JwtService::new(&config.jwt)?);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database.url)
        .await?;
    sqlx::migrate!().run(&pool).await?;
    tracing::info!("Database migrations applied");

    let token_store = Arc::new(RedisTokenStore::new(&config.redis).await?);
    let registry = Arc::new(
        RedisSessionRegistry::new(
            &config.redis,
            config.jwt.refresh_token_expiry_days * 86_400,
        )
        .await?,
    );

    let directory = Arc::new(PgDirectory::new(pool.clone()));
    let mfa = Arc::new(PgMfaProvider::new(pool));
    let limiter = Arc::new(GovernorLimiter::new(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    ));
    let audit: Option<Arc<dyn gatehouse::services::AuditSink>> =
        Some(Arc::new(TracingAuditSink));

    let tokens = Arc::new(TokenLifecycleManager::new(
        jwt.clone(),
        token_store.clone(),
        audit.clone(),
        config.jwt.refresh_token_expiry_days,
    ));
    let authenticator = Arc::new(CredentialAuthenticator::new(
        directory.clone(),
        limiter,
        audit.clone(),
        config.security.email_verification_ready,
    ));
    let policy = Arc::new(MfaPolicyEvaluator::new(mfa.clone()));
    let coordinator = Arc::new(SessionCoordinator::new(
        tokens.clone(),
        registry.clone(),
        directory.clone(),
        audit.clone(),
    ));

    let state = AppState {
        jwt,
        authenticator,
        policy,
        mfa,
        tokens,
        coordinator,
        directory,
        registry,
        token_store,
        role_catalog: None,
        audit,
        service_name: config.service_name.clone(),
        service_version: config.service_version.clone(),
    };

    let app = build_router(state, &config).map_err(|e| anyhow::anyhow!("{}", e))?;

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
