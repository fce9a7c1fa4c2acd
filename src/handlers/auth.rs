//! HTTP handlers for the auth surface. Each handler gathers request context
//! and delegates to the core services; orchestration lives in the `*_impl`
//! functions so the flows stay testable without HTTP plumbing.

use axum::{extract::State, http::HeaderMap, Json};
use uuid::Uuid;

use crate::dtos::{
    AuthResponse, ErrorResponse, IntrospectRequest, IntrospectResponse, LoginRequest,
    LoginResponse, MessageResponse, MfaChallengeResponse, MfaVerifyRequest, RefreshRequest,
    RefreshResponse, RevokeRequest, SwitchTenantRequest,
};
use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::models::{DeviceMetadata, SessionProvider, User, UserProfile};
use crate::services::audit::{self, AuditEvent, AuditEventKind};
use crate::services::permissions::merge_permissions;
use crate::utils::{extract_device_metadata, Password, ValidatedJson};
use crate::AppState;

const TOKEN_TYPE_BEARER: &str = "Bearer";

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Tokens issued or MFA challenge started", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Account or policy blocks login", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let metadata = extract_device_metadata(&headers, request.device_fingerprint.clone());
    login_impl(&state, request, metadata).await.map(Json)
}

async fn login_impl(
    state: &AppState,
    request: LoginRequest,
    metadata: DeviceMetadata,
) -> Result<LoginResponse, AppError> {
    let password = Password::new(request.password);
    let (user, tenant) = state
        .authenticator
        .authenticate(
            &request.email,
            &password,
            request.tenant_id,
            metadata.ip_address.as_deref(),
        )
        .await?;

    let evaluation = state.policy.evaluate_for_user(&tenant, user.user_id).await?;
    if evaluation.should_block_login {
        return Err(AppError::MfaSetupRequired(
            "Your organization requires multi-factor authentication. \
             Please set up an MFA method to continue."
                .to_string(),
        ));
    }

    let has_mfa = state
        .mfa
        .user_has_active_mfa(user.user_id, user.tenant_id)
        .await?;

    // Non-enrolled users inside a mandating tenant's grace window fall
    // through with the warning; outside it the policy check above blocked.
    if has_mfa {
        // A trusted device bypasses the challenge only when the tenant does
        // not itself mandate MFA.
        let trusted = match (&metadata.fingerprint, tenant.mfa_required) {
            (Some(fp), false) => {
                state
                    .mfa
                    .is_device_trusted(user.user_id, user.tenant_id, fp)
                    .await?
            }
            _ => false,
        };

        if !trusted {
            let enrolled = state
                .mfa
                .enrolled_methods(user.user_id, user.tenant_id)
                .await?;
            let available: Vec<_> = enrolled
                .into_iter()
                .filter(|m| evaluation.allowed_methods.contains(m))
                .collect();

            if available.is_empty() {
                if tenant.mfa_required {
                    return Err(AppError::MfaSetupRequired(
                        "No usable MFA method is available for your account. \
                         Please contact your administrator."
                            .to_string(),
                    ));
                }
                tracing::warn!(
                    user_id = %user.user_id,
                    tenant_id = %user.tenant_id,
                    "Enrolled MFA methods are all disallowed by tenant policy; skipping challenge"
                );
            } else {
                let challenge_token = state.jwt.issue_challenge_token(
                    &user,
                    available.clone(),
                    metadata.fingerprint.clone(),
                    request.remember_device,
                )?;
                audit::record(
                    &state.audit,
                    AuditEvent::new(AuditEventKind::MfaChallengeIssued)
                        .tenant(user.tenant_id)
                        .user(user.user_id)
                        .email(&user.email)
                        .ip(metadata.ip_address.as_deref()),
                );
                return Ok(LoginResponse::MfaRequired(MfaChallengeResponse {
                    requires_mfa: true,
                    challenge_token,
                    available_methods: available,
                    expires_in: state.jwt.mfa_challenge_ttl_seconds(),
                }));
            }
        }
    }

    let response = complete_login(
        state,
        &user,
        evaluation.warning_message,
        SessionProvider::Email,
        &metadata,
    )
    .await?;
    Ok(LoginResponse::Success(response))
}

#[utoipa::path(
    post,
    path = "/auth/mfa/verify",
    request_body = MfaVerifyRequest,
    responses(
        (status = 200, description = "Challenge answered, tokens issued", body = AuthResponse),
        (status = 401, description = "Invalid challenge or code", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn mfa_verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<MfaVerifyRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let metadata = extract_device_metadata(&headers, None);
    mfa_verify_impl(&state, request, metadata).await.map(Json)
}

async fn mfa_verify_impl(
    state: &AppState,
    request: MfaVerifyRequest,
    mut metadata: DeviceMetadata,
) -> Result<AuthResponse, AppError> {
    let claims = state
        .jwt
        .validate_challenge_token(&request.challenge_token)
        .map_err(|_| AppError::invalid_token())?;

    if !claims.methods.contains(&request.method) {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Method not available for this challenge"
        )));
    }

    let user_id: Uuid = claims.sub.parse().map_err(|_| AppError::invalid_token())?;
    let tenant_id: Uuid = claims
        .tenant_id
        .parse()
        .map_err(|_| AppError::invalid_token())?;

    let verified = state
        .mfa
        .verify_code(user_id, tenant_id, request.method, &request.code)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(%user_id, "MFA verification errored: {}", e);
            false
        });
    if !verified {
        audit::record(
            &state.audit,
            AuditEvent::new(AuditEventKind::MfaVerifyFailure)
                .tenant(tenant_id)
                .user(user_id)
                .ip(metadata.ip_address.as_deref()),
        );
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid verification code"
        )));
    }

    // A challenge is consumed by its first successful verification; replays
    // inside the TTL die here. Wrong codes do not burn the challenge.
    if !state
        .tokens
        .redeem_challenge_token(&request.challenge_token)
        .await?
    {
        return Err(AppError::invalid_token());
    }

    let user = state
        .directory
        .find_by_id(user_id, tenant_id)
        .await?
        .ok_or_else(AppError::invalid_token)?;
    let tenant = state
        .directory
        .find_tenant(tenant_id)
        .await?
        .ok_or_else(AppError::invalid_token)?;

    if claims.remember_device && !tenant.mfa_required {
        if let Some(fp) = &claims.fingerprint {
            state.mfa.trust_device(user_id, tenant_id, fp).await?;
        }
    }
    // The fingerprint the challenge was issued for belongs on the session.
    if metadata.fingerprint.is_none() {
        metadata.fingerprint = claims.fingerprint.clone();
    }

    audit::record(
        &state.audit,
        AuditEvent::new(AuditEventKind::MfaVerifySuccess)
            .tenant(tenant_id)
            .user(user_id)
            .email(&user.email)
            .ip(metadata.ip_address.as_deref()),
    );

    let warning = state
        .policy
        .evaluate_for_user(&tenant, user.user_id)
        .await?
        .warning_message;
    complete_login(state, &user, warning, SessionProvider::Email, &metadata).await
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated token pair", body = RefreshResponse),
        (status = 401, description = "Invalid, expired or reused token", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AppError> {
    let (new_refresh, record) = state
        .tokens
        .rotate_refresh_token(&request.refresh_token, request.tenant_id)
        .await?;

    let user = state
        .directory
        .find_by_id(record.user_id, record.tenant_id)
        .await?
        .ok_or_else(AppError::invalid_token)?;
    if !user.is_active() {
        return Err(AppError::invalid_token());
    }

    let access_token = state.tokens.issue_access_token(&user)?;
    Ok(Json(RefreshResponse {
        access_token,
        refresh_token: new_refresh,
        token_type: TOKEN_TYPE_BEARER.to_string(),
        expires_in: state.tokens.access_token_expiry_seconds(),
    }))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<MessageResponse>, AppError> {
    state.coordinator.logout(&auth.claims, &auth.token).await?;
    Ok(Json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/auth/revoke",
    request_body = RevokeRequest,
    responses(
        (status = 200, description = "Always succeeds", body = MessageResponse),
    ),
    tag = "auth"
)]
pub async fn revoke(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<RevokeRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .tokens
        .revoke(&request.token, request.token_type_hint.as_deref())
        .await?;
    Ok(Json(MessageResponse {
        message: "Token revoked".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/auth/introspect",
    request_body = IntrospectRequest,
    responses(
        (status = 200, description = "Token state", body = IntrospectResponse),
    ),
    tag = "auth"
)]
pub async fn introspect(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<IntrospectRequest>,
) -> Result<Json<IntrospectResponse>, AppError> {
    let data = state
        .tokens
        .introspect(&request.token, request.token_type_hint.as_deref())
        .await?;

    Ok(Json(match data {
        Some(data) => IntrospectResponse {
            active: true,
            sub: Some(data.sub),
            tenant_id: Some(data.tenant_id),
            email: data.email,
            roles: data.roles,
            token_type: Some(data.token_type),
            exp: Some(data.exp),
            iat: Some(data.iat),
            jti: data.jti,
        },
        None => IntrospectResponse::inactive(),
    }))
}

#[utoipa::path(
    post,
    path = "/auth/switch-tenant",
    security(("bearer_auth" = [])),
    request_body = SwitchTenantRequest,
    responses(
        (status = 200, description = "Switched; new tokens issued", body = AuthResponse),
        (status = 403, description = "Not a member or tenant suspended", body = ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn switch_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth: AuthUser,
    ValidatedJson(request): ValidatedJson<SwitchTenantRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let metadata = extract_device_metadata(&headers, None);
    let (user, tenant, bundle) = state
        .coordinator
        .switch_tenant(&auth.claims, &auth.token, request.tenant_id, &metadata)
        .await?;

    let warning = state
        .policy
        .evaluate_for_user(&tenant, user.user_id)
        .await?
        .warning_message;
    let permissions =
        merge_permissions(&state.role_catalog, user.tenant_id, &user.roles).await;

    Ok(Json(AuthResponse {
        access_token: bundle.access_token,
        refresh_token: bundle.refresh_token,
        token_type: TOKEN_TYPE_BEARER.to_string(),
        expires_in: bundle.expires_in,
        user: UserProfile::from_user(&user, permissions),
        mfa_warning: warning,
    }))
}

async fn complete_login(
    state: &AppState,
    user: &User,
    mfa_warning: Option<String>,
    provider: SessionProvider,
    metadata: &DeviceMetadata,
) -> Result<AuthResponse, AppError> {
    let bundle = state.coordinator.establish(user, provider, metadata).await?;
    let permissions =
        merge_permissions(&state.role_catalog, user.tenant_id, &user.roles).await;

    Ok(AuthResponse {
        access_token: bundle.access_token,
        refresh_token: bundle.refresh_token,
        token_type: TOKEN_TYPE_BEARER.to_string(),
        expires_in: bundle.expires_in,
        user: UserProfile::from_user(user, permissions),
        mfa_warning,
    })
}
