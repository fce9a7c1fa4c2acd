//! Request/response bodies for the auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::UserProfile;
use crate::services::mfa::MfaMethod;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_mfa_setup: Option<bool>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    /// Explicit tenant to log into; omitted means the default membership.
    pub tenant_id: Option<Uuid>,
    /// Client-supplied device fingerprint; otherwise derived from headers.
    pub device_fingerprint: Option<String>,
    #[serde(default)]
    pub remember_device: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub user: UserProfile,
    /// MFA enrollment warning while a tenant grace period is running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_warning: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MfaChallengeResponse {
    pub requires_mfa: bool,
    pub challenge_token: String,
    pub available_methods: Vec<MfaMethod>,
    /// Challenge token lifetime in seconds.
    pub expires_in: i64,
}

/// Login either completes with tokens or pauses at an MFA challenge.
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum LoginResponse {
    Success(AuthResponse),
    MfaRequired(MfaChallengeResponse),
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct MfaVerifyRequest {
    #[validate(length(min = 1, message = "Challenge token is required"))]
    pub challenge_token: String,
    #[validate(length(min = 4, max = 64, message = "Invalid code length"))]
    pub code: String,
    pub method: MfaMethod,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
    /// Declared tenant; must match the token's binding when present.
    pub tenant_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RevokeRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
    /// "access_token" or "refresh_token", as in RFC 7009.
    pub token_type_hint: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct IntrospectRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
    pub token_type_hint: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IntrospectResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl IntrospectResponse {
    pub fn inactive() -> Self {
        Self {
            active: false,
            sub: None,
            tenant_id: None,
            email: None,
            roles: vec![],
            token_type: None,
            exp: None,
            iat: None,
            jti: None,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SwitchTenantRequest {
    pub tenant_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}
