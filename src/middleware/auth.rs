//! Bearer-token extractor. A token is accepted only if its signature and
//! expiry check out and its hash is not on the blacklist, so logged-out
//! tokens die before their natural expiry.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use crate::error::AppError;
use crate::services::jwt::AccessTokenClaims;
use crate::AppState;

/// The authenticated caller. Keeps the raw token alongside the claims so
/// logout and tenant switch can blacklist exactly what was presented.
pub struct AuthUser {
    pub claims: AccessTokenClaims,
    pub token: String,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing authorization header")))?;

        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Authorization header must be a bearer token"))
            })?
            .trim();

        let claims = state
            .jwt
            .validate_access_token(token)
            .map_err(|_| AppError::invalid_token())?;

        if state.tokens.is_access_token_blacklisted(token).await? {
            return Err(AppError::invalid_token());
        }

        Ok(AuthUser {
            claims,
            token: token.to_string(),
        })
    }
}
