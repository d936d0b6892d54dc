// ============================================================================
// Auth Extractors
// ============================================================================

use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;
use crate::services::auth::AuthService;
use crate::AppState;

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let auth_header = parts
        .headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!("Missing or invalid Authorization header");
            AppError::Unauthorized
        })?;

    if auth_header.len() < 7 || !auth_header[..7].eq_ignore_ascii_case("bearer ") {
        tracing::debug!("Authorization header doesn't start with 'Bearer '");
        return Err(AppError::Unauthorized);
    }

    let token = auth_header[7..].trim();
    if token.is_empty() {
        tracing::debug!("Empty bearer token in Authorization header");
        return Err(AppError::Unauthorized);
    }
    Ok(token)
}

/// Extractor for the authenticated Farcaster user. Carries only the fid;
/// handlers resolve the stored profile when they need it.
pub struct AuthUser {
    pub fid: i64,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let fid = AuthService::fid_from_token(&state.config.jwt.secret, token).map_err(|e| {
            tracing::debug!("Rejected session token: {:?}", e);
            e
        })?;
        Ok(AuthUser { fid })
    }
}

/// Guard for cron and admin endpoints: `Authorization: Bearer <CRON_SECRET>`.
pub struct CronAuth;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CronAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(secret) = state.config.admin.cron_secret.as_deref() else {
            return Err(AppError::ServiceUnavailable(
                "CRON_SECRET is not configured".to_string(),
            ));
        };
        let token = bearer_token(parts)?;
        if !AuthService::secrets_match(secret, token) {
            tracing::warn!("Rejected cron/admin request with wrong secret");
            return Err(AppError::Unauthorized);
        }
        Ok(CronAuth)
    }
}
