use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::db::{Profile, ProfileRepository};
use crate::error::{AppError, AppResult};
use crate::AppState;

/// Session claims. `sub` is the caller's Farcaster fid.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

pub struct AuthService;

impl AuthService {
    /// Mint a session token for `fid`. Production tokens come from the Mini App
    /// front-end; this is used by tooling and tests.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn create_jwt(secret: &str, fid: i64, ttl: Duration) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: fid.to_string(),
            iat: now.timestamp() as usize,
            exp: (now + ttl).timestamp() as usize,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Decode and validate a JWT, returning the claims
    pub fn decode_jwt(secret: &str, token: &str) -> AppResult<Claims> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )?;
        Ok(token_data.claims)
    }

    /// The fid carried by a valid token.
    pub fn fid_from_token(secret: &str, token: &str) -> AppResult<i64> {
        let claims = Self::decode_jwt(secret, token)?;
        claims.sub.parse::<i64>().map_err(|_| {
            tracing::debug!("JWT subject is not a fid: {}", claims.sub);
            AppError::Unauthorized
        })
    }

    /// Resolve the stored profile for `fid`.
    pub async fn require_profile(state: &AppState, fid: i64) -> AppResult<Profile> {
        ProfileRepository::find_by_fid(&state.db, fid)
            .await?
            .ok_or_else(|| AppError::NotFound("Profile not found".to_string()))
    }

    /// Constant-time comparison for shared secrets.
    pub fn secrets_match(expected: &str, provided: &str) -> bool {
        constant_time_eq::constant_time_eq(expected.as_bytes(), provided.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip_yields_fid() {
        let token = AuthService::create_jwt("secret", 4242, Duration::hours(1)).unwrap();
        assert_eq!(AuthService::fid_from_token("secret", &token).unwrap(), 4242);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = AuthService::create_jwt("secret", 1, Duration::hours(1)).unwrap();
        assert!(matches!(
            AuthService::fid_from_token("other", &token),
            Err(AppError::Jwt(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = AuthService::create_jwt("secret", 1, Duration::hours(-2)).unwrap();
        assert!(AuthService::decode_jwt("secret", &token).is_err());
    }

    #[test]
    fn secret_comparison() {
        assert!(AuthService::secrets_match("abc", "abc"));
        assert!(!AuthService::secrets_match("abc", "abd"));
        assert!(!AuthService::secrets_match("abc", "ab"));
        assert!(!AuthService::secrets_match("abc", ""));
    }
}
