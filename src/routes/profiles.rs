use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::{
    Gamertag, GamingPlatform, ParticipantRepository, Profile, ProfileRepository, ProfileSummary,
    UpsertProfile,
};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::services::stats::{profile_stats, ProfileStats};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/me", get(get_me))
        .route("/sync", post(sync_me))
        .route("/me/gamertags", get(list_my_gamertags).put(upsert_gamertag))
        .route("/me/gamertags/:platform", delete(delete_gamertag))
        .route("/:fid", get(get_profile))
        .route("/:fid/stats", get(get_stats))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct MeResponse {
    #[serde(flatten)]
    pub profile: Profile,
    pub gamertags: Vec<Gamertag>,
}

#[derive(Debug, Serialize)]
pub struct PublicProfileResponse {
    #[serde(flatten)]
    pub profile: ProfileSummary,
    pub bio: Option<String>,
    pub gamertags: Vec<Gamertag>,
}

fn default_public() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct GamertagRequest {
    pub platform: String,
    #[validate(length(min = 1, max = 64, message = "must be 1-64 characters"))]
    pub gamertag: String,
    #[serde(default = "default_public")]
    pub is_public: bool,
}

/// The caller's profile, created bare on first access.
async fn current_profile(state: &AppState, fid: i64) -> AppResult<Profile> {
    if let Some(p) = ProfileRepository::find_by_fid(&state.db, fid).await? {
        return Ok(p);
    }
    tracing::info!("Creating profile for fid {}", fid);
    ProfileRepository::upsert_by_fid(
        &state.db,
        UpsertProfile {
            fid,
            ..Default::default()
        },
    )
    .await
}

async fn profile_by_fid(state: &AppState, fid: i64) -> AppResult<Profile> {
    ProfileRepository::find_by_fid(&state.db, fid)
        .await?
        .ok_or_else(|| AppError::NotFound("Profile not found".to_string()))
}

// ============================================================================
// Handlers
// ============================================================================

async fn get_me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<Json<MeResponse>> {
    let profile = current_profile(&state, user.fid).await?;
    let gamertags = ProfileRepository::list_gamertags(&state.db, &profile.id, false).await?;
    Ok(Json(MeResponse { profile, gamertags }))
}

/// Refresh the caller's profile from Farcaster via Neynar.
async fn sync_me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<Json<Profile>> {
    let neynar = state.neynar.as_ref().ok_or_else(|| {
        AppError::ServiceUnavailable("Farcaster profile sync is not configured".to_string())
    })?;

    let fc_user = neynar
        .fetch_user(user.fid)
        .await?
        .ok_or_else(|| AppError::NotFound("Farcaster user not found".to_string()))?;

    let profile = ProfileRepository::upsert_by_fid(
        &state.db,
        UpsertProfile {
            fid: user.fid,
            bio: fc_user.bio(),
            username: fc_user.username,
            display_name: fc_user.display_name,
            pfp_url: fc_user.pfp_url,
        },
    )
    .await?;
    tracing::info!("Synced profile for fid {}", user.fid);
    Ok(Json(profile))
}

async fn list_my_gamertags(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<Json<Vec<Gamertag>>> {
    let profile = current_profile(&state, user.fid).await?;
    Ok(Json(
        ProfileRepository::list_gamertags(&state.db, &profile.id, false).await?,
    ))
}

async fn upsert_gamertag(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<GamertagRequest>,
) -> AppResult<Json<Gamertag>> {
    body.validate()?;
    let platform = body.platform.parse::<GamingPlatform>()?;
    let tag = body.gamertag.trim();
    if tag.is_empty() {
        return Err(AppError::Validation("gamertag: must be 1-64 characters".to_string()));
    }
    let profile = current_profile(&state, user.fid).await?;
    Ok(Json(
        ProfileRepository::upsert_gamertag(&state.db, &profile.id, platform, tag, body.is_public)
            .await?,
    ))
}

async fn delete_gamertag(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(platform): Path<String>,
) -> AppResult<StatusCode> {
    let platform = platform.parse::<GamingPlatform>()?;
    let profile = current_profile(&state, user.fid).await?;
    if ProfileRepository::delete_gamertag(&state.db, &profile.id, platform).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("Gamertag not found".to_string()))
    }
}

async fn get_profile(
    State(state): State<Arc<AppState>>,
    AuthUser { .. }: AuthUser,
    Path(fid): Path<i64>,
) -> AppResult<Json<PublicProfileResponse>> {
    let profile = profile_by_fid(&state, fid).await?;
    let gamertags = ProfileRepository::list_gamertags(&state.db, &profile.id, true).await?;
    let bio = profile.bio.clone();
    Ok(Json(PublicProfileResponse {
        profile: profile.into(),
        bio,
        gamertags,
    }))
}

async fn get_stats(
    State(state): State<Arc<AppState>>,
    AuthUser { .. }: AuthUser,
    Path(fid): Path<i64>,
) -> AppResult<Json<ProfileStats>> {
    let profile = profile_by_fid(&state, fid).await?;
    let records = ParticipantRepository::participation_for_profile(&state.db, &profile.id).await?;
    Ok(Json(profile_stats(&records)))
}
