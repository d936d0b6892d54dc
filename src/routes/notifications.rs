use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::db::{
    NotificationLog, NotificationLogRepository, NotificationPreferences,
    NotificationPreferencesRepository, UpdateNotificationPreferences,
};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::services::auth::AuthService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/preferences", get(get_preferences).put(update_preferences))
        .route("/history", get(list_history))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

async fn get_preferences(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<Json<NotificationPreferences>> {
    let profile = AuthService::require_profile(&state, user.fid).await?;
    Ok(Json(
        NotificationPreferencesRepository::get_or_default(&state.db, &profile.id).await?,
    ))
}

async fn update_preferences(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<UpdateNotificationPreferences>,
) -> AppResult<Json<NotificationPreferences>> {
    let profile = AuthService::require_profile(&state, user.fid).await?;
    let prefs = NotificationPreferencesRepository::update(&state.db, &profile.id, body).await?;
    tracing::debug!("Notification preferences updated for fid {}", profile.fid);
    Ok(Json(prefs))
}

/// Delivery attempts recorded for the caller.
async fn list_history(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<NotificationLog>>> {
    let status = query.status.as_deref().filter(|s| !s.is_empty());
    if let Some(s) = status {
        if !matches!(s, "sent" | "failed" | "skipped") {
            return Err(AppError::BadRequest(format!("Unknown status: {s}")));
        }
    }
    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    Ok(Json(
        NotificationLogRepository::recent_for_fid(&state.db, user.fid, status, limit).await?,
    ))
}
