use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{ProfileRepository, ProfileSummary};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::AppState;

const MIN_QUERY_CHARS: usize = 2;
const MAX_SEARCH_RESULTS: i64 = 50;
const MAX_MUTUALS: u32 = 100;

/// Router for finding other players
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/search", get(search_users))
        .route("/mutuals", get(mutual_followers))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    /// Matched against username and display name
    pub q: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MutualsQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct MutualFollower {
    pub fid: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub pfp_url: Option<String>,
    /// Whether this account already uses GameLink.
    pub has_profile: bool,
}

async fn search_users(
    State(state): State<Arc<AppState>>,
    AuthUser { .. }: AuthUser,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<ProfileSummary>>> {
    let q = query.q.as_deref().map(str::trim).unwrap_or_default();
    if q.chars().count() < MIN_QUERY_CHARS {
        return Err(AppError::BadRequest(format!(
            "Search query must be at least {MIN_QUERY_CHARS} characters"
        )));
    }
    let limit = query.limit.unwrap_or(20).clamp(1, MAX_SEARCH_RESULTS);
    Ok(Json(ProfileRepository::search(&state.db, q, limit).await?))
}

async fn mutual_followers(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<MutualsQuery>,
) -> AppResult<Json<Vec<MutualFollower>>> {
    let neynar = state.neynar.as_ref().ok_or_else(|| {
        AppError::ServiceUnavailable("Farcaster social graph is not configured".to_string())
    })?;

    let limit = query.limit.unwrap_or(MAX_MUTUALS).clamp(1, MAX_MUTUALS);
    let users = neynar.reciprocal_followers(user.fid, limit).await?;

    let fids: Vec<i64> = users.iter().map(|u| u.fid).collect();
    let known: HashSet<i64> = ProfileRepository::existing_fids(&state.db, &fids)
        .await?
        .into_iter()
        .collect();

    let mutuals = users
        .into_iter()
        .map(|u| MutualFollower {
            has_profile: known.contains(&u.fid),
            fid: u.fid,
            username: u.username,
            display_name: u.display_name,
            pfp_url: u.pfp_url,
        })
        .collect();
    Ok(Json(mutuals))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::event::tests::profile;
    use crate::services::neynar::NeynarClient;
    use crate::test_support::{bearer, test_state};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app(state: Arc<AppState>) -> Router {
        Router::new().nest("/api/users", router()).with_state(state)
    }

    fn get(uri: &str, fid: i64) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, bearer(fid))
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn search_requires_two_characters() {
        let state = test_state().await;
        profile(&state.db, 1).await;
        let resp = app(state.clone())
            .oneshot(get("/api/users/search?q=u", 1))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app(state)
            .oneshot(get("/api/users/search?q=user1", 1))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mutuals_are_flagged_with_profile_presence() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/farcaster/followers/reciprocal"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "users": [
                    {"user": {"fid": 2, "username": "two"}},
                    {"user": {"fid": 3, "username": "three"}}
                ]
            })))
            .mount(&server)
            .await;

        let base = test_state().await;
        profile(&base.db, 2).await;
        let state = Arc::new(AppState {
            db: base.db.clone(),
            config: base.config.clone(),
            neynar: Some(NeynarClient::new("key", &server.uri()).unwrap()),
            notifier: base.notifier.clone(),
        });

        let resp = app(state).oneshot(get("/api/users/mutuals", 1)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json[0]["fid"], 2);
        assert_eq!(json[0]["has_profile"], true);
        assert_eq!(json[1]["has_profile"], false);
    }
}
