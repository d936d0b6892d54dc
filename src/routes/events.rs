use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::{
    CreateEvent, Event, EventFilter, EventParticipant, EventRepository, EventStatus, EventType,
    ParticipantRepository, ParticipantRole, ParticipantWithProfile, ProfileRepository,
    UpdateEvent,
};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::services::auth::AuthService;
use crate::services::events::EventService;
use crate::services::registration::{is_event_member, ParticipantUpdate, RegistrationService};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_events).post(create_event))
        .route("/mine", get(my_events))
        .route("/:id", get(get_event).patch(update_event))
        .route("/:id/status", put(update_status))
        .route("/:id/participants", get(list_participants))
        .route("/:id/join", post(join_event))
        .route("/:id/leave", post(leave_event))
        .route(
            "/:id/participants/:participant_id",
            patch(update_participant),
        )
}

// ============================================================================
// Request/Response Types
// ============================================================================

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEventRequest {
    #[validate(length(min = 1, max = 120, message = "must be 1-120 characters"))]
    pub title: String,
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub description: Option<String>,
    #[validate(length(max = 100))]
    pub game: Option<String>,
    pub platform: Option<String>,
    #[serde(default)]
    pub event_type: EventType,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub registration_deadline: Option<DateTime<Utc>>,
    #[validate(range(min = 1, message = "must be at least 1"))]
    pub min_participants: Option<i64>,
    #[validate(range(min = 1, message = "must be at least 1"))]
    pub max_participants: Option<i64>,
    pub status: Option<EventStatus>,
    #[serde(default)]
    pub require_approval: bool,
    #[serde(default = "default_true")]
    pub allow_spectators: bool,
    #[serde(default)]
    pub is_private: bool,
}

impl From<CreateEventRequest> for CreateEvent {
    fn from(r: CreateEventRequest) -> Self {
        CreateEvent {
            title: r.title.trim().to_string(),
            description: r.description,
            game: r.game,
            platform: r.platform,
            event_type: r.event_type,
            location: r.location,
            start_time: r.start_time,
            end_time: r.end_time,
            registration_deadline: r.registration_deadline,
            min_participants: r.min_participants,
            max_participants: r.max_participants,
            status: r.status.unwrap_or(EventStatus::Upcoming),
            require_approval: r.require_approval,
            allow_spectators: r.allow_spectators,
            is_private: r.is_private,
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateEventRequest {
    #[validate(length(min = 1, max = 120, message = "must be 1-120 characters"))]
    pub title: Option<String>,
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub description: Option<String>,
    pub game: Option<String>,
    pub platform: Option<String>,
    pub event_type: Option<EventType>,
    pub location: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub registration_deadline: Option<DateTime<Utc>>,
    #[validate(range(min = 1, message = "must be at least 1"))]
    pub min_participants: Option<i64>,
    #[validate(range(min = 1, message = "must be at least 1"))]
    pub max_participants: Option<i64>,
    pub require_approval: Option<bool>,
    pub allow_spectators: Option<bool>,
    pub is_private: Option<bool>,
}

impl From<UpdateEventRequest> for UpdateEvent {
    fn from(r: UpdateEventRequest) -> Self {
        UpdateEvent {
            title: r.title.map(|t| t.trim().to_string()),
            description: r.description,
            game: r.game,
            platform: r.platform,
            event_type: r.event_type,
            location: r.location,
            start_time: r.start_time,
            end_time: r.end_time,
            registration_deadline: r.registration_deadline,
            min_participants: r.min_participants,
            max_participants: r.max_participants,
            require_approval: r.require_approval,
            allow_spectators: r.allow_spectators,
            is_private: r.is_private,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    pub status: Option<String>,
    pub game: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinRequest {
    pub role: Option<ParticipantRole>,
}

#[derive(Debug, Serialize)]
pub struct EventDetail {
    #[serde(flatten)]
    pub event: Event,
    pub participant_count: i64,
    pub my_registration: Option<EventParticipant>,
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_events(
    State(state): State<Arc<AppState>>,
    AuthUser { .. }: AuthUser,
    Query(query): Query<ListEventsQuery>,
) -> AppResult<Json<Vec<Event>>> {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => Some(s.parse::<EventStatus>()?),
        None => None,
    };
    let filter = EventFilter {
        status,
        game: query.game.filter(|g| !g.trim().is_empty()),
        limit: query.limit.unwrap_or(20).clamp(1, 100),
        offset: query.offset.unwrap_or(0).max(0),
    };
    Ok(Json(EventRepository::list_public(&state.db, &filter).await?))
}

async fn create_event(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<CreateEventRequest>,
) -> AppResult<(StatusCode, Json<Event>)> {
    body.validate()?;
    let event = EventService::create(&state, user.fid, body.into()).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn my_events(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<Json<Vec<Event>>> {
    let profile = AuthService::require_profile(&state, user.fid).await?;
    Ok(Json(
        EventRepository::list_for_profile(&state.db, &profile.id).await?,
    ))
}

/// Load an event the caller may see. Private events are only visible to
/// their organizer and admitted registrants.
async fn visible_event(
    state: &AppState,
    fid: i64,
    id: &str,
) -> AppResult<(Event, Option<EventParticipant>)> {
    let not_found = || AppError::NotFound("Event not found".to_string());
    let event = EventRepository::find_by_id(&state.db, id)
        .await?
        .ok_or_else(not_found)?;
    let profile = ProfileRepository::find_by_fid(&state.db, fid).await?;

    let mine = match &profile {
        Some(p) => ParticipantRepository::find_active(&state.db, &event.id, &p.id).await?,
        None => None,
    };

    let hidden = event.is_private || event.status == EventStatus::Draft;
    if hidden {
        let allowed = match &profile {
            Some(p) => is_event_member(&state.db, &event, p).await?,
            None => false,
        };
        if !allowed {
            return Err(not_found());
        }
    }
    Ok((event, mine))
}

async fn get_event(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<EventDetail>> {
    let (event, mine) = visible_event(&state, user.fid, &id).await?;
    let participant_count = ParticipantRepository::count_seats_taken(&state.db, &event.id).await?;
    Ok(Json(EventDetail {
        event,
        participant_count,
        my_registration: mine,
    }))
}

async fn update_event(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateEventRequest>,
) -> AppResult<Json<Event>> {
    body.validate()?;
    Ok(Json(EventService::update(&state, user.fid, &id, body.into()).await?))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<StatusRequest>,
) -> AppResult<Json<Event>> {
    let status = body.status.parse::<EventStatus>()?;
    Ok(Json(
        EventService::change_status(&state, user.fid, &id, status).await?,
    ))
}

async fn list_participants(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<ParticipantWithProfile>>> {
    let (event, _) = visible_event(&state, user.fid, &id).await?;
    Ok(Json(
        ParticipantRepository::list_for_event(&state.db, &event.id).await?,
    ))
}

async fn join_event(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    body: Option<Json<JoinRequest>>,
) -> AppResult<(StatusCode, Json<EventParticipant>)> {
    let role = body
        .and_then(|Json(b)| b.role)
        .unwrap_or(ParticipantRole::Participant);
    let row = RegistrationService::join(&state, user.fid, &id, role).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn leave_event(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<EventParticipant>> {
    Ok(Json(RegistrationService::leave(&state, user.fid, &id).await?))
}

async fn update_participant(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, participant_id)): Path<(String, String)>,
    Json(body): Json<ParticipantUpdate>,
) -> AppResult<Json<EventParticipant>> {
    Ok(Json(
        RegistrationService::update_participant(&state, user.fid, &id, &participant_id, body)
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::event::tests::profile;
    use crate::services::registration::{EVENT_FULL, ORGANIZER_CANNOT_LEAVE};
    use crate::test_support::{bearer, test_state};
    use axum::body::Body;
    use axum::http::{header, Request};
    use chrono::Duration;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    fn app(state: Arc<AppState>) -> Router {
        Router::new().nest("/api/events", router()).with_state(state)
    }

    fn request(method: &str, uri: &str, fid: i64, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, bearer(fid));
        match body {
            Some(b) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create(state: &Arc<AppState>, fid: i64, extra: serde_json::Value) -> String {
        let start = Utc::now() + Duration::hours(24);
        let mut body = json!({
            "title": "Friday scrims",
            "game": "Valorant",
            "start_time": start,
            "end_time": start + Duration::hours(2),
        });
        if let (Some(obj), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            obj.extend(extra.clone());
        }
        let resp = app(state.clone())
            .oneshot(request("POST", "/api/events", fid, Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        json_body(resp).await["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn join_until_full() {
        let state = test_state().await;
        for fid in 1..=4 {
            profile(&state.db, fid).await;
        }
        let id = create(&state, 1, json!({"max_participants": 2})).await;

        for fid in [2, 3] {
            let resp = app(state.clone())
                .oneshot(request("POST", &format!("/api/events/{id}/join"), fid, None))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::CREATED);
        }

        let resp = app(state.clone())
            .oneshot(request("POST", &format!("/api/events/{id}/join"), 4, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"]["message"], EVENT_FULL);

        // Spectators do not take seats.
        let resp = app(state.clone())
            .oneshot(request(
                "POST",
                &format!("/api/events/{id}/join"),
                4,
                Some(json!({"role": "spectator"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app(state)
            .oneshot(request("GET", &format!("/api/events/{id}"), 2, None))
            .await
            .unwrap();
        let detail = json_body(resp).await;
        assert_eq!(detail["participant_count"], 2);
        assert_eq!(detail["my_registration"]["status"], "confirmed");
    }

    #[tokio::test]
    async fn organizer_cannot_leave() {
        let state = test_state().await;
        profile(&state.db, 1).await;
        let id = create(&state, 1, json!({})).await;

        let resp = app(state)
            .oneshot(request("POST", &format!("/api/events/{id}/leave"), 1, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"]["message"], ORGANIZER_CANNOT_LEAVE);
    }

    #[tokio::test]
    async fn private_events_are_hidden_from_strangers() {
        let state = test_state().await;
        profile(&state.db, 1).await;
        profile(&state.db, 2).await;
        let id = create(&state, 1, json!({"is_private": true})).await;

        let resp = app(state.clone())
            .oneshot(request("GET", &format!("/api/events/{id}"), 2, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app(state.clone())
            .oneshot(request("GET", &format!("/api/events/{id}"), 1, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app(state)
            .oneshot(request("GET", "/api/events", 2, None))
            .await
            .unwrap();
        assert!(json_body(resp).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_status_transition_is_rejected() {
        let state = test_state().await;
        profile(&state.db, 1).await;
        profile(&state.db, 2).await;
        let id = create(&state, 1, json!({})).await;

        let resp = app(state.clone())
            .oneshot(request(
                "PUT",
                &format!("/api/events/{id}/status"),
                1,
                Some(json!({"status": "completed"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app(state.clone())
            .oneshot(request(
                "PUT",
                &format!("/api/events/{id}/status"),
                2,
                Some(json!({"status": "cancelled"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app(state)
            .oneshot(request(
                "PUT",
                &format!("/api/events/{id}/status"),
                1,
                Some(json!({"status": "cancelled"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "cancelled");
    }

    #[tokio::test]
    async fn title_is_validated() {
        let state = test_state().await;
        profile(&state.db, 1).await;
        let resp = app(state)
            .oneshot(request(
                "POST",
                "/api/events",
                1,
                Some(json!({"title": "", "start_time": Utc::now() + Duration::hours(1)})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn mine_lists_organized_and_joined() {
        let state = test_state().await;
        profile(&state.db, 1).await;
        profile(&state.db, 2).await;
        let id = create(&state, 1, json!({})).await;
        app(state.clone())
            .oneshot(request("POST", &format!("/api/events/{id}/join"), 2, None))
            .await
            .unwrap();

        for fid in [1, 2] {
            let resp = app(state.clone())
                .oneshot(request("GET", "/api/events/mine", fid, None))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(json_body(resp).await[0]["id"], id.as_str());
        }
    }
}
