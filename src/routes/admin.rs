use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::error::AppResult;
use crate::routes::auth::CronAuth;
use crate::services::registration::RegistrationService;
use crate::services::scheduler::{SchedulerService, TickSummary};
use crate::AppState;

/// Routes mounted under `/api/cron`.
pub fn cron_router() -> Router<Arc<AppState>> {
    Router::new().route("/scheduler", post(run_scheduler))
}

/// Routes mounted under `/api/admin`.
pub fn admin_router() -> Router<Arc<AppState>> {
    Router::new().route("/repair-organizers", post(repair_organizers))
}

#[derive(Debug, Serialize)]
pub struct RepairResponse {
    pub repaired: u64,
}

async fn run_scheduler(
    State(state): State<Arc<AppState>>,
    _auth: CronAuth,
) -> AppResult<Json<TickSummary>> {
    let summary = SchedulerService::tick(&state, Utc::now()).await?;
    tracing::info!("Cron scheduler tick: {:?}", summary);
    Ok(Json(summary))
}

async fn repair_organizers(
    State(state): State<Arc<AppState>>,
    _auth: CronAuth,
) -> AppResult<Json<RepairResponse>> {
    let repaired = RegistrationService::repair_missing_organizers(&state.db).await?;
    Ok(Json(RepairResponse { repaired }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{EventRepository, ParticipantRepository};
    use crate::db::repository::event::tests::{profile, sample_event};
    use crate::test_support::{test_state, TEST_CRON_SECRET};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .nest("/api/cron", cron_router())
            .nest("/api/admin", admin_router())
            .with_state(state)
    }

    fn post(uri: &str, secret: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(s) = secret {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {s}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn cron_requires_secret() {
        let state = test_state().await;
        let resp = app(state.clone())
            .oneshot(post("/api/cron/scheduler", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app(state.clone())
            .oneshot(post("/api/cron/scheduler", Some("wrong")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app(state)
            .oneshot(post("/api/cron/scheduler", Some(TEST_CRON_SECRET)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn repair_restores_missing_organizer() {
        let state = test_state().await;
        let org = profile(&state.db, 1).await;
        let event = EventRepository::create_with_organizer(&state.db, &org.id, sample_event("Cup", 24))
            .await
            .unwrap();
        sqlx::query("DELETE FROM event_participants WHERE event_id = ?")
            .bind(&event.id)
            .execute(&state.db)
            .await
            .unwrap();

        let resp = app(state.clone())
            .oneshot(post("/api/admin/repair-organizers", Some(TEST_CRON_SECRET)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["repaired"], 1);

        assert!(ParticipantRepository::find_active(&state.db, &event.id, &org.id)
            .await
            .unwrap()
            .is_some());
    }
}
