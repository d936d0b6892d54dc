use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};

use crate::error::AppError;
use crate::services::webhooks::{WebhookOutcome, WebhookService};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/farcaster", post(handle_farcaster_webhook))
}

async fn handle_farcaster_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookOutcome>), AppError> {
    if let Some(secret) = state.config.neynar.webhook_secret.as_deref() {
        WebhookService::verify_signature(secret, &headers, &body)?;
    }

    let event = WebhookService::decode(&body)?;
    tracing::debug!(
        "Received Mini App webhook for fid {} (app key {:?})",
        event.fid,
        event.app_key
    );

    let outcome = WebhookService::handle(&state.db, &event).await?;
    Ok((StatusCode::OK, Json(outcome)))
}
