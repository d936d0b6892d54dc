use axum::http::HeaderMap;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha512;
use sqlx::SqlitePool;

use crate::db::NotificationTokenRepository;
use crate::error::{AppError, AppResult};

type HmacSha512 = Hmac<Sha512>;

pub const NEYNAR_SIGNATURE_HEADER: &str = "x-neynar-signature";

/// JSON Farcaster Signature envelope as posted by Farcaster clients.
#[derive(Debug, Deserialize)]
pub struct SignedEnvelope {
    pub header: String,
    pub payload: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct EnvelopeHeader {
    pub fid: i64,
    #[serde(rename = "type")]
    pub key_type: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NotificationDetails {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    event: String,
    #[serde(rename = "notificationDetails")]
    notification_details: Option<NotificationDetails>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MiniAppEvent {
    Added(Option<NotificationDetails>),
    Removed,
    NotificationsEnabled(NotificationDetails),
    NotificationsDisabled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub fid: i64,
    pub app_key: Option<String>,
    pub event: MiniAppEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookOutcome {
    pub event: &'static str,
    pub tokens_enabled: u64,
    pub tokens_disabled: u64,
}

fn decode_part<T: DeserializeOwned>(encoded: &str, what: &str) -> AppResult<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|_| AppError::BadRequest(format!("Invalid {what} encoding")))?;
    serde_json::from_slice(&bytes).map_err(|e| AppError::BadRequest(format!("Invalid {what}: {e}")))
}

/// Token URLs are later POSTed to by the server, so only https targets are kept.
fn checked_details(details: NotificationDetails) -> AppResult<NotificationDetails> {
    match url::Url::parse(&details.url) {
        Ok(parsed) if parsed.scheme() == "https" && parsed.host().is_some() => Ok(details),
        _ => Err(AppError::BadRequest(
            "notificationDetails.url must be an https URL".to_string(),
        )),
    }
}

pub struct WebhookService;

impl WebhookService {
    /// Verify the hex HMAC-SHA512 of the raw body sent in `X-Neynar-Signature`.
    pub fn verify_signature(secret: &str, headers: &HeaderMap, body: &[u8]) -> AppResult<()> {
        let signature = headers
            .get(NEYNAR_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::debug!("Webhook request without signature header");
                AppError::Unauthorized
            })?;

        let expected =
            hex::decode(signature.trim()).map_err(|_| AppError::BadRequest("Invalid signature format".to_string()))?;

        let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to create HMAC")))?;
        mac.update(body);
        mac.verify_slice(&expected).map_err(|_| AppError::Unauthorized)
    }

    /// Decode the envelope's base64url header and payload.
    pub fn decode(body: &[u8]) -> AppResult<WebhookEvent> {
        let envelope: SignedEnvelope = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Invalid payload: {e}")))?;
        if envelope.signature.is_empty() {
            return Err(AppError::BadRequest("Missing envelope signature".to_string()));
        }

        let header: EnvelopeHeader = decode_part(&envelope.header, "header")?;
        let payload: RawPayload = decode_part(&envelope.payload, "payload")?;
        let details = payload.notification_details.map(checked_details).transpose()?;

        let event = match payload.event.as_str() {
            "frame_added" | "miniapp_added" => MiniAppEvent::Added(details),
            "frame_removed" | "miniapp_removed" => MiniAppEvent::Removed,
            "notifications_enabled" => MiniAppEvent::NotificationsEnabled(
                details.ok_or_else(|| {
                    AppError::BadRequest("notifications_enabled without notificationDetails".to_string())
                })?,
            ),
            "notifications_disabled" => MiniAppEvent::NotificationsDisabled,
            other => return Err(AppError::BadRequest(format!("Unknown event type: {other}"))),
        };

        if header.key_type.as_deref().is_some_and(|t| t != "app_key") {
            tracing::debug!("Webhook header with unexpected key type {:?}", header.key_type);
        }

        Ok(WebhookEvent {
            fid: header.fid,
            app_key: header.key,
            event,
        })
    }

    /// Apply a Mini App lifecycle event to the stored notification tokens.
    pub async fn handle(pool: &SqlitePool, event: &WebhookEvent) -> AppResult<WebhookOutcome> {
        let mut outcome = WebhookOutcome {
            event: "",
            tokens_enabled: 0,
            tokens_disabled: 0,
        };

        match &event.event {
            MiniAppEvent::Added(details) => {
                outcome.event = "added";
                if let Some(d) = details {
                    NotificationTokenRepository::upsert_enabled(pool, event.fid, &d.url, &d.token).await?;
                    outcome.tokens_enabled = 1;
                }
            }
            MiniAppEvent::NotificationsEnabled(d) => {
                outcome.event = "notifications_enabled";
                NotificationTokenRepository::upsert_enabled(pool, event.fid, &d.url, &d.token).await?;
                outcome.tokens_enabled = 1;
            }
            MiniAppEvent::Removed => {
                outcome.event = "removed";
                outcome.tokens_disabled = NotificationTokenRepository::disable_for_fid(pool, event.fid).await?;
            }
            MiniAppEvent::NotificationsDisabled => {
                outcome.event = "notifications_disabled";
                outcome.tokens_disabled = NotificationTokenRepository::disable_for_fid(pool, event.fid).await?;
            }
        }

        tracing::info!(
            "Farcaster webhook for fid {}: {} (enabled={}, disabled={})",
            event.fid,
            outcome.event,
            outcome.tokens_enabled,
            outcome.tokens_disabled
        );
        Ok(outcome)
    }
}

/// Build an envelope body the way Farcaster clients do, for tests and local tooling.
#[cfg(test)]
pub fn encode_envelope(fid: i64, payload: &serde_json::Value) -> Vec<u8> {
    let header = serde_json::json!({"fid": fid, "type": "app_key", "key": "0xabc"});
    serde_json::to_vec(&serde_json::json!({
        "header": URL_SAFE_NO_PAD.encode(header.to_string()),
        "payload": URL_SAFE_NO_PAD.encode(payload.to_string()),
        "signature": URL_SAFE_NO_PAD.encode("sig"),
    }))
    .unwrap()
}

#[cfg(test)]
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
