use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{
    CreateNotificationLog, NotificationLogRepository, NotificationPreferences,
    NotificationPreferencesRepository, NotificationTokenRepository, ProfileRepository,
};
use crate::error::AppResult;
use crate::services::neynar::{FrameNotification, FrameNotificationRequest, NeynarClient};
use crate::AppState;

pub const MAX_TITLE_CHARS: usize = 32;
pub const MAX_BODY_CHARS: usize = 128;
pub const MAX_NOTIFICATION_ID_CHARS: usize = 128;
/// Farcaster clients accept at most 100 tokens per request.
const TOKENS_PER_REQUEST: usize = 100;
const NEYNAR_FIDS_PER_REQUEST: usize = 100;

/// Types of notifications that can be sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    EventStatusChanged,
    EventUpdated,
    EventReminder,
    ParticipantJoined,
    ParticipantStatusChanged,
    ChatMessage,
    GroupMemberJoined,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::EventStatusChanged => "event_status_changed",
            NotificationKind::EventUpdated => "event_updated",
            NotificationKind::EventReminder => "event_reminder",
            NotificationKind::ParticipantJoined => "participant_joined",
            NotificationKind::ParticipantStatusChanged => "participant_status_changed",
            NotificationKind::ChatMessage => "chat_message",
            NotificationKind::GroupMemberJoined => "group_member_joined",
        }
    }

    /// Whether the recipient's preferences allow this kind.
    pub fn allowed_by(&self, prefs: &NotificationPreferences) -> bool {
        if !prefs.enabled {
            return false;
        }
        match self {
            NotificationKind::EventStatusChanged | NotificationKind::EventUpdated => {
                prefs.event_updates
            }
            NotificationKind::EventReminder => prefs.event_reminders,
            NotificationKind::ParticipantJoined | NotificationKind::ParticipantStatusChanged => {
                prefs.participant_updates
            }
            NotificationKind::ChatMessage => prefs.chat_messages,
            NotificationKind::GroupMemberJoined => prefs.group_activity,
        }
    }
}

/// Cut `s` to at most `max` characters, ending with an ellipsis when shortened.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// A notification ready to hand to a provider. Fields already respect the
/// client length limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutgoingNotification {
    pub kind: String,
    pub notification_id: String,
    pub title: String,
    pub body: String,
    pub target_url: String,
}

impl OutgoingNotification {
    pub fn new(kind: NotificationKind, title: &str, body: &str, target_url: String) -> Self {
        let notification_id = truncate(
            &format!("{}-{}", kind.as_str(), Uuid::new_v4()),
            MAX_NOTIFICATION_ID_CHARS,
        );
        Self {
            kind: kind.as_str().to_string(),
            notification_id,
            title: truncate(title, MAX_TITLE_CHARS),
            body: truncate(body, MAX_BODY_CHARS),
            target_url,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Skipped,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Skipped => "skipped",
        }
    }
}

/// Result of a notification send attempt for one recipient
#[derive(Debug, Clone)]
pub struct NotificationResult {
    pub fid: i64,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

impl NotificationResult {
    fn sent(fid: i64) -> Self {
        Self {
            fid,
            status: DeliveryStatus::Sent,
            error: None,
        }
    }

    fn failed(fid: i64, error: impl Into<String>) -> Self {
        Self {
            fid,
            status: DeliveryStatus::Failed,
            error: Some(error.into()),
        }
    }

    fn skipped(fid: i64, reason: impl Into<String>) -> Self {
        Self {
            fid,
            status: DeliveryStatus::Skipped,
            error: Some(reason.into()),
        }
    }
}

/// A push provider. Implementations report one result per target fid and
/// never return an error: failures are part of the results.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    fn provider(&self) -> &'static str;

    async fn send(&self, fids: &[i64], notification: &OutgoingNotification)
        -> Vec<NotificationResult>;
}

// ============================================================================
// Neynar managed notifications
// ============================================================================

pub struct NeynarNotifier {
    client: NeynarClient,
}

impl NeynarNotifier {
    pub fn new(client: NeynarClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for NeynarNotifier {
    fn provider(&self) -> &'static str {
        "neynar"
    }

    async fn send(
        &self,
        fids: &[i64],
        notification: &OutgoingNotification,
    ) -> Vec<NotificationResult> {
        let mut results = Vec::with_capacity(fids.len());
        for chunk in fids.chunks(NEYNAR_FIDS_PER_REQUEST) {
            let request = FrameNotificationRequest {
                target_fids: chunk,
                notification: FrameNotification {
                    title: &notification.title,
                    body: &notification.body,
                    target_url: &notification.target_url,
                    uuid: &notification.notification_id,
                },
            };
            match self.client.publish_frame_notification(&request).await {
                Ok(resp) => {
                    let failed: HashMap<i64, String> = resp
                        .notification_deliveries
                        .into_iter()
                        .filter(|d| d.status != "success")
                        .map(|d| (d.fid, d.status))
                        .collect();
                    results.extend(chunk.iter().map(|fid| match failed.get(fid) {
                        Some(status) => NotificationResult::failed(*fid, status.clone()),
                        None => NotificationResult::sent(*fid),
                    }));
                }
                Err(e) => {
                    let msg = e.to_string();
                    results.extend(chunk.iter().map(|fid| NotificationResult::failed(*fid, &msg)));
                }
            }
        }
        results
    }
}

// ============================================================================
// Direct Mini App notifications
// ============================================================================

/// Posts to the notification URLs Farcaster clients registered through the
/// webhook, using the stored per-user tokens.
pub struct DirectNotifier {
    pool: SqlitePool,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DirectNotificationRequest<'a> {
    notification_id: &'a str,
    title: &'a str,
    body: &'a str,
    target_url: &'a str,
    tokens: Vec<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectNotificationResponse {
    result: DirectNotificationOutcome,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectNotificationOutcome {
    #[serde(default)]
    successful_tokens: Vec<String>,
    #[serde(default)]
    invalid_tokens: Vec<String>,
    #[serde(default)]
    rate_limited_tokens: Vec<String>,
}

impl DirectNotifier {
    pub fn new(pool: SqlitePool) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { pool, http })
    }

    async fn post_batch(
        &self,
        url: &str,
        tokens: &[&str],
        notification: &OutgoingNotification,
    ) -> Result<DirectNotificationOutcome, String> {
        let body = DirectNotificationRequest {
            notification_id: &notification.notification_id,
            title: &notification.title,
            body: &notification.body,
            target_url: &notification.target_url,
            tokens: tokens.to_vec(),
        };
        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("client responded with status {}", resp.status()));
        }
        resp.json::<DirectNotificationResponse>()
            .await
            .map(|r| r.result)
            .map_err(|e| format!("unexpected response body: {e}"))
    }
}

#[async_trait]
impl Notifier for DirectNotifier {
    fn provider(&self) -> &'static str {
        "direct"
    }

    async fn send(
        &self,
        fids: &[i64],
        notification: &OutgoingNotification,
    ) -> Vec<NotificationResult> {
        let tokens = match NotificationTokenRepository::enabled_for_fids(&self.pool, fids).await {
            Ok(t) => t,
            Err(e) => {
                let msg = e.to_string();
                return fids.iter().map(|f| NotificationResult::failed(*f, &msg)).collect();
            }
        };

        // A fid counts as delivered when any of its tokens succeeds.
        let mut owner: HashMap<&str, i64> = HashMap::new();
        let mut by_url: HashMap<&str, Vec<&str>> = HashMap::new();
        for t in &tokens {
            owner.insert(t.token.as_str(), t.fid);
            by_url.entry(t.url.as_str()).or_default().push(t.token.as_str());
        }

        let mut delivered: HashSet<i64> = HashSet::new();
        let mut errors: HashMap<i64, String> = HashMap::new();
        let mut invalid: Vec<String> = Vec::new();

        for (url, url_tokens) in &by_url {
            for batch in url_tokens.chunks(TOKENS_PER_REQUEST) {
                match self.post_batch(url, batch, notification).await {
                    Ok(outcome) => {
                        for tok in &outcome.successful_tokens {
                            if let Some(fid) = owner.get(tok.as_str()) {
                                delivered.insert(*fid);
                            }
                        }
                        for tok in &outcome.rate_limited_tokens {
                            if let Some(fid) = owner.get(tok.as_str()) {
                                errors.insert(*fid, "rate limited".to_string());
                            }
                        }
                        for tok in &outcome.invalid_tokens {
                            if let Some(fid) = owner.get(tok.as_str()) {
                                errors.insert(*fid, "invalid token".to_string());
                            }
                        }
                        invalid.extend(outcome.invalid_tokens);
                    }
                    Err(e) => {
                        tracing::warn!("Direct notification to {} failed: {}", url, e);
                        for tok in batch {
                            if let Some(fid) = owner.get(tok) {
                                errors.insert(*fid, e.clone());
                            }
                        }
                    }
                }
            }
        }

        if !invalid.is_empty() {
            if let Err(e) = NotificationTokenRepository::disable_tokens(&self.pool, &invalid).await {
                tracing::warn!("Failed to disable invalid notification tokens: {:?}", e);
            }
        }

        let with_tokens: HashSet<i64> = tokens.iter().map(|t| t.fid).collect();
        fids.iter()
            .map(|fid| {
                if delivered.contains(fid) {
                    NotificationResult::sent(*fid)
                } else if !with_tokens.contains(fid) {
                    NotificationResult::skipped(*fid, "no enabled notification token")
                } else {
                    let err = errors
                        .get(fid)
                        .cloned()
                        .unwrap_or_else(|| "not delivered".to_string());
                    NotificationResult::failed(*fid, err)
                }
            })
            .collect()
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Filters recipients by preference, hands them to the configured provider and
/// records every attempt in the notification log.
pub struct NotificationService {
    pool: SqlitePool,
    notifier: Arc<dyn Notifier>,
    app_url: String,
}

impl NotificationService {
    pub fn new(state: &AppState) -> Self {
        Self {
            pool: state.db.clone(),
            notifier: state.notifier.clone(),
            app_url: state.config.server.app_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn target_url(&self, path: &str) -> String {
        format!("{}{}", self.app_url, path)
    }

    /// Send `title`/`body` to the given profiles and log the results.
    pub async fn deliver(
        &self,
        recipient_ids: &[String],
        kind: NotificationKind,
        title: &str,
        body: &str,
        path: &str,
    ) -> AppResult<Vec<NotificationResult>> {
        let recipient_ids: Vec<String> = {
            let mut seen = HashSet::new();
            recipient_ids
                .iter()
                .filter(|id| seen.insert(id.as_str()))
                .cloned()
                .collect()
        };
        if recipient_ids.is_empty() {
            return Ok(Vec::new());
        }

        let stored: HashMap<String, NotificationPreferences> =
            NotificationPreferencesRepository::for_profiles(&self.pool, &recipient_ids)
                .await?
                .into_iter()
                .map(|p| (p.profile_id.clone(), p))
                .collect();

        let allowed: Vec<String> = recipient_ids
            .into_iter()
            .filter(|id| {
                stored
                    .get(id)
                    .map(|p| kind.allowed_by(p))
                    .unwrap_or(true)
            })
            .collect();

        let fids = ProfileRepository::fids_for_ids(&self.pool, &allowed).await?;
        if fids.is_empty() {
            tracing::debug!("No recipients left for {} notification", kind.as_str());
            return Ok(Vec::new());
        }

        let notification = OutgoingNotification::new(kind, title, body, self.target_url(path));
        let results = self.notifier.send(&fids, &notification).await;

        for result in &results {
            if let Err(e) = self.log_notification(&notification, result).await {
                tracing::warn!("Failed to write notification log: {:?}", e);
            }
        }

        let sent = results
            .iter()
            .filter(|r| r.status == DeliveryStatus::Sent)
            .count();
        tracing::info!(
            "Delivered {} notification via {}: {}/{} sent",
            kind.as_str(),
            self.notifier.provider(),
            sent,
            results.len()
        );

        Ok(results)
    }

    async fn log_notification(
        &self,
        notification: &OutgoingNotification,
        result: &NotificationResult,
    ) -> AppResult<crate::db::NotificationLog> {
        let log = CreateNotificationLog {
            fid: result.fid,
            notification_type: notification.kind.clone(),
            provider: self.notifier.provider().to_string(),
            title: notification.title.clone(),
            body: notification.body.clone(),
            status: result.status.as_str().to_string(),
            error_message: result.error.clone(),
        };
        NotificationLogRepository::create(&self.pool, log).await
    }

    /// Fire-and-forget delivery on a spawned task. Errors are logged only.
    pub fn dispatch(
        state: &Arc<AppState>,
        recipient_ids: Vec<String>,
        kind: NotificationKind,
        title: String,
        body: String,
        path: String,
    ) {
        if recipient_ids.is_empty() {
            return;
        }
        let svc = Self::new(state);
        tokio::spawn(async move {
            if let Err(e) = svc.deliver(&recipient_ids, kind, &title, &body, &path).await {
                tracing::warn!("{} notification dispatch failed: {:?}", kind.as_str(), e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::event::tests::profile;
    use crate::db::{test_pool, UpdateNotificationPreferences};
    use crate::test_support::{test_state_with, RecordingNotifier};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn truncation_respects_char_limits() {
        assert_eq!(truncate("short", 32), "short");
        let long = "a".repeat(40);
        let t = truncate(&long, MAX_TITLE_CHARS);
        assert_eq!(t.chars().count(), MAX_TITLE_CHARS);
        assert!(t.ends_with('…'));
        let emoji = "🎮".repeat(200);
        assert_eq!(truncate(&emoji, MAX_BODY_CHARS).chars().count(), MAX_BODY_CHARS);
    }

    #[test]
    fn outgoing_notification_is_clamped() {
        let n = OutgoingNotification::new(
            NotificationKind::EventReminder,
            &"t".repeat(100),
            &"b".repeat(500),
            "https://app/events/1".to_string(),
        );
        assert!(n.title.chars().count() <= MAX_TITLE_CHARS);
        assert!(n.body.chars().count() <= MAX_BODY_CHARS);
        assert!(n.notification_id.starts_with("event_reminder-"));
        assert!(n.notification_id.chars().count() <= MAX_NOTIFICATION_ID_CHARS);
    }

    #[test]
    fn preferences_gate_kinds() {
        let mut prefs = NotificationPreferences::defaults_for("p");
        assert!(NotificationKind::ChatMessage.allowed_by(&prefs));
        prefs.chat_messages = false;
        assert!(!NotificationKind::ChatMessage.allowed_by(&prefs));
        assert!(NotificationKind::EventReminder.allowed_by(&prefs));
        prefs.enabled = false;
        assert!(!NotificationKind::EventReminder.allowed_by(&prefs));
    }

    #[tokio::test]
    async fn deliver_filters_by_preferences_and_logs() {
        let recorder = Arc::new(RecordingNotifier::default());
        let state = test_state_with(recorder.clone()).await;
        let a = profile(&state.db, 10).await;
        let b = profile(&state.db, 11).await;
        NotificationPreferencesRepository::update(
            &state.db,
            &b.id,
            UpdateNotificationPreferences {
                event_updates: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let svc = NotificationService::new(&state);
        let results = svc
            .deliver(
                &[a.id.clone(), b.id.clone(), a.id.clone()],
                NotificationKind::EventUpdated,
                "Cup updated",
                "Start time moved",
                "/events/1",
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, vec![10]);
        assert_eq!(sent[0].1.target_url, "http://localhost:3000/events/1");

        let logs = NotificationLogRepository::recent_for_fid(&state.db, 10, Some("sent"), 10)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].notification_type, "event_updated");
    }

    #[tokio::test]
    async fn direct_notifier_disables_invalid_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notify"))
            .and(body_partial_json(serde_json::json!({"title": "Hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": {
                    "successfulTokens": ["tok-a"],
                    "invalidTokens": ["tok-b"],
                    "rateLimitedTokens": []
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let pool = test_pool().await;
        let url = format!("{}/notify", server.uri());
        NotificationTokenRepository::upsert_enabled(&pool, 1, &url, "tok-a")
            .await
            .unwrap();
        NotificationTokenRepository::upsert_enabled(&pool, 2, &url, "tok-b")
            .await
            .unwrap();

        let notifier = DirectNotifier::new(pool.clone()).unwrap();
        let n = OutgoingNotification::new(
            NotificationKind::ChatMessage,
            "Hello",
            "World",
            "https://app/chats/1".to_string(),
        );
        let results = notifier.send(&[1, 2, 3], &n).await;

        let status: HashMap<i64, DeliveryStatus> =
            results.iter().map(|r| (r.fid, r.status)).collect();
        assert_eq!(status[&1], DeliveryStatus::Sent);
        assert_eq!(status[&2], DeliveryStatus::Failed);
        assert_eq!(status[&3], DeliveryStatus::Skipped);

        let enabled = NotificationTokenRepository::enabled_for_fids(&pool, &[1, 2])
            .await
            .unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].fid, 1);
    }

    #[tokio::test]
    async fn neynar_notifier_marks_all_failed_on_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/farcaster/frame/notifications"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let notifier = NeynarNotifier::new(NeynarClient::new("key", &server.uri()).unwrap());
        let n = OutgoingNotification::new(
            NotificationKind::EventReminder,
            "Soon",
            "Starts in 1h",
            "https://app".to_string(),
        );
        let results = notifier.send(&[1, 2], &n).await;
        assert!(results.iter().all(|r| r.status == DeliveryStatus::Failed));
    }
}
