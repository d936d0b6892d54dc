use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Maximum fids per `user/bulk` request.
const BULK_USERS_CHUNK: usize = 100;

/// Thin client over the parts of the Neynar v2 API GameLink uses.
#[derive(Clone)]
pub struct NeynarClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NeynarUser {
    pub fid: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub pfp_url: Option<String>,
    #[serde(default)]
    pub profile: Option<NeynarUserProfile>,
}

impl NeynarUser {
    pub fn bio(&self) -> Option<String> {
        self.profile
            .as_ref()
            .and_then(|p| p.bio.as_ref())
            .and_then(|b| b.text.clone())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NeynarUserProfile {
    pub bio: Option<NeynarBio>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NeynarBio {
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulkUsersResponse {
    #[serde(default)]
    users: Vec<NeynarUser>,
}

#[derive(Debug, Deserialize)]
struct ReciprocalFollowersResponse {
    #[serde(default)]
    users: Vec<ReciprocalFollower>,
}

#[derive(Debug, Deserialize)]
struct ReciprocalFollower {
    user: NeynarUser,
}

/// Body of `POST /v2/farcaster/frame/notifications`.
#[derive(Debug, Serialize)]
pub struct FrameNotificationRequest<'a> {
    pub target_fids: &'a [i64],
    pub notification: FrameNotification<'a>,
}

#[derive(Debug, Serialize)]
pub struct FrameNotification<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub target_url: &'a str,
    pub uuid: &'a str,
}

#[derive(Debug, Default, Deserialize)]
pub struct FrameNotificationResponse {
    #[serde(default)]
    pub notification_deliveries: Vec<NotificationDelivery>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationDelivery {
    pub fid: i64,
    pub status: String,
}

impl NeynarClient {
    pub fn new(api_key: &str, base_url: &str) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(resp: reqwest::Response, what: &str) -> AppResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        tracing::warn!("Neynar {} failed: status={} body={}", what, status, body);
        Err(AppError::Neynar(format!("{what} failed with status {status}")))
    }

    /// Users for the given fids, fetched in chunks of 100.
    pub async fn fetch_users(&self, fids: &[i64]) -> AppResult<Vec<NeynarUser>> {
        let mut users = Vec::with_capacity(fids.len());
        for chunk in fids.chunks(BULK_USERS_CHUNK) {
            let ids = chunk
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let resp = self
                .http
                .get(self.url("/v2/farcaster/user/bulk"))
                .header("x-api-key", &self.api_key)
                .query(&[("fids", ids)])
                .send()
                .await?;
            let parsed: BulkUsersResponse = Self::check(resp, "user lookup").await?.json().await?;
            users.extend(parsed.users);
        }
        Ok(users)
    }

    pub async fn fetch_user(&self, fid: i64) -> AppResult<Option<NeynarUser>> {
        Ok(self.fetch_users(&[fid]).await?.into_iter().next())
    }

    /// Accounts that both follow and are followed by `fid`.
    pub async fn reciprocal_followers(&self, fid: i64, limit: u32) -> AppResult<Vec<NeynarUser>> {
        let resp = self
            .http
            .get(self.url("/v2/farcaster/followers/reciprocal"))
            .header("x-api-key", &self.api_key)
            .query(&[("fid", fid.to_string()), ("limit", limit.to_string())])
            .send()
            .await?;
        let parsed: ReciprocalFollowersResponse =
            Self::check(resp, "reciprocal followers").await?.json().await?;
        Ok(parsed.users.into_iter().map(|f| f.user).collect())
    }

    pub async fn publish_frame_notification(
        &self,
        request: &FrameNotificationRequest<'_>,
    ) -> AppResult<FrameNotificationResponse> {
        let resp = self
            .http
            .post(self.url("/v2/farcaster/frame/notifications"))
            .header("x-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;
        let resp = Self::check(resp, "notification publish").await?;
        // Delivery details are informational; an unexpected body is not a failure.
        Ok(resp.json().await.unwrap_or_default())
    }
}
