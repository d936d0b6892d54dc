//! Shared fixtures for unit and router tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Duration;

use crate::config::Config;
use crate::db::test_pool;
use crate::services::auth::AuthService;
use crate::services::notifications::{
    DeliveryStatus, NotificationResult, Notifier, OutgoingNotification,
};
use crate::AppState;

pub const TEST_JWT_SECRET: &str = "test-jwt-secret";
pub const TEST_CRON_SECRET: &str = "test-cron-secret";

/// Notifier that records every send and reports success.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Vec<i64>, OutgoingNotification)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(Vec<i64>, OutgoingNotification)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn provider(&self) -> &'static str {
        "recording"
    }

    async fn send(
        &self,
        fids: &[i64],
        notification: &OutgoingNotification,
    ) -> Vec<NotificationResult> {
        self.sent
            .lock()
            .unwrap()
            .push((fids.to_vec(), notification.clone()));
        fids.iter()
            .map(|fid| NotificationResult {
                fid: *fid,
                status: DeliveryStatus::Sent,
                error: None,
            })
            .collect()
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.jwt.secret = TEST_JWT_SECRET.to_string();
    config.admin.cron_secret = Some(TEST_CRON_SECRET.to_string());
    config.lifecycle.scheduler_interval_seconds = 0;
    config
}

pub async fn test_state_with(notifier: Arc<dyn Notifier>) -> Arc<AppState> {
    Arc::new(AppState {
        db: test_pool().await,
        config: test_config(),
        neynar: None,
        notifier,
    })
}

pub async fn test_state() -> Arc<AppState> {
    test_state_with(Arc::new(RecordingNotifier::default())).await
}

/// `Authorization` header value for `fid`.
pub fn bearer(fid: i64) -> String {
    let token = AuthService::create_jwt(TEST_JWT_SECRET, fid, Duration::hours(1))
        .expect("test token");
    format!("Bearer {token}")
}
