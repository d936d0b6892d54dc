use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Per-profile opt-in flags. A missing row means every category is enabled.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct NotificationPreferences {
    pub profile_id: String,
    pub enabled: bool,
    pub event_updates: bool,
    pub event_reminders: bool,
    pub participant_updates: bool,
    pub chat_messages: bool,
    pub group_activity: bool,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreferences {
    pub fn defaults_for(profile_id: &str) -> Self {
        Self {
            profile_id: profile_id.to_string(),
            enabled: true,
            event_updates: true,
            event_reminders: true,
            participant_updates: true,
            chat_messages: true,
            group_activity: true,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateNotificationPreferences {
    pub enabled: Option<bool>,
    pub event_updates: Option<bool>,
    pub event_reminders: Option<bool>,
    pub participant_updates: Option<bool>,
    pub chat_messages: Option<bool>,
    pub group_activity: Option<bool>,
}

/// A Mini App notification token issued by a Farcaster client.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationToken {
    pub id: String,
    pub fid: i64,
    pub url: String,
    pub token: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationLog {
    pub id: String,
    pub fid: i64,
    pub notification_type: String,
    pub provider: String,
    pub title: String,
    pub body: String,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateNotificationLog {
    pub fid: i64,
    pub notification_type: String,
    pub provider: String,
    pub title: String,
    pub body: String,
    pub status: String,
    pub error_message: Option<String>,
}
