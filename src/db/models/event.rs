use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::AppError;

/// Lifecycle of an event: draft -> upcoming -> live -> completed, with
/// cancellation possible from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Upcoming,
    Live,
    Completed,
    Cancelled,
}

impl EventStatus {
    pub const ALL: [EventStatus; 5] = [
        EventStatus::Draft,
        EventStatus::Upcoming,
        EventStatus::Live,
        EventStatus::Completed,
        EventStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Draft => "draft",
            EventStatus::Upcoming => "upcoming",
            EventStatus::Live => "live",
            EventStatus::Completed => "completed",
            EventStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::Cancelled)
    }

    /// Whether join requests are accepted in this status.
    pub fn accepts_registrations(self) -> bool {
        matches!(self, EventStatus::Upcoming | EventStatus::Live)
    }
}

impl FromStr for EventStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == wanted)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown status: {s}")))
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum EventType {
    #[default]
    Casual,
    Tournament,
    Practice,
    Stream,
    Other,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub game: Option<String>,
    pub platform: Option<String>,
    pub event_type: EventType,
    pub location: Option<String>,
    pub created_by: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub registration_deadline: Option<DateTime<Utc>>,
    pub min_participants: Option<i64>,
    pub max_participants: Option<i64>,
    pub status: EventStatus,
    pub require_approval: bool,
    pub allow_spectators: bool,
    pub is_private: bool,
    pub chat_id: Option<String>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_organizer(&self, profile_id: &str) -> bool {
        self.created_by == profile_id
    }

    pub fn registration_closed(&self, now: DateTime<Utc>) -> bool {
        self.registration_deadline.map(|d| now > d).unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct CreateEvent {
    pub title: String,
    pub description: Option<String>,
    pub game: Option<String>,
    pub platform: Option<String>,
    pub event_type: EventType,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub registration_deadline: Option<DateTime<Utc>>,
    pub min_participants: Option<i64>,
    pub max_participants: Option<i64>,
    pub status: EventStatus,
    pub require_approval: bool,
    pub allow_spectators: bool,
    pub is_private: bool,
}

/// Partial update; `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdateEvent {
    pub title: Option<String>,
    pub description: Option<String>,
    pub game: Option<String>,
    pub platform: Option<String>,
    pub event_type: Option<EventType>,
    pub location: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub registration_deadline: Option<DateTime<Utc>>,
    pub min_participants: Option<i64>,
    pub max_participants: Option<i64>,
    pub require_approval: Option<bool>,
    pub allow_spectators: Option<bool>,
    pub is_private: Option<bool>,
}

/// Listing filters for public events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub status: Option<EventStatus>,
    pub game: Option<String>,
    pub limit: i64,
    pub offset: i64,
}
