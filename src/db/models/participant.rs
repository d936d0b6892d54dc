use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ParticipantRole {
    Organizer,
    Participant,
    Spectator,
}

impl ParticipantRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ParticipantRole::Organizer => "organizer",
            ParticipantRole::Participant => "participant",
            ParticipantRole::Spectator => "spectator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ParticipantStatus {
    PendingApproval,
    Registered,
    Confirmed,
    Attended,
    NoShow,
    Cancelled,
}

impl ParticipantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ParticipantStatus::PendingApproval => "pending_approval",
            ParticipantStatus::Registered => "registered",
            ParticipantStatus::Confirmed => "confirmed",
            ParticipantStatus::Attended => "attended",
            ParticipantStatus::NoShow => "no_show",
            ParticipantStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses that occupy a seat for capacity purposes.
    pub fn holds_seat(self) -> bool {
        !matches!(self, ParticipantStatus::Cancelled | ParticipantStatus::NoShow)
    }

    /// Statuses that grant access to the event chat.
    pub fn is_admitted(self) -> bool {
        matches!(
            self,
            ParticipantStatus::Registered
                | ParticipantStatus::Confirmed
                | ParticipantStatus::Attended
        )
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EventParticipant {
    pub id: String,
    pub event_id: String,
    pub user_id: String,
    pub role: ParticipantRole,
    pub status: ParticipantStatus,
    pub score: Option<f64>,
    pub placement: Option<i64>,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Participant row joined with the profile it belongs to.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ParticipantWithProfile {
    pub id: String,
    pub event_id: String,
    pub user_id: String,
    pub role: ParticipantRole,
    pub status: ParticipantStatus,
    pub score: Option<f64>,
    pub placement: Option<i64>,
    pub joined_at: DateTime<Utc>,
    pub fid: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub pfp_url: Option<String>,
}

/// Participation row joined with the event's game/status, used for statistics.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ParticipationRecord {
    pub event_id: String,
    pub role: ParticipantRole,
    pub status: ParticipantStatus,
    pub score: Option<f64>,
    pub placement: Option<i64>,
    pub event_status: crate::db::EventStatus,
    pub game: Option<String>,
}

/// Organizer-side changes to a participant row.
#[derive(Debug, Clone, Default)]
pub struct ParticipantResultUpdate {
    pub status: Option<ParticipantStatus>,
    pub score: Option<f64>,
    pub placement: Option<i64>,
}
