use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::db::{
    CreateEvent, Event, EventRepository, EventStatus, ParticipantRepository, ParticipantStatus,
    UpdateEvent,
};
use crate::error::{AppError, AppResult};
use crate::services::auth::AuthService;
use crate::services::lifecycle::{validate_event_status_transition, TransitionInput};
use crate::services::notifications::{NotificationKind, NotificationService};
use crate::AppState;

/// Registrations that should hear about changes to the event.
const NOTIFIED_STATUSES: [ParticipantStatus; 4] = [
    ParticipantStatus::PendingApproval,
    ParticipantStatus::Registered,
    ParticipantStatus::Confirmed,
    ParticipantStatus::Attended,
];

pub struct EventService;

/// Field-level invariants of an event schedule and capacity.
pub fn validate_schedule(
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    registration_deadline: Option<DateTime<Utc>>,
    min_participants: Option<i64>,
    max_participants: Option<i64>,
) -> AppResult<()> {
    if end_time.is_some_and(|end| end <= start_time) {
        return Err(AppError::BadRequest(
            "end_time must be after start_time".to_string(),
        ));
    }
    if registration_deadline.is_some_and(|d| d > start_time) {
        return Err(AppError::BadRequest(
            "registration_deadline must not be after start_time".to_string(),
        ));
    }
    if min_participants.is_some_and(|m| m < 1) || max_participants.is_some_and(|m| m < 1) {
        return Err(AppError::BadRequest(
            "participant limits must be at least 1".to_string(),
        ));
    }
    if let (Some(min), Some(max)) = (min_participants, max_participants) {
        if min > max {
            return Err(AppError::BadRequest(
                "min_participants cannot exceed max_participants".to_string(),
            ));
        }
    }
    Ok(())
}

async fn recipients(pool: &SqlitePool, event: &Event) -> AppResult<Vec<String>> {
    let ids = ParticipantRepository::user_ids_with_status(pool, &event.id, &NOTIFIED_STATUSES).await?;
    Ok(ids.into_iter().filter(|id| *id != event.created_by).collect())
}

impl EventService {
    pub async fn create(state: &Arc<AppState>, fid: i64, event: CreateEvent) -> AppResult<Event> {
        let profile = AuthService::require_profile(state, fid).await?;

        validate_schedule(
            event.start_time,
            event.end_time,
            event.registration_deadline,
            event.min_participants,
            event.max_participants,
        )?;
        match event.status {
            EventStatus::Draft => {}
            EventStatus::Upcoming if event.start_time > Utc::now() => {}
            EventStatus::Upcoming => {
                return Err(AppError::BadRequest(
                    "start_time must be in the future".to_string(),
                ))
            }
            other => {
                return Err(AppError::BadRequest(format!(
                    "Events cannot be created as {other}"
                )))
            }
        }

        let created = EventRepository::create_with_organizer(&state.db, &profile.id, event).await?;
        tracing::info!("Profile {} created event {} ({})", profile.id, created.id, created.status);
        Ok(created)
    }

    /// Load the event and check the caller organizes it.
    async fn load_owned(state: &Arc<AppState>, fid: i64, event_id: &str) -> AppResult<Event> {
        let profile = AuthService::require_profile(state, fid).await?;
        let event = EventRepository::find_by_id(&state.db, event_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;
        if !event.is_organizer(&profile.id) {
            return Err(AppError::Forbidden);
        }
        Ok(event)
    }

    pub async fn update(
        state: &Arc<AppState>,
        fid: i64,
        event_id: &str,
        update: UpdateEvent,
    ) -> AppResult<Event> {
        let event = Self::load_owned(state, fid, event_id).await?;
        if event.status.is_terminal() {
            return Err(AppError::BadRequest(format!(
                "Cannot edit a {} event",
                event.status
            )));
        }

        validate_schedule(
            update.start_time.unwrap_or(event.start_time),
            update.end_time.or(event.end_time),
            update.registration_deadline.or(event.registration_deadline),
            update.min_participants.or(event.min_participants),
            update.max_participants.or(event.max_participants),
        )?;
        if let Some(max) = update.max_participants {
            let taken = ParticipantRepository::count_seats_taken(&state.db, &event.id).await?;
            if max < taken {
                return Err(AppError::BadRequest(format!(
                    "max_participants cannot be below the {taken} current participants"
                )));
            }
        }

        let schedule_changed = update.start_time.is_some() || update.end_time.is_some();
        let updated = EventRepository::update(&state.db, &event.id, update).await?;

        if schedule_changed && updated.status != EventStatus::Draft {
            let to = recipients(&state.db, &updated).await?;
            NotificationService::dispatch(
                state,
                to,
                NotificationKind::EventUpdated,
                updated.title.clone(),
                format!("Schedule changed: now starts {}", updated.start_time.format("%b %d %H:%M UTC")),
                format!("/events/{}", updated.id),
            );
        }
        Ok(updated)
    }

    /// Organizer-requested status change.
    pub async fn change_status(
        state: &Arc<AppState>,
        fid: i64,
        event_id: &str,
        new: EventStatus,
    ) -> AppResult<Event> {
        let event = Self::load_owned(state, fid, event_id).await?;
        Self::apply_transition(state, &event, new, Utc::now()).await
    }

    /// Validate and persist `event.status → new`, notifying registrants.
    pub async fn apply_transition(
        state: &Arc<AppState>,
        event: &Event,
        new: EventStatus,
        now: DateTime<Utc>,
    ) -> AppResult<Event> {
        let count = ParticipantRepository::count_admitted(&state.db, &event.id).await?;
        let check = validate_event_status_transition(
            &TransitionInput::for_event(event, new, count),
            now,
            Duration::minutes(state.config.lifecycle.live_window_minutes),
        );
        if !check.is_valid {
            return Err(AppError::BadRequest(
                check.error.unwrap_or_else(|| "Invalid status transition".to_string()),
            ));
        }

        let updated = EventRepository::update_status(&state.db, &event.id, event.status, new)
            .await?
            .ok_or_else(|| {
                AppError::Conflict("Event status was changed by another request".to_string())
            })?;

        tracing::info!("Event {} moved {} -> {}", event.id, event.status, new);

        if event.status != EventStatus::Draft {
            let body = match new {
                EventStatus::Live => "The event is live now!".to_string(),
                EventStatus::Completed => "The event has finished. GG!".to_string(),
                EventStatus::Cancelled => "The event was cancelled".to_string(),
                other => format!("The event is now {other}"),
            };
            let to = recipients(&state.db, &updated).await?;
            NotificationService::dispatch(
                state,
                to,
                NotificationKind::EventStatusChanged,
                updated.title.clone(),
                body,
                format!("/events/{}", updated.id),
            );
        }

        Ok(updated)
    }

    /// Claim the event's reminder and, if this call won it, remind registrants.
    /// Returns whether a reminder went out.
    pub async fn send_reminder(
        state: &Arc<AppState>,
        event: &Event,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        if !EventRepository::claim_reminder(&state.db, &event.id, now).await? {
            return Ok(false);
        }
        let mut to = recipients(&state.db, event).await?;
        to.push(event.created_by.clone());
        let minutes = (event.start_time - now).num_minutes().max(0);
        NotificationService::new(state)
            .deliver(
                &to,
                NotificationKind::EventReminder,
                &event.title,
                &format!("Starts in {minutes} minutes"),
                &format!("/events/{}", event.id),
            )
            .await?;
        Ok(true)
    }
}
