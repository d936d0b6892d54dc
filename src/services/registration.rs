//! Joining, leaving and organizer moderation of event registrations.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::db::{
    ChatRepository, ChatRole, Event, EventParticipant, EventRepository, EventStatus,
    ParticipantRepository, ParticipantResultUpdate, ParticipantRole, ParticipantStatus, Profile,
};
use crate::error::{AppError, AppResult};
use crate::services::auth::AuthService;
use crate::services::notifications::{NotificationKind, NotificationService};
use crate::AppState;

pub const EVENT_FULL: &str = "Event is full";
pub const ALREADY_REGISTERED: &str = "You are already registered for this event";
pub const SPECTATORS_NOT_ALLOWED: &str = "This event does not allow spectators";
pub const ORGANIZER_CANNOT_LEAVE: &str = "Organizers cannot leave their own event";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantAction {
    Approve,
    Reject,
    MarkAttended,
    MarkNoShow,
}

/// Organizer-side change to one registration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParticipantUpdate {
    pub action: Option<ParticipantAction>,
    pub score: Option<f64>,
    pub placement: Option<i64>,
}

pub struct RegistrationService;

async fn load_event(pool: &SqlitePool, event_id: &str) -> AppResult<Event> {
    EventRepository::find_by_id(pool, event_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))
}

fn already_registered(e: AppError) -> AppError {
    if e.is_unique_violation() {
        AppError::BadRequest(ALREADY_REGISTERED.to_string())
    } else {
        e
    }
}

impl RegistrationService {
    /// Register the caller for an event as participant or spectator.
    pub async fn join(
        state: &Arc<AppState>,
        fid: i64,
        event_id: &str,
        role: ParticipantRole,
    ) -> AppResult<EventParticipant> {
        let profile = AuthService::require_profile(state, fid).await?;
        let event = load_event(&state.db, event_id).await?;

        if !event.status.accepts_registrations() {
            return Err(AppError::BadRequest(format!(
                "Cannot join an event that is {}",
                event.status
            )));
        }
        if role == ParticipantRole::Participant && event.registration_closed(Utc::now()) {
            return Err(AppError::BadRequest(
                "Registration deadline has passed".to_string(),
            ));
        }
        if ParticipantRepository::find_active(&state.db, &event.id, &profile.id)
            .await?
            .is_some()
        {
            return Err(AppError::BadRequest(ALREADY_REGISTERED.to_string()));
        }

        let status = if event.require_approval {
            ParticipantStatus::PendingApproval
        } else {
            ParticipantStatus::Confirmed
        };

        let row = match role {
            ParticipantRole::Organizer => {
                return Err(AppError::BadRequest(
                    "Cannot join an event as organizer".to_string(),
                ));
            }
            ParticipantRole::Spectator => {
                if !event.allow_spectators {
                    return Err(AppError::BadRequest(SPECTATORS_NOT_ALLOWED.to_string()));
                }
                ParticipantRepository::insert(&state.db, &event.id, &profile.id, role, status)
                    .await
                    .map_err(already_registered)?
            }
            ParticipantRole::Participant => match event.max_participants {
                Some(max) => ParticipantRepository::insert_if_capacity(
                    &state.db,
                    &event.id,
                    &profile.id,
                    status,
                    max,
                )
                .await
                .map_err(already_registered)?
                .ok_or_else(|| AppError::BadRequest(EVENT_FULL.to_string()))?,
                None => {
                    ParticipantRepository::insert(&state.db, &event.id, &profile.id, role, status)
                        .await
                        .map_err(already_registered)?
                }
            },
        };

        tracing::info!(
            "Profile {} joined event {} as {} ({})",
            profile.id,
            event.id,
            row.role.as_str(),
            row.status.as_str()
        );

        if row.status == ParticipantStatus::Confirmed {
            Self::join_event_chat(&state.db, &event, &profile.id).await;
        }

        let verb = if row.status == ParticipantStatus::PendingApproval {
            "requested to join"
        } else {
            "joined"
        };
        NotificationService::dispatch(
            state,
            vec![event.created_by.clone()],
            NotificationKind::ParticipantJoined,
            event.title.clone(),
            format!("{} {} as {}", profile.handle(), verb, row.role.as_str()),
            format!("/events/{}", event.id),
        );

        Ok(row)
    }

    /// Cancel the caller's own registration.
    pub async fn leave(
        state: &Arc<AppState>,
        fid: i64,
        event_id: &str,
    ) -> AppResult<EventParticipant> {
        let profile = AuthService::require_profile(state, fid).await?;
        let event = load_event(&state.db, event_id).await?;

        if event.is_organizer(&profile.id) {
            return Err(AppError::BadRequest(ORGANIZER_CANNOT_LEAVE.to_string()));
        }

        let row = ParticipantRepository::find_active(&state.db, &event.id, &profile.id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound("You are not registered for this event".to_string())
            })?;
        if row.role == ParticipantRole::Organizer {
            return Err(AppError::BadRequest(ORGANIZER_CANNOT_LEAVE.to_string()));
        }

        let cancelled =
            ParticipantRepository::set_status(&state.db, &row.id, ParticipantStatus::Cancelled)
                .await?;

        if let Some(chat_id) = &event.chat_id {
            if let Err(e) = ChatRepository::leave(&state.db, chat_id, &profile.id).await {
                tracing::warn!("Failed to remove {} from event chat: {:?}", profile.id, e);
            }
        }

        tracing::info!("Profile {} left event {}", profile.id, event.id);
        Ok(cancelled)
    }

    /// Approve, reject, record attendance or results for one registration.
    pub async fn update_participant(
        state: &Arc<AppState>,
        fid: i64,
        event_id: &str,
        participant_id: &str,
        update: ParticipantUpdate,
    ) -> AppResult<EventParticipant> {
        let profile = AuthService::require_profile(state, fid).await?;
        let event = load_event(&state.db, event_id).await?;
        if !event.is_organizer(&profile.id) {
            return Err(AppError::Forbidden);
        }

        let row = ParticipantRepository::find_by_id(&state.db, participant_id)
            .await?
            .filter(|p| p.event_id == event.id)
            .ok_or_else(|| AppError::NotFound("Participant not found".to_string()))?;
        if row.status == ParticipantStatus::Cancelled {
            return Err(AppError::BadRequest(
                "This registration was cancelled".to_string(),
            ));
        }
        if update.placement.is_some_and(|p| p < 1) {
            return Err(AppError::BadRequest(
                "placement must be at least 1".to_string(),
            ));
        }

        let mut updated = row.clone();
        match update.action {
            Some(ParticipantAction::Approve) => {
                updated = Self::approve(&state.db, &event, &row).await?;
                Self::join_event_chat(&state.db, &event, &row.user_id).await;
            }
            Some(ParticipantAction::Reject) => {
                if row.status != ParticipantStatus::PendingApproval {
                    return Err(AppError::BadRequest(
                        "Participant is not pending approval".to_string(),
                    ));
                }
                updated = ParticipantRepository::set_status(
                    &state.db,
                    &row.id,
                    ParticipantStatus::Cancelled,
                )
                .await?;
            }
            Some(action @ (ParticipantAction::MarkAttended | ParticipantAction::MarkNoShow)) => {
                if !matches!(event.status, EventStatus::Live | EventStatus::Completed) {
                    return Err(AppError::BadRequest(
                        "Attendance can only be recorded once the event is live".to_string(),
                    ));
                }
                if row.status == ParticipantStatus::PendingApproval {
                    return Err(AppError::BadRequest(
                        "Participant is still pending approval".to_string(),
                    ));
                }
                let status = if action == ParticipantAction::MarkAttended {
                    ParticipantStatus::Attended
                } else {
                    ParticipantStatus::NoShow
                };
                updated = ParticipantRepository::set_status(&state.db, &row.id, status).await?;
            }
            None => {}
        }

        if update.score.is_some() || update.placement.is_some() {
            updated = ParticipantRepository::update_result(
                &state.db,
                &row.id,
                ParticipantResultUpdate {
                    status: None,
                    score: update.score,
                    placement: update.placement,
                },
            )
            .await?;
        }

        if updated.status != row.status {
            NotificationService::dispatch(
                state,
                vec![row.user_id.clone()],
                NotificationKind::ParticipantStatusChanged,
                event.title.clone(),
                format!("Your registration is now {}", updated.status.as_str().replace('_', " ")),
                format!("/events/{}", event.id),
            );
        }

        Ok(updated)
    }

    async fn approve(
        pool: &SqlitePool,
        event: &Event,
        row: &EventParticipant,
    ) -> AppResult<EventParticipant> {
        if row.status != ParticipantStatus::PendingApproval {
            return Err(AppError::BadRequest(
                "Participant is not pending approval".to_string(),
            ));
        }
        match (row.role, event.max_participants) {
            (ParticipantRole::Participant, Some(max)) => {
                ParticipantRepository::confirm_if_capacity(pool, &row.id, &event.id, max)
                    .await?
                    .ok_or_else(|| AppError::BadRequest(EVENT_FULL.to_string()))
            }
            _ => ParticipantRepository::set_status(pool, &row.id, ParticipantStatus::Confirmed).await,
        }
    }

    async fn join_event_chat(pool: &SqlitePool, event: &Event, profile_id: &str) {
        let Some(chat_id) = &event.chat_id else {
            return;
        };
        if let Err(e) = ChatRepository::join(pool, chat_id, profile_id, ChatRole::Member).await {
            tracing::warn!("Failed to add {} to event chat {}: {:?}", profile_id, chat_id, e);
        }
    }

    /// Back-fill organizer rows for events created before they were written
    /// transactionally. Returns the number of events repaired.
    pub async fn repair_missing_organizers(pool: &SqlitePool) -> AppResult<u64> {
        let missing = EventRepository::find_missing_organizer_rows(pool).await?;
        let mut repaired = 0;
        for (event_id, created_by) in missing {
            if ParticipantRepository::ensure_organizer(pool, &event_id, &created_by).await? {
                repaired += 1;
            }
        }
        if repaired > 0 {
            tracing::info!("Repaired organizer rows for {} event(s)", repaired);
        }
        Ok(repaired)
    }
}

/// Whether `profile` may see the participants and chat of `event`.
pub async fn is_event_member(pool: &SqlitePool, event: &Event, profile: &Profile) -> AppResult<bool> {
    if event.is_organizer(&profile.id) {
        return Ok(true);
    }
    Ok(ParticipantRepository::find_active(pool, &event.id, &profile.id)
        .await?
        .is_some_and(|p| p.status.is_admitted()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::event::tests::{profile, sample_event};
    use crate::test_support::test_state;

    async fn event_with(
        state: &Arc<AppState>,
        configure: impl FnOnce(&mut crate::db::CreateEvent),
    ) -> (Profile, Event) {
        let org = profile(&state.db, 1).await;
        let mut ev = sample_event("Cup", 24);
        configure(&mut ev);
        let event = EventRepository::create_with_organizer(&state.db, &org.id, ev)
            .await
            .unwrap();
        (org, event)
    }

    fn bad_request(err: AppError) -> String {
        match err {
            AppError::BadRequest(msg) => msg,
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn join_at_max_minus_one_succeeds_and_at_max_fails() {
        let state = test_state().await;
        let (_, event) = event_with(&state, |e| e.max_participants = Some(2)).await;
        for fid in [10, 11, 12] {
            profile(&state.db, fid).await;
        }

        RegistrationService::join(&state, 10, &event.id, ParticipantRole::Participant)
            .await
            .unwrap();
        let second = RegistrationService::join(&state, 11, &event.id, ParticipantRole::Participant)
            .await
            .unwrap();
        assert_eq!(second.status, ParticipantStatus::Confirmed);

        let err = RegistrationService::join(&state, 12, &event.id, ParticipantRole::Participant)
            .await
            .unwrap_err();
        assert_eq!(bad_request(err), EVENT_FULL);
    }

    #[tokio::test]
    async fn organizer_does_not_take_a_seat() {
        let state = test_state().await;
        let (_, event) = event_with(&state, |e| e.max_participants = Some(1)).await;
        profile(&state.db, 10).await;

        RegistrationService::join(&state, 10, &event.id, ParticipantRole::Participant)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn spectators_rejected_regardless_of_capacity() {
        let state = test_state().await;
        let (_, event) = event_with(&state, |e| {
            e.allow_spectators = false;
            e.max_participants = None;
        })
        .await;
        profile(&state.db, 10).await;

        for _ in 0..2 {
            let err = RegistrationService::join(&state, 10, &event.id, ParticipantRole::Spectator)
                .await
                .unwrap_err();
            assert_eq!(bad_request(err), SPECTATORS_NOT_ALLOWED);
        }
    }

    #[tokio::test]
    async fn spectators_do_not_count_toward_capacity() {
        let state = test_state().await;
        let (_, event) = event_with(&state, |e| e.max_participants = Some(1)).await;
        profile(&state.db, 10).await;
        profile(&state.db, 11).await;

        RegistrationService::join(&state, 10, &event.id, ParticipantRole::Spectator)
            .await
            .unwrap();
        RegistrationService::join(&state, 11, &event.id, ParticipantRole::Participant)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_join_is_rejected_every_time() {
        let state = test_state().await;
        let (_, event) = event_with(&state, |_| {}).await;
        profile(&state.db, 10).await;

        RegistrationService::join(&state, 10, &event.id, ParticipantRole::Participant)
            .await
            .unwrap();
        for role in [ParticipantRole::Participant, ParticipantRole::Spectator, ParticipantRole::Participant] {
            let err = RegistrationService::join(&state, 10, &event.id, role)
                .await
                .unwrap_err();
            assert_eq!(bad_request(err), ALREADY_REGISTERED);
        }
    }

    #[tokio::test]
    async fn organizer_cannot_join_or_leave() {
        let state = test_state().await;
        let (_, event) = event_with(&state, |_| {}).await;

        let err = RegistrationService::join(&state, 1, &event.id, ParticipantRole::Participant)
            .await
            .unwrap_err();
        assert_eq!(bad_request(err), ALREADY_REGISTERED);

        let err = RegistrationService::leave(&state, 1, &event.id).await.unwrap_err();
        assert_eq!(bad_request(err), ORGANIZER_CANNOT_LEAVE);
    }

    #[tokio::test]
    async fn approval_flow_and_rejoin_after_leave() {
        let state = test_state().await;
        let (_, event) = event_with(&state, |e| e.require_approval = true).await;
        profile(&state.db, 10).await;

        let pending = RegistrationService::join(&state, 10, &event.id, ParticipantRole::Participant)
            .await
            .unwrap();
        assert_eq!(pending.status, ParticipantStatus::PendingApproval);

        let approved = RegistrationService::update_participant(
            &state,
            1,
            &event.id,
            &pending.id,
            ParticipantUpdate {
                action: Some(ParticipantAction::Approve),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(approved.status, ParticipantStatus::Confirmed);
        let chat_id = event.chat_id.clone().unwrap();
        let member = profile_id(&state.db, 10).await;
        assert!(ChatRepository::is_active_member(&state.db, &chat_id, &member).await.unwrap());

        let left = RegistrationService::leave(&state, 10, &event.id).await.unwrap();
        assert_eq!(left.status, ParticipantStatus::Cancelled);
        assert!(!ChatRepository::is_active_member(&state.db, &chat_id, &member).await.unwrap());

        let again = RegistrationService::join(&state, 10, &event.id, ParticipantRole::Participant)
            .await
            .unwrap();
        assert_eq!(again.status, ParticipantStatus::PendingApproval);
    }

    #[tokio::test]
    async fn only_the_organizer_can_moderate() {
        let state = test_state().await;
        let (_, event) = event_with(&state, |e| e.require_approval = true).await;
        profile(&state.db, 10).await;
        profile(&state.db, 11).await;
        let row = RegistrationService::join(&state, 10, &event.id, ParticipantRole::Participant)
            .await
            .unwrap();

        let err = RegistrationService::update_participant(
            &state,
            11,
            &event.id,
            &row.id,
            ParticipantUpdate {
                action: Some(ParticipantAction::Approve),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }

    #[tokio::test]
    async fn results_require_a_live_event() {
        let state = test_state().await;
        let (_, event) = event_with(&state, |_| {}).await;
        profile(&state.db, 10).await;
        let row = RegistrationService::join(&state, 10, &event.id, ParticipantRole::Participant)
            .await
            .unwrap();

        let update = ParticipantUpdate {
            action: Some(ParticipantAction::MarkAttended),
            score: Some(120.0),
            placement: Some(1),
        };
        let err = RegistrationService::update_participant(&state, 1, &event.id, &row.id, update.clone())
            .await
            .unwrap_err();
        bad_request(err);

        EventRepository::update_status(&state.db, &event.id, EventStatus::Upcoming, EventStatus::Live)
            .await
            .unwrap();
        let done = RegistrationService::update_participant(&state, 1, &event.id, &row.id, update)
            .await
            .unwrap();
        assert_eq!(done.status, ParticipantStatus::Attended);
        assert_eq!(done.placement, Some(1));
        assert_eq!(done.score, Some(120.0));
    }

    #[tokio::test]
    async fn repair_backfills_missing_organizer_rows_once() {
        let state = test_state().await;
        let (org, event) = event_with(&state, |_| {}).await;
        sqlx::query("DELETE FROM event_participants WHERE event_id = ? AND user_id = ?")
            .bind(&event.id)
            .bind(&org.id)
            .execute(&state.db)
            .await
            .unwrap();

        assert_eq!(RegistrationService::repair_missing_organizers(&state.db).await.unwrap(), 1);
        assert_eq!(RegistrationService::repair_missing_organizers(&state.db).await.unwrap(), 0);
        let row = ParticipantRepository::find_active(&state.db, &event.id, &org.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.role, ParticipantRole::Organizer);
    }

    #[tokio::test]
    async fn unknown_profile_or_event_is_not_found() {
        let state = test_state().await;
        let (_, event) = event_with(&state, |_| {}).await;

        let err = RegistrationService::join(&state, 999, &event.id, ParticipantRole::Participant)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref m) if m == "Profile not found"));

        let err = RegistrationService::join(&state, 1, "missing", ParticipantRole::Participant)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref m) if m == "Event not found"));
    }

    async fn profile_id(pool: &SqlitePool, fid: i64) -> String {
        crate::db::ProfileRepository::find_by_fid(pool, fid)
            .await
            .unwrap()
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn joins_are_refused_unless_upcoming_or_live() {
        let state = test_state().await;
        let (org, draft) = event_with(&state, |e| e.status = EventStatus::Draft).await;
        let done = EventRepository::create_with_organizer(&state.db, &org.id, sample_event("Done", 24))
            .await
            .unwrap();
        for (from, to) in [
            (EventStatus::Upcoming, EventStatus::Live),
            (EventStatus::Live, EventStatus::Completed),
        ] {
            EventRepository::update_status(&state.db, &done.id, from, to)
                .await
                .unwrap()
                .unwrap();
        }
        let called_off = EventRepository::create_with_organizer(&state.db, &org.id, sample_event("Off", 24))
            .await
            .unwrap();
        EventRepository::update_status(
            &state.db,
            &called_off.id,
            EventStatus::Upcoming,
            EventStatus::Cancelled,
        )
        .await
        .unwrap()
        .unwrap();
        profile(&state.db, 10).await;

        for (event, status) in [(&draft, "draft"), (&done, "completed"), (&called_off, "cancelled")] {
            let err = RegistrationService::join(&state, 10, &event.id, ParticipantRole::Participant)
                .await
                .unwrap_err();
            assert_eq!(bad_request(err), format!("Cannot join an event that is {status}"));
        }
    }

    #[tokio::test]
    async fn deadline_closes_participant_registration_only() {
        let state = test_state().await;
        let (_, event) = event_with(&state, |e| {
            e.registration_deadline = Some(Utc::now() - chrono::Duration::hours(1));
        })
        .await;
        profile(&state.db, 10).await;
        profile(&state.db, 11).await;

        let err = RegistrationService::join(&state, 10, &event.id, ParticipantRole::Participant)
            .await
            .unwrap_err();
        assert_eq!(bad_request(err), "Registration deadline has passed");

        let watcher = RegistrationService::join(&state, 11, &event.id, ParticipantRole::Spectator)
            .await
            .unwrap();
        assert_eq!(watcher.role, ParticipantRole::Spectator);
    }
}
