use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::{EventRepository, EventStatus, ParticipantRepository};
use crate::error::AppResult;
use crate::services::events::EventService;
use crate::AppState;

/// What one scheduler pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub started: u32,
    pub completed: u32,
    pub cancelled: u32,
    pub reminders_sent: u32,
}

pub struct SchedulerService;

impl SchedulerService {
    /// Advance events whose start or end time has passed and send due reminders.
    /// A failure on one event is logged and does not stop the pass.
    pub async fn tick(state: &Arc<AppState>, now: DateTime<Utc>) -> AppResult<TickSummary> {
        let mut summary = TickSummary::default();
        let reminder_lead = Duration::minutes(state.config.lifecycle.reminder_lead_minutes);

        let events =
            EventRepository::list_by_statuses(&state.db, &[EventStatus::Upcoming, EventStatus::Live])
                .await?;

        for event in events {
            match event.status {
                EventStatus::Upcoming if event.start_time <= now => {
                    let admitted = match ParticipantRepository::count_admitted(&state.db, &event.id).await {
                        Ok(n) => n,
                        Err(e) => {
                            tracing::warn!("Scheduler could not count participants of {}: {:?}", event.id, e);
                            continue;
                        }
                    };
                    let (target, counter) = match event.min_participants {
                        Some(min) if admitted < min => (EventStatus::Cancelled, &mut summary.cancelled),
                        _ => (EventStatus::Live, &mut summary.started),
                    };
                    match EventService::apply_transition(state, &event, target, now).await {
                        Ok(_) => *counter += 1,
                        Err(e) => {
                            tracing::warn!("Scheduler could not move event {} to {}: {:?}", event.id, target, e);
                            // Past its end already: it can no longer go live.
                            if target == EventStatus::Live
                                && EventService::apply_transition(state, &event, EventStatus::Cancelled, now)
                                    .await
                                    .is_ok()
                            {
                                summary.cancelled += 1;
                            }
                        }
                    }
                }
                EventStatus::Upcoming
                    if event.reminder_sent_at.is_none() && event.start_time - reminder_lead <= now =>
                {
                    match EventService::send_reminder(state, &event, now).await {
                        Ok(true) => summary.reminders_sent += 1,
                        Ok(false) => {}
                        Err(e) => tracing::warn!("Reminder for event {} failed: {:?}", event.id, e),
                    }
                }
                EventStatus::Live if event.end_time.is_some_and(|end| end <= now) => {
                    match EventService::apply_transition(state, &event, EventStatus::Completed, now).await {
                        Ok(_) => summary.completed += 1,
                        Err(e) => {
                            tracing::info!("Event {} cannot complete ({:?}); cancelling", event.id, e);
                            match EventService::apply_transition(state, &event, EventStatus::Cancelled, now)
                                .await
                            {
                                Ok(_) => summary.cancelled += 1,
                                Err(e) => tracing::warn!("Failed to cancel event {}: {:?}", event.id, e),
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        if summary != TickSummary::default() {
            tracing::info!(
                "Scheduler tick: started={} completed={} cancelled={} reminders={}",
                summary.started,
                summary.completed,
                summary.cancelled,
                summary.reminders_sent
            );
        }
        Ok(summary)
    }
}
