//! Event status transitions.
//!
//! `draft → upcoming → live → completed`, with `cancelled` reachable from any
//! non-terminal status. Time and participant-count rules are applied on top of
//! the edge table.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::{Event, EventStatus};

/// Inputs of a single transition check.
#[derive(Debug, Clone)]
pub struct TransitionInput {
    pub current: EventStatus,
    pub new: EventStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub min_participants: Option<i64>,
    pub participant_count: i64,
}

impl TransitionInput {
    pub fn for_event(event: &Event, new: EventStatus, participant_count: i64) -> Self {
        Self {
            current: event.status,
            new,
            start_time: event.start_time,
            end_time: event.end_time,
            min_participants: event.min_participants,
            participant_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionCheck {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl TransitionCheck {
    fn ok() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    fn reject(msg: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(msg.into()),
        }
    }
}

fn edge_allowed(from: EventStatus, to: EventStatus) -> bool {
    use EventStatus::*;
    matches!(
        (from, to),
        (Draft, Upcoming)
            | (Draft, Cancelled)
            | (Upcoming, Live)
            | (Upcoming, Cancelled)
            | (Live, Completed)
            | (Live, Cancelled)
    )
}

/// Decide whether `input.current → input.new` is permitted at `now`.
///
/// `live_window` is how long before `start_time` an event may already go live.
pub fn validate_event_status_transition(
    input: &TransitionInput,
    now: DateTime<Utc>,
    live_window: Duration,
) -> TransitionCheck {
    let TransitionInput {
        current,
        new,
        start_time,
        end_time,
        min_participants,
        participant_count,
        ..
    } = *input;

    if current == new {
        return TransitionCheck::reject(format!("Event is already {current}"));
    }
    if current.is_terminal() {
        return TransitionCheck::reject(format!(
            "Cannot change the status of a {current} event"
        ));
    }
    if !edge_allowed(current, new) {
        return TransitionCheck::reject(format!("Cannot move an event from {current} to {new}"));
    }

    match new {
        EventStatus::Upcoming if start_time <= now => {
            TransitionCheck::reject("Cannot publish an event whose start time has passed")
        }
        EventStatus::Live if now < start_time - live_window => TransitionCheck::reject(format!(
            "Event can go live at most {} minutes before its start time",
            live_window.num_minutes()
        )),
        EventStatus::Live if end_time.is_some_and(|end| now > end) => {
            TransitionCheck::reject("Cannot go live after the event has ended")
        }
        EventStatus::Completed if now < start_time => {
            TransitionCheck::reject("Cannot complete an event before it has started")
        }
        EventStatus::Completed
            if min_participants.is_some_and(|min| participant_count < min) =>
        {
            TransitionCheck::reject(format!(
                "Event needs at least {} participants to complete (has {})",
                min_participants.unwrap_or_default(),
                participant_count
            ))
        }
        _ => TransitionCheck::ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EventStatus::*;

    fn input(current: EventStatus, new: EventStatus, start: DateTime<Utc>) -> TransitionInput {
        TransitionInput {
            current,
            new,
            start_time: start,
            end_time: Some(start + Duration::hours(2)),
            min_participants: None,
            participant_count: 0,
        }
    }

    fn check(i: &TransitionInput, now: DateTime<Utc>) -> TransitionCheck {
        validate_event_status_transition(i, now, Duration::minutes(30))
    }

    #[test]
    fn forward_path_is_valid() {
        let now = Utc::now();
        let start = now + Duration::minutes(10);
        assert!(check(&input(Draft, Upcoming, start), now).is_valid);
        assert!(check(&input(Upcoming, Live, start), now).is_valid);
        assert!(check(&input(Live, Completed, start), start + Duration::hours(1)).is_valid);
    }

    #[test]
    fn cancel_is_valid_from_every_open_status() {
        let now = Utc::now();
        let start = now + Duration::days(1);
        for from in [Draft, Upcoming, Live] {
            assert!(check(&input(from, Cancelled, start), now).is_valid, "{from}");
        }
    }

    #[test]
    fn backward_and_skipping_edges_are_invalid() {
        let now = Utc::now();
        let start = now + Duration::minutes(5);
        for (from, to) in [
            (Completed, Upcoming),
            (Cancelled, Upcoming),
            (Live, Upcoming),
            (Upcoming, Draft),
            (Draft, Live),
            (Draft, Completed),
            (Upcoming, Completed),
            (Completed, Cancelled),
        ] {
            let res = check(&input(from, to, start), now);
            assert!(!res.is_valid, "{from} -> {to}");
            assert!(res.error.is_some());
        }
    }

    #[test]
    fn same_status_is_rejected() {
        let now = Utc::now();
        let res = check(&input(Live, Live, now), now);
        assert_eq!(res.error.as_deref(), Some("Event is already live"));
    }

    #[test]
    fn live_window_is_enforced() {
        let now = Utc::now();
        assert!(!check(&input(Upcoming, Live, now + Duration::hours(2)), now).is_valid);
        assert!(check(&input(Upcoming, Live, now + Duration::minutes(29)), now).is_valid);
    }

    #[test]
    fn cannot_go_live_after_end() {
        let now = Utc::now();
        let res = check(&input(Upcoming, Live, now - Duration::hours(3)), now);
        assert!(!res.is_valid);
    }

    #[test]
    fn cannot_publish_into_the_past() {
        let now = Utc::now();
        assert!(!check(&input(Draft, Upcoming, now - Duration::minutes(1)), now).is_valid);
    }

    #[test]
    fn completion_requires_minimum_participants() {
        let now = Utc::now();
        let start = now - Duration::hours(1);
        let mut i = input(Live, Completed, start);
        i.min_participants = Some(4);
        i.participant_count = 3;
        assert!(!check(&i, now).is_valid);
        i.participant_count = 4;
        assert!(check(&i, now).is_valid);
    }

    #[test]
    fn completion_before_start_is_rejected() {
        let now = Utc::now();
        let res = check(&input(Live, Completed, now + Duration::minutes(10)), now);
        assert!(!res.is_valid);
    }
}
