//! Player statistics and achievements, aggregated from participation rows.

use std::collections::HashMap;

use serde::Serialize;

use crate::db::{EventStatus, ParticipantRole, ParticipantStatus, ParticipationRecord};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerStats {
    pub events_organized: u32,
    pub events_joined: u32,
    pub events_attended: u32,
    pub no_shows: u32,
    pub wins: u32,
    pub podiums: u32,
    pub win_rate: f64,
    pub average_score: Option<f64>,
    pub total_score: f64,
    pub favorite_game: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Achievement {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub unlocked: bool,
    pub progress: u32,
    pub target: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileStats {
    pub stats: PlayerStats,
    pub achievements: Vec<Achievement>,
}

pub fn compute_stats(records: &[ParticipationRecord]) -> PlayerStats {
    let mut stats = PlayerStats::default();
    let mut placed = 0u32;
    let mut scores: Vec<f64> = Vec::new();
    let mut games: HashMap<&str, u32> = HashMap::new();

    for r in records {
        if r.status == ParticipantStatus::Cancelled {
            continue;
        }
        match r.role {
            ParticipantRole::Organizer => stats.events_organized += 1,
            ParticipantRole::Participant => stats.events_joined += 1,
            ParticipantRole::Spectator => {}
        }
        match r.status {
            ParticipantStatus::Attended => stats.events_attended += 1,
            ParticipantStatus::NoShow => stats.no_shows += 1,
            _ => {}
        }
        if let Some(placement) = r.placement {
            placed += 1;
            if placement == 1 {
                stats.wins += 1;
            }
            if placement <= 3 {
                stats.podiums += 1;
            }
        }
        if let Some(score) = r.score {
            scores.push(score);
        }
        if r.role != ParticipantRole::Spectator {
            if let Some(game) = r.game.as_deref().filter(|g| !g.trim().is_empty()) {
                *games.entry(game).or_default() += 1;
            }
        }
    }

    if placed > 0 {
        stats.win_rate = f64::from(stats.wins) / f64::from(placed);
    }
    if !scores.is_empty() {
        stats.total_score = scores.iter().sum();
        stats.average_score = Some(stats.total_score / scores.len() as f64);
    }
    // Most played; ties go to the alphabetically first title.
    stats.favorite_game = games
        .into_iter()
        .max_by(|(ga, ca), (gb, cb)| ca.cmp(cb).then_with(|| gb.cmp(ga)))
        .map(|(g, _)| g.to_string());

    stats
}

fn achievement(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    progress: u32,
    target: u32,
) -> Achievement {
    Achievement {
        id,
        name,
        description,
        unlocked: progress >= target,
        progress: progress.min(target),
        target,
    }
}

pub fn compute_achievements(records: &[ParticipationRecord], stats: &PlayerStats) -> Vec<Achievement> {
    let completed_organized = records
        .iter()
        .filter(|r| r.role == ParticipantRole::Organizer && r.event_status == EventStatus::Completed)
        .count() as u32;

    let mut reliable = achievement(
        "reliable",
        "Reliable",
        "Attend 10 events without a no-show",
        stats.events_attended,
        10,
    );
    if stats.no_shows > 0 {
        reliable.unlocked = false;
    }

    vec![
        achievement("first_event", "First Event", "Attend your first event", stats.events_attended, 1),
        achievement("regular", "Regular", "Attend 10 events", stats.events_attended, 10),
        achievement("veteran", "Veteran", "Attend 50 events", stats.events_attended, 50),
        achievement("first_win", "First Win", "Finish first in an event", stats.wins, 1),
        achievement("champion", "Champion", "Win 10 events", stats.wins, 10),
        achievement("podium_finisher", "Podium Finisher", "Finish in the top 3 five times", stats.podiums, 5),
        achievement("organizer", "Organizer", "Host an event through to completion", completed_organized, 1),
        achievement("community_builder", "Community Builder", "Organize 10 events", stats.events_organized, 10),
        reliable,
    ]
}

pub fn profile_stats(records: &[ParticipationRecord]) -> ProfileStats {
    let stats = compute_stats(records);
    let achievements = compute_achievements(records, &stats);
    ProfileStats {
        stats,
        achievements,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(
        role: ParticipantRole,
        status: ParticipantStatus,
        placement: Option<i64>,
        score: Option<f64>,
        game: &str,
    ) -> ParticipationRecord {
        ParticipationRecord {
            event_id: "e".to_string(),
            role,
            status,
            score,
            placement,
            event_status: EventStatus::Completed,
            game: Some(game.to_string()),
        }
    }

    fn find<'a>(list: &'a [Achievement], id: &str) -> &'a Achievement {
        list.iter().find(|a| a.id == id).unwrap()
    }

    #[test]
    fn empty_history() {
        let s = profile_stats(&[]);
        assert_eq!(s.stats, PlayerStats::default());
        assert!(s.achievements.iter().all(|a| !a.unlocked));
        assert_eq!(s.achievements.len(), 9);
    }

    #[test]
    fn aggregates_results() {
        use ParticipantRole::*;
        use ParticipantStatus::*;
        let records = vec![
            rec(Participant, Attended, Some(1), Some(100.0), "Halo"),
            rec(Participant, Attended, Some(3), Some(50.0), "Halo"),
            rec(Participant, Attended, Some(5), None, "Chess"),
            rec(Participant, NoShow, None, None, "Chess"),
            rec(Organizer, Confirmed, None, None, "Apex"),
            rec(Spectator, Confirmed, None, None, "Apex"),
        ];
        let s = compute_stats(&records);

        assert_eq!(s.events_joined, 4);
        assert_eq!(s.events_organized, 1);
        assert_eq!(s.events_attended, 3);
        assert_eq!(s.no_shows, 1);
        assert_eq!(s.wins, 1);
        assert_eq!(s.podiums, 2);
        assert!((s.win_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(s.total_score, 150.0);
        assert_eq!(s.average_score, Some(75.0));
        // Chess and Halo tie at two each.
        assert_eq!(s.favorite_game.as_deref(), Some("Chess"));

        let a = compute_achievements(&records, &s);
        assert!(find(&a, "first_event").unlocked);
        assert!(find(&a, "first_win").unlocked);
        assert!(find(&a, "organizer").unlocked);
        assert!(!find(&a, "podium_finisher").unlocked);
        assert_eq!(find(&a, "podium_finisher").progress, 2);
    }

    #[test]
    fn reliable_requires_no_no_shows() {
        use ParticipantRole::*;
        use ParticipantStatus::*;
        let mut records: Vec<_> = (0..10)
            .map(|_| rec(Participant, Attended, None, None, "Halo"))
            .collect();
        let s = compute_stats(&records);
        assert!(find(&compute_achievements(&records, &s), "reliable").unlocked);

        records.push(rec(Participant, NoShow, None, None, "Halo"));
        let s = compute_stats(&records);
        let a = compute_achievements(&records, &s);
        assert!(!find(&a, "reliable").unlocked);
        assert!(find(&a, "regular").unlocked);
    }

    #[test]
    fn progress_is_capped_at_target() {
        let records: Vec<_> = (0..12)
            .map(|_| rec(ParticipantRole::Organizer, ParticipantStatus::Confirmed, None, None, "Go"))
            .collect();
        let s = compute_stats(&records);
        let a = compute_achievements(&records, &s);
        let cb = find(&a, "community_builder");
        assert!(cb.unlocked);
        assert_eq!(cb.progress, 10);
    }
}
