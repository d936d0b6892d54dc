use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::models::{
    EventParticipant, ParticipantResultUpdate, ParticipantRole, ParticipantStatus,
    ParticipantWithProfile, ParticipationRecord,
};
use crate::error::{AppError, AppResult};

const PARTICIPANT_COLUMNS: &str =
    "id, event_id, user_id, role, status, score, placement, joined_at, updated_at";

/// Participants holding a seat: role=participant and not cancelled / no-show.
const SEATS_TAKEN: &str = r#"
    SELECT COUNT(*) FROM event_participants
    WHERE event_id = ?
      AND role = 'participant'
      AND status NOT IN ('cancelled', 'no_show')
"#;

/// Participants the organizer has let in; pending approvals are excluded.
const ADMITTED: &str = r#"
    SELECT COUNT(*) FROM event_participants
    WHERE event_id = ?
      AND role = 'participant'
      AND status IN ('registered', 'confirmed', 'attended')
"#;

pub struct ParticipantRepository;

impl ParticipantRepository {
    pub async fn insert_in(
        conn: &mut SqliteConnection,
        event_id: &str,
        user_id: &str,
        role: ParticipantRole,
        status: ParticipantStatus,
    ) -> AppResult<EventParticipant> {
        let now = Utc::now();
        sqlx::query_as::<_, EventParticipant>(&format!(
            r#"
            INSERT INTO event_participants (id, event_id, user_id, role, status, joined_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING {PARTICIPANT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(event_id)
        .bind(user_id)
        .bind(role)
        .bind(status)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(AppError::Database)
    }

    pub async fn insert(
        pool: &SqlitePool,
        event_id: &str,
        user_id: &str,
        role: ParticipantRole,
        status: ParticipantStatus,
    ) -> AppResult<EventParticipant> {
        let mut conn = pool.acquire().await.map_err(AppError::Database)?;
        Self::insert_in(&mut conn, event_id, user_id, role, status).await
    }

    /// Insert a `participant` row only while fewer than `max` seats are taken.
    /// The count and the insert are one statement, so concurrent joins cannot
    /// overfill the event. `Ok(None)` means the event was full.
    pub async fn insert_if_capacity(
        pool: &SqlitePool,
        event_id: &str,
        user_id: &str,
        status: ParticipantStatus,
        max: i64,
    ) -> AppResult<Option<EventParticipant>> {
        let now = Utc::now();
        sqlx::query_as::<_, EventParticipant>(&format!(
            r#"
            INSERT INTO event_participants (id, event_id, user_id, role, status, joined_at, updated_at)
            SELECT ?, ?, ?, 'participant', ?, ?, ?
            WHERE ({SEATS_TAKEN}) < ?
            RETURNING {PARTICIPANT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(event_id)
        .bind(user_id)
        .bind(status)
        .bind(now)
        .bind(now)
        .bind(event_id)
        .bind(max)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<EventParticipant>> {
        sqlx::query_as::<_, EventParticipant>(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM event_participants WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// The user's non-cancelled row for the event, if any.
    pub async fn find_active(
        pool: &SqlitePool,
        event_id: &str,
        user_id: &str,
    ) -> AppResult<Option<EventParticipant>> {
        sqlx::query_as::<_, EventParticipant>(&format!(
            r#"
            SELECT {PARTICIPANT_COLUMNS} FROM event_participants
            WHERE event_id = ? AND user_id = ? AND status <> 'cancelled'
            "#
        ))
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn count_seats_taken(pool: &SqlitePool, event_id: &str) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(SEATS_TAKEN)
            .bind(event_id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Count toward `min_participants`.
    pub async fn count_admitted(pool: &SqlitePool, event_id: &str) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(ADMITTED)
            .bind(event_id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn list_for_event(
        pool: &SqlitePool,
        event_id: &str,
    ) -> AppResult<Vec<ParticipantWithProfile>> {
        sqlx::query_as::<_, ParticipantWithProfile>(
            r#"
            SELECT p.id, p.event_id, p.user_id, p.role, p.status, p.score, p.placement, p.joined_at,
                   pr.fid, pr.username, pr.display_name, pr.pfp_url
            FROM event_participants p
            JOIN profiles pr ON pr.id = p.user_id
            WHERE p.event_id = ? AND p.status <> 'cancelled'
            ORDER BY p.joined_at ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Profile ids of participants whose status is one of `statuses`.
    pub async fn user_ids_with_status(
        pool: &SqlitePool,
        event_id: &str,
        statuses: &[ParticipantStatus],
    ) -> AppResult<Vec<String>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT user_id FROM event_participants WHERE event_id = ? AND status IN ({placeholders})"
        );
        let mut query = sqlx::query_scalar::<_, String>(&sql).bind(event_id);
        for status in statuses {
            query = query.bind(*status);
        }
        query.fetch_all(pool).await.map_err(AppError::Database)
    }

    pub async fn set_status(
        pool: &SqlitePool,
        id: &str,
        status: ParticipantStatus,
    ) -> AppResult<EventParticipant> {
        sqlx::query_as::<_, EventParticipant>(&format!(
            r#"
            UPDATE event_participants SET status = ?, updated_at = ?
            WHERE id = ?
            RETURNING {PARTICIPANT_COLUMNS}
            "#
        ))
        .bind(status)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::NotFound("Participant not found".to_string()))
    }

    /// Promote a pending row to `confirmed` if a seat is still free.
    /// `Ok(None)` means the event filled up in the meantime.
    pub async fn confirm_if_capacity(
        pool: &SqlitePool,
        id: &str,
        event_id: &str,
        max: i64,
    ) -> AppResult<Option<EventParticipant>> {
        // The pending row already counts as a seat, hence `<=`.
        sqlx::query_as::<_, EventParticipant>(&format!(
            r#"
            UPDATE event_participants SET status = 'confirmed', updated_at = ?
            WHERE id = ? AND status = 'pending_approval'
              AND ({SEATS_TAKEN}) <= ?
            RETURNING {PARTICIPANT_COLUMNS}
            "#
        ))
        .bind(Utc::now())
        .bind(id)
        .bind(event_id)
        .bind(max)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn update_result(
        pool: &SqlitePool,
        id: &str,
        update: ParticipantResultUpdate,
    ) -> AppResult<EventParticipant> {
        sqlx::query_as::<_, EventParticipant>(&format!(
            r#"
            UPDATE event_participants
            SET status = COALESCE(?, status),
                score = COALESCE(?, score),
                placement = COALESCE(?, placement),
                updated_at = ?
            WHERE id = ?
            RETURNING {PARTICIPANT_COLUMNS}
            "#
        ))
        .bind(update.status)
        .bind(update.score)
        .bind(update.placement)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::NotFound("Participant not found".to_string()))
    }

    /// Make `user_id` the confirmed organizer of the event, promoting an
    /// existing active row or inserting a new one. Returns true when a row changed.
    pub async fn ensure_organizer(
        pool: &SqlitePool,
        event_id: &str,
        user_id: &str,
    ) -> AppResult<bool> {
        match Self::find_active(pool, event_id, user_id).await? {
            Some(row) if row.role == ParticipantRole::Organizer => Ok(false),
            Some(row) => {
                sqlx::query(
                    "UPDATE event_participants SET role = 'organizer', status = 'confirmed', updated_at = ? WHERE id = ?",
                )
                .bind(Utc::now())
                .bind(&row.id)
                .execute(pool)
                .await
                .map_err(AppError::Database)?;
                Ok(true)
            }
            None => {
                Self::insert(
                    pool,
                    event_id,
                    user_id,
                    ParticipantRole::Organizer,
                    ParticipantStatus::Confirmed,
                )
                .await?;
                Ok(true)
            }
        }
    }

    /// Every row the profile holds, joined with its event, for statistics.
    pub async fn participation_for_profile(
        pool: &SqlitePool,
        profile_id: &str,
    ) -> AppResult<Vec<ParticipationRecord>> {
        sqlx::query_as::<_, ParticipationRecord>(
            r#"
            SELECT p.event_id, p.role, p.status, p.score, p.placement,
                   e.status AS event_status, e.game
            FROM event_participants p
            JOIN events e ON e.id = p.event_id
            WHERE p.user_id = ? AND p.status <> 'cancelled'
            "#,
        )
        .bind(profile_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }
}
