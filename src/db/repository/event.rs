use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{
    ChatRole, ChatType, CreateEvent, Event, EventFilter, EventStatus, ParticipantRole,
    ParticipantStatus, UpdateEvent,
};
use crate::db::repository::{ChatRepository, ParticipantRepository};
use crate::error::{AppError, AppResult};

pub(crate) const EVENT_COLUMNS: &str = r#"
    id, title, description, game, platform, event_type, location, created_by,
    start_time, end_time, registration_deadline, min_participants, max_participants,
    status, require_approval, allow_spectators, is_private, chat_id, reminder_sent_at,
    created_at, updated_at
"#;

pub struct EventRepository;

impl EventRepository {
    /// Create an event together with the organizer's participant row and the
    /// event chat, in a single transaction.
    pub async fn create_with_organizer(
        pool: &SqlitePool,
        organizer_id: &str,
        event: CreateEvent,
    ) -> AppResult<Event> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let title = event.title.clone();

        let mut tx = pool.begin().await.map_err(AppError::Database)?;

        sqlx::query(
            r#"
            INSERT INTO events (
                id, title, description, game, platform, event_type, location, created_by,
                start_time, end_time, registration_deadline, min_participants, max_participants,
                status, require_approval, allow_spectators, is_private, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(event.title)
        .bind(event.description)
        .bind(event.game)
        .bind(event.platform)
        .bind(event.event_type)
        .bind(event.location)
        .bind(organizer_id)
        .bind(event.start_time)
        .bind(event.end_time)
        .bind(event.registration_deadline)
        .bind(event.min_participants)
        .bind(event.max_participants)
        .bind(event.status)
        .bind(event.require_approval)
        .bind(event.allow_spectators)
        .bind(event.is_private)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        ParticipantRepository::insert_in(
            &mut tx,
            &id,
            organizer_id,
            ParticipantRole::Organizer,
            ParticipantStatus::Confirmed,
        )
        .await?;

        let chat = ChatRepository::create_in(
            &mut tx,
            Some(&title),
            ChatType::Event,
            Some(&id),
            None,
            organizer_id,
        )
        .await?;
        ChatRepository::add_participant_in(&mut tx, &chat.id, organizer_id, ChatRole::Admin)
            .await?;

        sqlx::query("UPDATE events SET chat_id = ? WHERE id = ?")
            .bind(&chat.id)
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(AppError::Database)?;

        tx.commit().await.map_err(AppError::Database)?;

        Self::find_by_id(pool, &id)
            .await?
            .ok_or_else(|| AppError::NotFound("Event not found".to_string()))
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Event>> {
        sqlx::query_as::<_, Event>(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Public (non-private, non-draft) events, soonest first.
    pub async fn list_public(pool: &SqlitePool, filter: &EventFilter) -> AppResult<Vec<Event>> {
        sqlx::query_as::<_, Event>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE is_private = 0
              AND status <> 'draft'
              AND (? IS NULL OR status = ?)
              AND (? IS NULL OR LOWER(game) = LOWER(?))
            ORDER BY start_time ASC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(filter.status)
        .bind(filter.status)
        .bind(filter.game.as_deref())
        .bind(filter.game.as_deref())
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Events the profile organizes or holds an active registration for.
    pub async fn list_for_profile(pool: &SqlitePool, profile_id: &str) -> AppResult<Vec<Event>> {
        sqlx::query_as::<_, Event>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE created_by = ?
               OR id IN (
                    SELECT event_id FROM event_participants
                    WHERE user_id = ? AND status <> 'cancelled'
               )
            ORDER BY start_time DESC
            "#
        ))
        .bind(profile_id)
        .bind(profile_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Events in any of the given statuses (scheduler input).
    pub async fn list_by_statuses(
        pool: &SqlitePool,
        statuses: &[EventStatus],
    ) -> AppResult<Vec<Event>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE status IN ({placeholders}) ORDER BY start_time ASC"
        );
        let mut query = sqlx::query_as::<_, Event>(&sql);
        for status in statuses {
            query = query.bind(*status);
        }
        query.fetch_all(pool).await.map_err(AppError::Database)
    }

    pub async fn update(pool: &SqlitePool, id: &str, update: UpdateEvent) -> AppResult<Event> {
        sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE events
            SET title = COALESCE(?, title),
                description = COALESCE(?, description),
                game = COALESCE(?, game),
                platform = COALESCE(?, platform),
                event_type = COALESCE(?, event_type),
                location = COALESCE(?, location),
                start_time = COALESCE(?, start_time),
                reminder_sent_at = CASE WHEN ? IS NOT NULL AND ? <> start_time
                    THEN NULL ELSE reminder_sent_at END,
                end_time = COALESCE(?, end_time),
                registration_deadline = COALESCE(?, registration_deadline),
                min_participants = COALESCE(?, min_participants),
                max_participants = COALESCE(?, max_participants),
                require_approval = COALESCE(?, require_approval),
                allow_spectators = COALESCE(?, allow_spectators),
                is_private = COALESCE(?, is_private),
                updated_at = ?
            WHERE id = ?
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(update.title)
        .bind(update.description)
        .bind(update.game)
        .bind(update.platform)
        .bind(update.event_type)
        .bind(update.location)
        .bind(update.start_time)
        .bind(update.start_time)
        .bind(update.start_time)
        .bind(update.end_time)
        .bind(update.registration_deadline)
        .bind(update.min_participants)
        .bind(update.max_participants)
        .bind(update.require_approval)
        .bind(update.allow_spectators)
        .bind(update.is_private)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))
    }

    /// Move the event to `status`, but only if it is still in `expected`.
    /// Returns `None` when another writer changed the status first.
    pub async fn update_status(
        pool: &SqlitePool,
        id: &str,
        expected: EventStatus,
        status: EventStatus,
    ) -> AppResult<Option<Event>> {
        sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE events
            SET status = ?, updated_at = ?
            WHERE id = ? AND status = ?
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(status)
        .bind(Utc::now())
        .bind(id)
        .bind(expected)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Record the reminder for `id` unless one was already recorded.
    /// Returns whether this call won the claim.
    pub async fn claim_reminder(
        pool: &SqlitePool,
        id: &str,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE events SET reminder_sent_at = ? WHERE id = ? AND reminder_sent_at IS NULL",
        )
        .bind(at)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;
        Ok(result.rows_affected() == 1)
    }

    /// Events whose creator has no active organizer row.
    pub async fn find_missing_organizer_rows(
        pool: &SqlitePool,
    ) -> AppResult<Vec<(String, String)>> {
        sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT e.id, e.created_by
            FROM events e
            WHERE NOT EXISTS (
                SELECT 1 FROM event_participants p
                WHERE p.event_id = e.id
                  AND p.user_id = e.created_by
                  AND p.role = 'organizer'
                  AND p.status <> 'cancelled'
            )
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }
}
