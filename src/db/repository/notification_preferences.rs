use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::{NotificationPreferences, UpdateNotificationPreferences};
use crate::error::{AppError, AppResult};

const PREFERENCE_COLUMNS: &str = r#"
    profile_id, enabled, event_updates, event_reminders, participant_updates,
    chat_messages, group_activity, updated_at
"#;

pub struct NotificationPreferencesRepository;

impl NotificationPreferencesRepository {
    /// Stored preferences, or the all-enabled defaults when none exist yet.
    pub async fn get_or_default(
        pool: &SqlitePool,
        profile_id: &str,
    ) -> AppResult<NotificationPreferences> {
        let stored = sqlx::query_as::<_, NotificationPreferences>(&format!(
            "SELECT {PREFERENCE_COLUMNS} FROM notification_preferences WHERE profile_id = ?"
        ))
        .bind(profile_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(stored.unwrap_or_else(|| NotificationPreferences::defaults_for(profile_id)))
    }

    /// Preferences for many profiles; profiles without a row are omitted
    /// and should be treated as defaults by the caller.
    pub async fn for_profiles(
        pool: &SqlitePool,
        profile_ids: &[String],
    ) -> AppResult<Vec<NotificationPreferences>> {
        if profile_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; profile_ids.len()].join(", ");
        let sql = format!(
            "SELECT {PREFERENCE_COLUMNS} FROM notification_preferences WHERE profile_id IN ({placeholders})"
        );
        let mut query = sqlx::query_as::<_, NotificationPreferences>(&sql);
        for id in profile_ids {
            query = query.bind(id);
        }
        query.fetch_all(pool).await.map_err(AppError::Database)
    }

    pub async fn update(
        pool: &SqlitePool,
        profile_id: &str,
        update: UpdateNotificationPreferences,
    ) -> AppResult<NotificationPreferences> {
        let current = Self::get_or_default(pool, profile_id).await?;

        sqlx::query_as::<_, NotificationPreferences>(&format!(
            r#"
            INSERT INTO notification_preferences (
                profile_id, enabled, event_updates, event_reminders, participant_updates,
                chat_messages, group_activity, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(profile_id) DO UPDATE SET
                enabled = excluded.enabled,
                event_updates = excluded.event_updates,
                event_reminders = excluded.event_reminders,
                participant_updates = excluded.participant_updates,
                chat_messages = excluded.chat_messages,
                group_activity = excluded.group_activity,
                updated_at = excluded.updated_at
            RETURNING {PREFERENCE_COLUMNS}
            "#
        ))
        .bind(profile_id)
        .bind(update.enabled.unwrap_or(current.enabled))
        .bind(update.event_updates.unwrap_or(current.event_updates))
        .bind(update.event_reminders.unwrap_or(current.event_reminders))
        .bind(update.participant_updates.unwrap_or(current.participant_updates))
        .bind(update.chat_messages.unwrap_or(current.chat_messages))
        .bind(update.group_activity.unwrap_or(current.group_activity))
        .bind(Utc::now())
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }
}
