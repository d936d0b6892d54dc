use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateNotificationLog, NotificationLog};
use crate::error::{AppError, AppResult};

const LOG_COLUMNS: &str =
    "id, fid, notification_type, provider, title, body, status, error_message, created_at";

// ============================================================================
// Notification Log Repository
// ============================================================================

pub struct NotificationLogRepository;

impl NotificationLogRepository {
    pub async fn create(pool: &SqlitePool, log: CreateNotificationLog) -> AppResult<NotificationLog> {
        sqlx::query_as::<_, NotificationLog>(&format!(
            r#"
            INSERT INTO notification_log (
                id, fid, notification_type, provider, title, body, status, error_message, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {LOG_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(log.fid)
        .bind(log.notification_type)
        .bind(log.provider)
        .bind(log.title)
        .bind(log.body)
        .bind(log.status)
        .bind(log.error_message)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Most recent entries for a fid, optionally filtered by status.
    pub async fn recent_for_fid(
        pool: &SqlitePool,
        fid: i64,
        status: Option<&str>,
        limit: i64,
    ) -> AppResult<Vec<NotificationLog>> {
        sqlx::query_as::<_, NotificationLog>(&format!(
            r#"
            SELECT {LOG_COLUMNS} FROM notification_log
            WHERE fid = ? AND (? IS NULL OR status = ?)
            ORDER BY created_at DESC
            LIMIT ?
            "#
        ))
        .bind(fid)
        .bind(status)
        .bind(status)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }
}
