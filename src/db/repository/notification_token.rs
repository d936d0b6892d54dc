use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::NotificationToken;
use crate::error::{AppError, AppResult};

const TOKEN_COLUMNS: &str = "id, fid, url, token, enabled, created_at, updated_at";

pub struct NotificationTokenRepository;

impl NotificationTokenRepository {
    /// Store (or re-enable) the token a Farcaster client issued for `fid`.
    pub async fn upsert_enabled(
        pool: &SqlitePool,
        fid: i64,
        url: &str,
        token: &str,
    ) -> AppResult<NotificationToken> {
        let now = Utc::now();
        sqlx::query_as::<_, NotificationToken>(&format!(
            r#"
            INSERT INTO notification_tokens (id, fid, url, token, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(fid, token) DO UPDATE SET
                url = excluded.url,
                enabled = 1,
                updated_at = excluded.updated_at
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(fid)
        .bind(url)
        .bind(token)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn disable_for_fid(pool: &SqlitePool, fid: i64) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE notification_tokens SET enabled = 0, updated_at = ? WHERE fid = ? AND enabled = 1",
        )
        .bind(Utc::now())
        .bind(fid)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;
        Ok(result.rows_affected())
    }

    /// Disable tokens a client reported as invalid.
    pub async fn disable_tokens(pool: &SqlitePool, tokens: &[String]) -> AppResult<u64> {
        if tokens.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; tokens.len()].join(", ");
        let sql = format!(
            "UPDATE notification_tokens SET enabled = 0, updated_at = ? WHERE token IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(Utc::now());
        for token in tokens {
            query = query.bind(token);
        }
        let result = query.execute(pool).await.map_err(AppError::Database)?;
        Ok(result.rows_affected())
    }

    pub async fn enabled_for_fids(
        pool: &SqlitePool,
        fids: &[i64],
    ) -> AppResult<Vec<NotificationToken>> {
        if fids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; fids.len()].join(", ");
        let sql = format!(
            "SELECT {TOKEN_COLUMNS} FROM notification_tokens WHERE enabled = 1 AND fid IN ({placeholders})"
        );
        let mut query = sqlx::query_as::<_, NotificationToken>(&sql);
        for fid in fids {
            query = query.bind(*fid);
        }
        query.fetch_all(pool).await.map_err(AppError::Database)
    }
}
