use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{Gamertag, GamingPlatform, Profile, ProfileSummary, UpsertProfile};
use crate::error::{AppError, AppResult};

const PROFILE_COLUMNS: &str =
    "id, fid, username, display_name, pfp_url, bio, created_at, updated_at";

pub struct ProfileRepository;

impl ProfileRepository {
    /// Insert a profile for `fid`, or refresh the Farcaster fields of the existing one.
    /// `None` fields never overwrite stored values.
    pub async fn upsert_by_fid(pool: &SqlitePool, profile: UpsertProfile) -> AppResult<Profile> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query_as::<_, Profile>(&format!(
            r#"
            INSERT INTO profiles (id, fid, username, display_name, pfp_url, bio, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(fid) DO UPDATE SET
                username = COALESCE(excluded.username, profiles.username),
                display_name = COALESCE(excluded.display_name, profiles.display_name),
                pfp_url = COALESCE(excluded.pfp_url, profiles.pfp_url),
                bio = COALESCE(excluded.bio, profiles.bio),
                updated_at = excluded.updated_at
            RETURNING {PROFILE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(profile.fid)
        .bind(profile.username)
        .bind(profile.display_name)
        .bind(profile.pfp_url)
        .bind(profile.bio)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Profile>> {
        sqlx::query_as::<_, Profile>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_fid(pool: &SqlitePool, fid: i64) -> AppResult<Option<Profile>> {
        sqlx::query_as::<_, Profile>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE fid = ?"
        ))
        .bind(fid)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Fids of the given profile ids; unknown ids are skipped.
    pub async fn fids_for_ids(pool: &SqlitePool, ids: &[String]) -> AppResult<Vec<i64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT fid FROM profiles WHERE id IN ({placeholders})");
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query.fetch_all(pool).await.map_err(AppError::Database)
    }

    /// Which of the given fids have a GameLink profile.
    pub async fn existing_fids(pool: &SqlitePool, fids: &[i64]) -> AppResult<Vec<i64>> {
        if fids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; fids.len()].join(", ");
        let sql = format!("SELECT fid FROM profiles WHERE fid IN ({placeholders})");
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for fid in fids {
            query = query.bind(fid);
        }
        query.fetch_all(pool).await.map_err(AppError::Database)
    }

    /// Case-insensitive prefix/substring search over username and display name.
    pub async fn search(pool: &SqlitePool, q: &str, limit: i64) -> AppResult<Vec<ProfileSummary>> {
        let pattern = format!("%{}%", q.to_lowercase());
        sqlx::query_as::<_, ProfileSummary>(
            r#"
            SELECT id, fid, username, display_name, pfp_url
            FROM profiles
            WHERE LOWER(COALESCE(username, '')) LIKE ?
               OR LOWER(COALESCE(display_name, '')) LIKE ?
            ORDER BY username IS NULL, username
            LIMIT ?
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    // ------------------------------------------------------------------
    // Gamertags
    // ------------------------------------------------------------------

    pub async fn list_gamertags(
        pool: &SqlitePool,
        profile_id: &str,
        public_only: bool,
    ) -> AppResult<Vec<Gamertag>> {
        sqlx::query_as::<_, Gamertag>(
            r#"
            SELECT id, profile_id, platform, gamertag, is_public, created_at
            FROM gamertags
            WHERE profile_id = ? AND (? = 0 OR is_public = 1)
            ORDER BY platform
            "#,
        )
        .bind(profile_id)
        .bind(public_only)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn upsert_gamertag(
        pool: &SqlitePool,
        profile_id: &str,
        platform: GamingPlatform,
        gamertag: &str,
        is_public: bool,
    ) -> AppResult<Gamertag> {
        let id = Uuid::new_v4().to_string();
        sqlx::query_as::<_, Gamertag>(
            r#"
            INSERT INTO gamertags (id, profile_id, platform, gamertag, is_public, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(profile_id, platform) DO UPDATE SET
                gamertag = excluded.gamertag,
                is_public = excluded.is_public
            RETURNING id, profile_id, platform, gamertag, is_public, created_at
            "#,
        )
        .bind(id)
        .bind(profile_id)
        .bind(platform)
        .bind(gamertag)
        .bind(is_public)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Returns whether a row was removed.
    pub async fn delete_gamertag(
        pool: &SqlitePool,
        profile_id: &str,
        platform: GamingPlatform,
    ) -> AppResult<bool> {
        let res = sqlx::query("DELETE FROM gamertags WHERE profile_id = ? AND platform = ?")
            .bind(profile_id)
            .bind(platform)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(res.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn upsert_keeps_existing_fields_when_missing() {
        let pool = test_pool().await;
        let first = ProfileRepository::upsert_by_fid(
            &pool,
            UpsertProfile {
                fid: 42,
                username: Some("alice".into()),
                display_name: Some("Alice".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let second = ProfileRepository::upsert_by_fid(
            &pool,
            UpsertProfile {
                fid: 42,
                pfp_url: Some("https://img/alice.png".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.username.as_deref(), Some("alice"));
        assert_eq!(second.pfp_url.as_deref(), Some("https://img/alice.png"));
    }

    #[tokio::test]
    async fn search_matches_display_name() {
        let pool = test_pool().await;
        ProfileRepository::upsert_by_fid(
            &pool,
            UpsertProfile {
                fid: 7,
                username: Some("speedrunner".into()),
                display_name: Some("Mario Fan".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let hits = ProfileRepository::search(&pool, "mario", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fid, 7);
    }

    #[tokio::test]
    async fn gamertag_upsert_replaces_per_platform() {
        let pool = test_pool().await;
        let p = ProfileRepository::upsert_by_fid(
            &pool,
            UpsertProfile {
                fid: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        ProfileRepository::upsert_gamertag(&pool, &p.id, GamingPlatform::Steam, "old", true)
            .await
            .unwrap();
        ProfileRepository::upsert_gamertag(&pool, &p.id, GamingPlatform::Steam, "new", false)
            .await
            .unwrap();

        let all = ProfileRepository::list_gamertags(&pool, &p.id, false).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].gamertag, "new");
        let public = ProfileRepository::list_gamertags(&pool, &p.id, true).await.unwrap();
        assert!(public.is_empty());

        assert!(ProfileRepository::delete_gamertag(&pool, &p.id, GamingPlatform::Steam)
            .await
            .unwrap());
    }
}
