use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::models::{Chat, ChatParticipant, ChatRole, ChatType, Message, MessageWithSender};
use crate::error::{AppError, AppResult};

const CHAT_COLUMNS: &str =
    "id, name, chat_type, event_id, group_id, created_by, last_message_at, created_at, updated_at";

pub struct ChatRepository;

impl ChatRepository {
    pub async fn create_in(
        conn: &mut SqliteConnection,
        name: Option<&str>,
        chat_type: ChatType,
        event_id: Option<&str>,
        group_id: Option<&str>,
        created_by: &str,
    ) -> AppResult<Chat> {
        let now = Utc::now();
        sqlx::query_as::<_, Chat>(&format!(
            r#"
            INSERT INTO chats (id, name, chat_type, event_id, group_id, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {CHAT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(chat_type)
        .bind(event_id)
        .bind(group_id)
        .bind(created_by)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(AppError::Database)
    }

    pub async fn add_participant_in(
        conn: &mut SqliteConnection,
        chat_id: &str,
        user_id: &str,
        role: ChatRole,
    ) -> AppResult<ChatParticipant> {
        sqlx::query_as::<_, ChatParticipant>(
            r#"
            INSERT INTO chat_participants (id, chat_id, user_id, role, joined_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, chat_id, user_id, role, joined_at, left_at, last_read_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(chat_id)
        .bind(user_id)
        .bind(role)
        .bind(Utc::now())
        .fetch_one(&mut *conn)
        .await
        .map_err(AppError::Database)
    }

    /// Create a chat and add `members` (the first one as admin) atomically.
    pub async fn create_with_members(
        pool: &SqlitePool,
        name: Option<&str>,
        chat_type: ChatType,
        created_by: &str,
        members: &[&str],
    ) -> AppResult<Chat> {
        let mut tx = pool.begin().await.map_err(AppError::Database)?;
        let chat = Self::create_in(&mut tx, name, chat_type, None, None, created_by).await?;
        for (i, member) in members.iter().enumerate() {
            let role = if i == 0 { ChatRole::Admin } else { ChatRole::Member };
            Self::add_participant_in(&mut tx, &chat.id, member, role).await?;
        }
        tx.commit().await.map_err(AppError::Database)?;
        Ok(chat)
    }

    /// Add the user unless they already hold an active membership.
    pub async fn join(
        pool: &SqlitePool,
        chat_id: &str,
        user_id: &str,
        role: ChatRole,
    ) -> AppResult<()> {
        if Self::is_active_member(pool, chat_id, user_id).await? {
            return Ok(());
        }
        let mut conn = pool.acquire().await.map_err(AppError::Database)?;
        match Self::add_participant_in(&mut conn, chat_id, user_id, role).await {
            Ok(_) => Ok(()),
            // Lost a race with a concurrent join; the membership exists.
            Err(e) if e.is_unique_violation() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Soft-remove the membership. Returns false when the user was not a member.
    pub async fn leave(pool: &SqlitePool, chat_id: &str, user_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE chat_participants SET left_at = ? WHERE chat_id = ? AND user_id = ? AND left_at IS NULL",
        )
        .bind(Utc::now())
        .bind(chat_id)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Chat>> {
        sqlx::query_as::<_, Chat>(&format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// An existing direct chat in which both users are still active.
    pub async fn find_direct_between(
        pool: &SqlitePool,
        a: &str,
        b: &str,
    ) -> AppResult<Option<Chat>> {
        sqlx::query_as::<_, Chat>(&format!(
            r#"
            SELECT {CHAT_COLUMNS} FROM chats c
            WHERE c.chat_type = 'direct'
              AND EXISTS (SELECT 1 FROM chat_participants p
                          WHERE p.chat_id = c.id AND p.user_id = ? AND p.left_at IS NULL)
              AND EXISTS (SELECT 1 FROM chat_participants p
                          WHERE p.chat_id = c.id AND p.user_id = ? AND p.left_at IS NULL)
            LIMIT 1
            "#
        ))
        .bind(a)
        .bind(b)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn list_for_user(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<Chat>> {
        sqlx::query_as::<_, Chat>(&format!(
            r#"
            SELECT {CHAT_COLUMNS} FROM chats
            WHERE id IN (SELECT chat_id FROM chat_participants WHERE user_id = ? AND left_at IS NULL)
            ORDER BY COALESCE(last_message_at, created_at) DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn is_active_member(
        pool: &SqlitePool,
        chat_id: &str,
        user_id: &str,
    ) -> AppResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chat_participants WHERE chat_id = ? AND user_id = ? AND left_at IS NULL",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;
        Ok(count > 0)
    }

    pub async fn active_member_ids(pool: &SqlitePool, chat_id: &str) -> AppResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM chat_participants WHERE chat_id = ? AND left_at IS NULL",
        )
        .bind(chat_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Newest first, strictly older than `before` when given.
    pub async fn list_messages(
        pool: &SqlitePool,
        chat_id: &str,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> AppResult<Vec<MessageWithSender>> {
        sqlx::query_as::<_, MessageWithSender>(
            r#"
            SELECT m.id, m.chat_id, m.sender_id, m.content, m.created_at,
                   p.fid AS sender_fid, p.username AS sender_username, p.pfp_url AS sender_pfp_url
            FROM messages m
            JOIN profiles p ON p.id = m.sender_id
            WHERE m.chat_id = ? AND (? IS NULL OR m.created_at < ?)
            ORDER BY m.created_at DESC
            LIMIT ?
            "#,
        )
        .bind(chat_id)
        .bind(before)
        .bind(before)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn insert_message(
        pool: &SqlitePool,
        chat_id: &str,
        sender_id: &str,
        content: &str,
    ) -> AppResult<Message> {
        let now = Utc::now();
        let mut tx = pool.begin().await.map_err(AppError::Database)?;

        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (id, chat_id, sender_id, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, chat_id, sender_id, content, created_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(chat_id)
        .bind(sender_id)
        .bind(content)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        sqlx::query("UPDATE chats SET last_message_at = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(chat_id)
            .execute(&mut *tx)
            .await
            .map_err(AppError::Database)?;

        tx.commit().await.map_err(AppError::Database)?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::event::tests::profile;
    use crate::db::test_pool;

    #[tokio::test]
    async fn direct_chat_lookup_requires_both_members() {
        let pool = test_pool().await;
        let a = profile(&pool, 1).await;
        let b = profile(&pool, 2).await;
        let c = profile(&pool, 3).await;

        let chat =
            ChatRepository::create_with_members(&pool, None, ChatType::Direct, &a.id, &[a.id.as_str(), b.id.as_str()])
                .await
                .unwrap();

        let found = ChatRepository::find_direct_between(&pool, &b.id, &a.id)
            .await
            .unwrap();
        assert_eq!(found.map(|c| c.id), Some(chat.id.clone()));
        assert!(ChatRepository::find_direct_between(&pool, &a.id, &c.id)
            .await
            .unwrap()
            .is_none());

        assert!(ChatRepository::leave(&pool, &chat.id, &b.id).await.unwrap());
        assert!(!ChatRepository::leave(&pool, &chat.id, &b.id).await.unwrap());
        assert!(ChatRepository::find_direct_between(&pool, &a.id, &b.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn join_is_idempotent_and_rejoin_after_leave_works() {
        let pool = test_pool().await;
        let a = profile(&pool, 1).await;
        let b = profile(&pool, 2).await;
        let chat =
            ChatRepository::create_with_members(&pool, Some("squad"), ChatType::Group, &a.id, &[a.id.as_str()])
                .await
                .unwrap();

        ChatRepository::join(&pool, &chat.id, &b.id, ChatRole::Member).await.unwrap();
        ChatRepository::join(&pool, &chat.id, &b.id, ChatRole::Member).await.unwrap();
        assert_eq!(ChatRepository::active_member_ids(&pool, &chat.id).await.unwrap().len(), 2);

        ChatRepository::leave(&pool, &chat.id, &b.id).await.unwrap();
        ChatRepository::join(&pool, &chat.id, &b.id, ChatRole::Member).await.unwrap();
        assert!(ChatRepository::is_active_member(&pool, &chat.id, &b.id).await.unwrap());
    }

    #[tokio::test]
    async fn sending_updates_last_message_at() {
        let pool = test_pool().await;
        let a = profile(&pool, 1).await;
        let chat =
            ChatRepository::create_with_members(&pool, Some("solo"), ChatType::Group, &a.id, &[a.id.as_str()])
                .await
                .unwrap();
        assert!(chat.last_message_at.is_none());

        ChatRepository::insert_message(&pool, &chat.id, &a.id, "gg").await.unwrap();

        let chat = ChatRepository::find_by_id(&pool, &chat.id).await.unwrap().unwrap();
        assert!(chat.last_message_at.is_some());
        let messages = ChatRepository::list_messages(&pool, &chat.id, None, 50).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender_fid, 1);
        assert_eq!(messages[0].content, "gg");
    }
}
