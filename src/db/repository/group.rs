use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::models::{
    ChatRole, ChatType, CreateGroup, Group, GroupMember, GroupMemberStatus,
    GroupMemberWithProfile, GroupRole,
};
use crate::db::repository::ChatRepository;
use crate::error::{AppError, AppResult};

const GROUP_COLUMNS: &str =
    "id, name, description, game, is_private, max_members, created_by, chat_id, created_at, updated_at";
const MEMBER_COLUMNS: &str = "id, group_id, user_id, role, status, joined_at, updated_at";

pub struct GroupRepository;

impl GroupRepository {
    /// Create the group, its owner membership and its chat in one transaction.
    pub async fn create_with_owner(
        pool: &SqlitePool,
        owner_id: &str,
        group: CreateGroup,
    ) -> AppResult<Group> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut tx = pool.begin().await.map_err(AppError::Database)?;

        sqlx::query(
            r#"
            INSERT INTO groups (id, name, description, game, is_private, max_members, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&group.name)
        .bind(group.description)
        .bind(group.game)
        .bind(group.is_private)
        .bind(group.max_members)
        .bind(owner_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        Self::insert_member_in(&mut tx, &id, owner_id, GroupRole::Owner, GroupMemberStatus::Active)
            .await?;

        let chat = ChatRepository::create_in(
            &mut tx,
            Some(&group.name),
            ChatType::Group,
            None,
            Some(&id),
            owner_id,
        )
        .await?;
        ChatRepository::add_participant_in(&mut tx, &chat.id, owner_id, ChatRole::Admin).await?;

        let created = sqlx::query_as::<_, Group>(&format!(
            "UPDATE groups SET chat_id = ? WHERE id = ? RETURNING {GROUP_COLUMNS}"
        ))
        .bind(&chat.id)
        .bind(&id)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        tx.commit().await.map_err(AppError::Database)?;
        Ok(created)
    }

    async fn insert_member_in(
        conn: &mut SqliteConnection,
        group_id: &str,
        user_id: &str,
        role: GroupRole,
        status: GroupMemberStatus,
    ) -> AppResult<GroupMember> {
        let now = Utc::now();
        sqlx::query_as::<_, GroupMember>(&format!(
            r#"
            INSERT INTO group_members (id, group_id, user_id, role, status, joined_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(group_id)
        .bind(user_id)
        .bind(role)
        .bind(status)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(AppError::Database)
    }

    /// Add a member while the group has room. `Ok(None)` means it is full.
    pub async fn insert_member_if_capacity(
        pool: &SqlitePool,
        group_id: &str,
        user_id: &str,
        status: GroupMemberStatus,
        max_members: Option<i64>,
    ) -> AppResult<Option<GroupMember>> {
        let now = Utc::now();
        sqlx::query_as::<_, GroupMember>(&format!(
            r#"
            INSERT INTO group_members (id, group_id, user_id, role, status, joined_at, updated_at)
            SELECT ?, ?, ?, 'member', ?, ?, ?
            WHERE ? IS NULL
               OR (SELECT COUNT(*) FROM group_members WHERE group_id = ? AND status <> 'left') < ?
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(group_id)
        .bind(user_id)
        .bind(status)
        .bind(now)
        .bind(now)
        .bind(max_members)
        .bind(group_id)
        .bind(max_members)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Group>> {
        sqlx::query_as::<_, Group>(&format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Public groups, optionally matching `q` against name or game.
    pub async fn list_public(
        pool: &SqlitePool,
        q: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Group>> {
        let pattern = q.map(|q| format!("%{}%", q.trim().to_lowercase()));
        sqlx::query_as::<_, Group>(&format!(
            r#"
            SELECT {GROUP_COLUMNS} FROM groups
            WHERE is_private = 0
              AND (? IS NULL OR LOWER(name) LIKE ? OR LOWER(COALESCE(game, '')) LIKE ?)
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_member(
        pool: &SqlitePool,
        group_id: &str,
        user_id: &str,
    ) -> AppResult<Option<GroupMember>> {
        sqlx::query_as::<_, GroupMember>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM group_members WHERE group_id = ? AND user_id = ? AND status <> 'left'"
        ))
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_member_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<GroupMember>> {
        sqlx::query_as::<_, GroupMember>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM group_members WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn list_members(
        pool: &SqlitePool,
        group_id: &str,
    ) -> AppResult<Vec<GroupMemberWithProfile>> {
        sqlx::query_as::<_, GroupMemberWithProfile>(
            r#"
            SELECT m.id, m.user_id, m.role, m.status, m.joined_at,
                   p.fid, p.username, p.display_name, p.pfp_url
            FROM group_members m
            JOIN profiles p ON p.id = m.user_id
            WHERE m.group_id = ? AND m.status <> 'left'
            ORDER BY m.joined_at ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Active owners and admins, the recipients of membership notices.
    pub async fn moderator_ids(pool: &SqlitePool, group_id: &str) -> AppResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT user_id FROM group_members
            WHERE group_id = ? AND status = 'active' AND role IN ('owner', 'admin')
            "#,
        )
        .bind(group_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn set_member_status(
        pool: &SqlitePool,
        id: &str,
        status: GroupMemberStatus,
    ) -> AppResult<GroupMember> {
        sqlx::query_as::<_, GroupMember>(&format!(
            "UPDATE group_members SET status = ?, updated_at = ? WHERE id = ? RETURNING {MEMBER_COLUMNS}"
        ))
        .bind(status)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::NotFound("Member not found".to_string()))
    }
}
