use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::{
    Chat, ChatRepository, ChatRole, ChatType, EventRepository, GroupMemberStatus,
    GroupRepository, Message, MessageWithSender, Profile, ProfileRepository,
};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::services::auth::AuthService;
use crate::services::notifications::{NotificationKind, NotificationService};
use crate::services::registration::is_event_member;
use crate::AppState;

const MAX_PAGE: i64 = 100;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_chats).post(create_chat))
        .route("/:id", get(get_chat))
        .route("/:id/join", post(join_chat))
        .route("/:id/leave", post(leave_chat))
        .route("/:id/messages", get(list_messages).post(send_message))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateChatRequest {
    /// Start (or reopen) a direct conversation with this Farcaster user.
    pub other_fid: Option<i64>,
    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    pub name: Option<String>,
    /// Extra members for a named group chat.
    #[serde(default)]
    pub member_fids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(min = 1, max = 2000, message = "must be 1-2000 characters"))]
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatDetail {
    #[serde(flatten)]
    pub chat: Chat,
    pub member_count: usize,
}

// ============================================================================
// Helpers
// ============================================================================

async fn load_chat(state: &AppState, id: &str) -> AppResult<Chat> {
    ChatRepository::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Chat not found".to_string()))
}

async fn require_member(state: &AppState, chat: &Chat, profile: &Profile) -> AppResult<()> {
    if ChatRepository::is_active_member(&state.db, &chat.id, &profile.id).await? {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

/// Whether `profile` may (re)join `chat` on their own.
async fn may_join(state: &AppState, chat: &Chat, profile: &Profile) -> AppResult<bool> {
    match chat.chat_type {
        ChatType::Event => {
            let Some(event_id) = chat.event_id.as_deref() else {
                return Ok(false);
            };
            match EventRepository::find_by_id(&state.db, event_id).await? {
                Some(event) => is_event_member(&state.db, &event, profile).await,
                None => Ok(false),
            }
        }
        ChatType::Group => {
            let Some(group_id) = chat.group_id.as_deref() else {
                return Ok(false);
            };
            Ok(GroupRepository::find_member(&state.db, group_id, &profile.id)
                .await?
                .map(|m| m.status == GroupMemberStatus::Active)
                .unwrap_or(false))
        }
        // Direct and ad-hoc chats are invitation only.
        ChatType::Direct => Ok(false),
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_chats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<Json<Vec<Chat>>> {
    let profile = AuthService::require_profile(&state, user.fid).await?;
    Ok(Json(ChatRepository::list_for_user(&state.db, &profile.id).await?))
}

async fn create_chat(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<CreateChatRequest>,
) -> AppResult<(StatusCode, Json<Chat>)> {
    body.validate()?;
    let me = AuthService::require_profile(&state, user.fid).await?;

    if let Some(other_fid) = body.other_fid {
        if other_fid == me.fid {
            return Err(AppError::BadRequest(
                "Cannot start a chat with yourself".to_string(),
            ));
        }
        let other = ProfileRepository::find_by_fid(&state.db, other_fid)
            .await?
            .ok_or_else(|| AppError::NotFound("Profile not found".to_string()))?;

        if let Some(existing) = ChatRepository::find_direct_between(&state.db, &me.id, &other.id).await? {
            return Ok((StatusCode::OK, Json(existing)));
        }
        let chat = ChatRepository::create_with_members(
            &state.db,
            None,
            ChatType::Direct,
            &me.id,
            &[me.id.as_str(), other.id.as_str()],
        )
        .await?;
        tracing::info!("Direct chat {} created by fid {}", chat.id, me.fid);
        return Ok((StatusCode::CREATED, Json(chat)));
    }

    let name = body
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            AppError::BadRequest("Either other_fid or a chat name is required".to_string())
        })?;

    let mut members: Vec<String> = vec![me.id.clone()];
    for fid in body.member_fids.iter().filter(|f| **f != me.fid) {
        match ProfileRepository::find_by_fid(&state.db, *fid).await? {
            Some(p) if !members.contains(&p.id) => members.push(p.id),
            Some(_) => {}
            None => {
                return Err(AppError::NotFound(format!("Profile not found for fid {fid}")));
            }
        }
    }
    let member_refs: Vec<&str> = members.iter().map(String::as_str).collect();

    let chat = ChatRepository::create_with_members(
        &state.db,
        Some(name),
        ChatType::Group,
        &me.id,
        &member_refs,
    )
    .await?;
    tracing::info!("Group chat {} created by fid {}", chat.id, me.fid);
    Ok((StatusCode::CREATED, Json(chat)))
}

async fn get_chat(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<ChatDetail>> {
    let profile = AuthService::require_profile(&state, user.fid).await?;
    let chat = load_chat(&state, &id).await?;
    require_member(&state, &chat, &profile).await?;
    let member_count = ChatRepository::active_member_ids(&state.db, &chat.id)
        .await?
        .len();
    Ok(Json(ChatDetail { chat, member_count }))
}

async fn join_chat(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<Chat>> {
    let profile = AuthService::require_profile(&state, user.fid).await?;
    let chat = load_chat(&state, &id).await?;

    if !ChatRepository::is_active_member(&state.db, &chat.id, &profile.id).await? {
        if !may_join(&state, &chat, &profile).await? {
            return Err(AppError::Forbidden);
        }
        ChatRepository::join(&state.db, &chat.id, &profile.id, ChatRole::Member).await?;
    }
    Ok(Json(chat))
}

async fn leave_chat(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let profile = AuthService::require_profile(&state, user.fid).await?;
    let chat = load_chat(&state, &id).await?;
    if !ChatRepository::leave(&state.db, &chat.id, &profile.id).await? {
        return Err(AppError::BadRequest(
            "You are not a member of this chat".to_string(),
        ));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> AppResult<Json<Vec<MessageWithSender>>> {
    let profile = AuthService::require_profile(&state, user.fid).await?;
    let chat = load_chat(&state, &id).await?;
    require_member(&state, &chat, &profile).await?;

    let limit = query.limit.unwrap_or(50).clamp(1, MAX_PAGE);
    Ok(Json(
        ChatRepository::list_messages(&state.db, &chat.id, query.before, limit).await?,
    ))
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<Message>)> {
    body.validate()?;
    let content = body.content.trim();
    if content.is_empty() {
        return Err(AppError::Validation(
            "content: must be 1-2000 characters".to_string(),
        ));
    }

    let profile = AuthService::require_profile(&state, user.fid).await?;
    let chat = load_chat(&state, &id).await?;
    require_member(&state, &chat, &profile).await?;

    let message = ChatRepository::insert_message(&state.db, &chat.id, &profile.id, content).await?;

    let recipients: Vec<String> = ChatRepository::active_member_ids(&state.db, &chat.id)
        .await?
        .into_iter()
        .filter(|id| id != &profile.id)
        .collect();
    let title = chat.name.clone().unwrap_or_else(|| profile.handle());
    let body = match chat.chat_type {
        ChatType::Direct => content.to_string(),
        _ => format!("{}: {}", profile.handle(), content),
    };
    NotificationService::dispatch(
        &state,
        recipients,
        NotificationKind::ChatMessage,
        title,
        body,
        format!("/chats/{}", chat.id),
    );

    Ok((StatusCode::CREATED, Json(message)))
}
