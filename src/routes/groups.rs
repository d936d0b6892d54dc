use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::{
    ChatRepository, ChatRole, CreateGroup, Group, GroupMember, GroupMemberStatus,
    GroupMemberWithProfile, GroupRepository, GroupRole,
};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::services::auth::AuthService;
use crate::services::notifications::{NotificationKind, NotificationService};
use crate::AppState;

pub const GROUP_FULL: &str = "Group is full";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_groups).post(create_group))
        .route("/:id", get(get_group))
        .route("/:id/join", post(join_group))
        .route("/:id/leave", post(leave_group))
        .route("/:id/members/:member_id/approve", post(approve_member))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    pub name: String,
    #[validate(length(max = 1000, message = "must be at most 1000 characters"))]
    pub description: Option<String>,
    #[validate(length(max = 100))]
    pub game: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[validate(range(min = 2, max = 10000, message = "must be between 2 and 10000"))]
    pub max_members: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListGroupsQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct GroupDetail {
    #[serde(flatten)]
    pub group: Group,
    pub members: Vec<GroupMemberWithProfile>,
}

async fn load_group(state: &AppState, id: &str) -> AppResult<Group> {
    GroupRepository::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Group not found".to_string()))
}

async fn list_groups(
    State(state): State<Arc<AppState>>,
    AuthUser { .. }: AuthUser,
    Query(query): Query<ListGroupsQuery>,
) -> AppResult<Json<Vec<Group>>> {
    let q = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);
    Ok(Json(
        GroupRepository::list_public(&state.db, q, limit, offset).await?,
    ))
}

async fn create_group(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<CreateGroupRequest>,
) -> AppResult<(StatusCode, Json<Group>)> {
    body.validate()?;
    let owner = AuthService::require_profile(&state, user.fid).await?;
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name: must be 1-100 characters".to_string()));
    }

    let group = GroupRepository::create_with_owner(
        &state.db,
        &owner.id,
        CreateGroup {
            name: name.to_string(),
            description: body.description,
            game: body.game,
            is_private: body.is_private,
            max_members: body.max_members,
        },
    )
    .await?;
    tracing::info!("Group {} created by fid {}", group.id, owner.fid);
    Ok((StatusCode::CREATED, Json(group)))
}

async fn get_group(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<GroupDetail>> {
    let group = load_group(&state, &id).await?;
    if group.is_private {
        let profile = AuthService::require_profile(&state, user.fid).await?;
        let member = GroupRepository::find_member(&state.db, &group.id, &profile.id).await?;
        if member.is_none() {
            return Err(AppError::NotFound("Group not found".to_string()));
        }
    }
    let members = GroupRepository::list_members(&state.db, &group.id).await?;
    Ok(Json(GroupDetail { group, members }))
}

async fn join_group(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<(StatusCode, Json<GroupMember>)> {
    let profile = AuthService::require_profile(&state, user.fid).await?;
    let group = load_group(&state, &id).await?;

    if GroupRepository::find_member(&state.db, &group.id, &profile.id)
        .await?
        .is_some()
    {
        return Err(AppError::BadRequest(
            "You are already a member of this group".to_string(),
        ));
    }

    let status = if group.is_private {
        GroupMemberStatus::Pending
    } else {
        GroupMemberStatus::Active
    };

    let member = GroupRepository::insert_member_if_capacity(
        &state.db,
        &group.id,
        &profile.id,
        status,
        group.max_members,
    )
    .await
    .map_err(|e| {
        if e.is_unique_violation() {
            AppError::BadRequest("You are already a member of this group".to_string())
        } else {
            e
        }
    })?
    .ok_or_else(|| AppError::BadRequest(GROUP_FULL.to_string()))?;

    if member.status == GroupMemberStatus::Active {
        if let Some(chat_id) = &group.chat_id {
            ChatRepository::join(&state.db, chat_id, &profile.id, ChatRole::Member).await?;
        }
    }

    let body = if member.status == GroupMemberStatus::Pending {
        format!("{} asked to join {}", profile.handle(), group.name)
    } else {
        format!("{} joined {}", profile.handle(), group.name)
    };
    let moderators = GroupRepository::moderator_ids(&state.db, &group.id).await?;
    NotificationService::dispatch(
        &state,
        moderators,
        NotificationKind::GroupMemberJoined,
        "New group member".to_string(),
        body,
        format!("/groups/{}", group.id),
    );

    Ok((StatusCode::CREATED, Json(member)))
}

async fn leave_group(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<GroupMember>> {
    let profile = AuthService::require_profile(&state, user.fid).await?;
    let group = load_group(&state, &id).await?;
    let member = GroupRepository::find_member(&state.db, &group.id, &profile.id)
        .await?
        .ok_or_else(|| AppError::BadRequest("You are not a member of this group".to_string()))?;

    if member.role == GroupRole::Owner {
        return Err(AppError::BadRequest(
            "The group owner cannot leave the group".to_string(),
        ));
    }

    let member =
        GroupRepository::set_member_status(&state.db, &member.id, GroupMemberStatus::Left).await?;
    if let Some(chat_id) = &group.chat_id {
        ChatRepository::leave(&state.db, chat_id, &profile.id).await?;
    }
    Ok(Json(member))
}

async fn approve_member(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, member_id)): Path<(String, String)>,
) -> AppResult<Json<GroupMember>> {
    let profile = AuthService::require_profile(&state, user.fid).await?;
    let group = load_group(&state, &id).await?;

    let moderator = GroupRepository::find_member(&state.db, &group.id, &profile.id).await?;
    let allowed = moderator
        .map(|m| m.status == GroupMemberStatus::Active && m.role.can_moderate())
        .unwrap_or(false);
    if !allowed {
        return Err(AppError::Forbidden);
    }

    let target = GroupRepository::find_member_by_id(&state.db, &member_id)
        .await?
        .filter(|m| m.group_id == group.id)
        .ok_or_else(|| AppError::NotFound("Member not found".to_string()))?;
    if target.status != GroupMemberStatus::Pending {
        return Err(AppError::BadRequest("Member is not pending approval".to_string()));
    }

    let member =
        GroupRepository::set_member_status(&state.db, &target.id, GroupMemberStatus::Active)
            .await?;
    if let Some(chat_id) = &group.chat_id {
        ChatRepository::join(&state.db, chat_id, &member.user_id, ChatRole::Member).await?;
    }
    tracing::info!("Member {} approved in group {}", member.id, group.id);
    Ok(Json(member))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::event::tests::profile;
    use crate::test_support::{bearer, test_state};
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(state: Arc<AppState>) -> Router {
        Router::new().nest("/api/groups", router()).with_state(state)
    }

    fn post_json(uri: &str, fid: i64, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, bearer(fid))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create(state: &Arc<AppState>, fid: i64, body: serde_json::Value) -> String {
        let resp = app(state.clone())
            .oneshot(post_json("/api/groups", fid, body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        json_body(resp).await["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn public_join_activates_and_full_group_rejects() {
        let state = test_state().await;
        for fid in 1..=3 {
            profile(&state.db, fid).await;
        }
        let id = create(
            &state,
            1,
            serde_json::json!({"name": "Apex squad", "max_members": 2}),
        )
        .await;

        let resp = app(state.clone())
            .oneshot(post_json(&format!("/api/groups/{id}/join"), 2, serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(json_body(resp).await["status"], "active");

        let resp = app(state.clone())
            .oneshot(post_json(&format!("/api/groups/{id}/join"), 2, serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app(state)
            .oneshot(post_json(&format!("/api/groups/{id}/join"), 3, serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"]["message"], GROUP_FULL);
    }

    #[tokio::test]
    async fn private_join_waits_for_approval() {
        let state = test_state().await;
        profile(&state.db, 1).await;
        profile(&state.db, 2).await;
        let id = create(
            &state,
            1,
            serde_json::json!({"name": "Invite only", "is_private": true}),
        )
        .await;

        let resp = app(state.clone())
            .oneshot(post_json(&format!("/api/groups/{id}/join"), 2, serde_json::json!({})))
            .await
            .unwrap();
        let pending = json_body(resp).await;
        assert_eq!(pending["status"], "pending");
        let member_id = pending["id"].as_str().unwrap();

        let resp = app(state.clone())
            .oneshot(post_json(
                &format!("/api/groups/{id}/members/{member_id}/approve"),
                2,
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app(state)
            .oneshot(post_json(
                &format!("/api/groups/{id}/members/{member_id}/approve"),
                1,
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "active");
    }

    #[tokio::test]
    async fn owner_cannot_leave() {
        let state = test_state().await;
        profile(&state.db, 1).await;
        let id = create(&state, 1, serde_json::json!({"name": "Mine"})).await;
        let resp = app(state)
            .oneshot(post_json(&format!("/api/groups/{id}/leave"), 1, serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
