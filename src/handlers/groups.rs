use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::{require_text, AppState};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{CreateGroupRequest, GroupDetail, GroupWithCount, UpdateGroupMembersRequest};

#[utoipa::path(
    get,
    path = "/api/v1/groups",
    responses((status = 200, description = "Groups with member counts")),
    tag = "groups"
)]
pub async fn list_groups(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<GroupWithCount>>, AppError> {
    Ok(Json(state.storage.list_groups(user.id()).await?))
}

/// Creates a group, optionally with initial members. Unknown contact ids are
/// ignored.
#[utoipa::path(
    post,
    path = "/api/v1/groups",
    request_body = CreateGroupRequest,
    responses((status = 201, description = "Group with members")),
    tag = "groups"
)]
pub async fn create_group(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupDetail>), AppError> {
    let name = require_text(&req.name, "name")?;
    let group = state
        .storage
        .create_group(
            user.id(),
            name,
            req.description.as_deref(),
            &req.contact_ids,
        )
        .await?;
    tracing::info!(
        "✓ Group '{}' created with {} member(s)",
        group.group.name,
        group.members.len()
    );
    Ok((StatusCode::CREATED, Json(group)))
}

#[utoipa::path(
    get,
    path = "/api/v1/groups/{id}",
    params(("id" = Uuid, Path, description = "Group id")),
    responses((status = 200, description = "Group with members"), (status = 404, description = "Not found")),
    tag = "groups"
)]
pub async fn get_group(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<GroupDetail>, AppError> {
    Ok(Json(state.storage.get_group_detail(user.id(), id).await?))
}

/// Adds and removes members in one call.
#[utoipa::path(
    post,
    path = "/api/v1/groups/{id}/members",
    params(("id" = Uuid, Path, description = "Group id")),
    request_body = UpdateGroupMembersRequest,
    responses((status = 200, description = "Group with updated members")),
    tag = "groups"
)]
pub async fn update_group_members(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateGroupMembersRequest>,
) -> Result<Json<GroupDetail>, AppError> {
    if req.add.is_empty() && req.remove.is_empty() {
        return Err(AppError::BadRequest(
            "Nothing to change: give 'add' or 'remove'".to_string(),
        ));
    }
    let group = state
        .storage
        .update_group_members(user.id(), id, &req.add, &req.remove)
        .await?;
    Ok(Json(group))
}

#[utoipa::path(
    delete,
    path = "/api/v1/groups/{id}",
    params(("id" = Uuid, Path, description = "Group id")),
    responses((status = 204, description = "Deleted")),
    tag = "groups"
)]
pub async fn delete_group(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.storage.delete_group(user.id(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
