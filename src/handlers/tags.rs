use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::AppState;
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{CreateTagRequest, Tag, TagWithCount};
use crate::validation::normalize_tag_name;

/// GET /api/v1/tags
#[utoipa::path(
    get,
    path = "/api/v1/tags",
    responses((status = 200, description = "Tags with contact counts")),
    tag = "tags"
)]
pub async fn list_tags(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<TagWithCount>>, AppError> {
    Ok(Json(state.storage.list_tags(user.id()).await?))
}

/// POST /api/v1/tags
///
/// Creating a tag that already exists (case-insensitively) returns it.
#[utoipa::path(
    post,
    path = "/api/v1/tags",
    request_body = CreateTagRequest,
    responses((status = 200, description = "Created or existing tag")),
    tag = "tags"
)]
pub async fn create_tag(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateTagRequest>,
) -> Result<Json<Tag>, AppError> {
    let name = normalize_tag_name(&req.name)?;
    let color = req
        .color
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    let tag = state
        .storage
        .create_or_fetch_tag(user.id(), &name, color)
        .await?;
    Ok(Json(tag))
}

/// DELETE /api/v1/tags/:id
#[utoipa::path(
    delete,
    path = "/api/v1/tags/{id}",
    params(("id" = Uuid, Path, description = "Tag id")),
    responses((status = 204, description = "Deleted"), (status = 404, description = "Not found")),
    tag = "tags"
)]
pub async fn delete_tag(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.storage.delete_tag(user.id(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
