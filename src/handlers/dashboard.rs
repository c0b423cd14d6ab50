use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::{require_text, AppState};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{DashboardSummary, UpdateWhatsAppRequest, User};
use crate::storage::OutstandingItem;

#[derive(Debug, Default, Deserialize)]
pub struct DashboardParams {
    /// Restrict money figures to the last N days.
    pub days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OutstandingParams {
    pub limit: Option<i64>,
}

/// GET /api/v1/dashboard
#[utoipa::path(
    get,
    path = "/api/v1/dashboard",
    params(("days" = Option<i64>, Query, description = "Only count the last N days")),
    responses((status = 200, description = "Business summary", body = DashboardSummary)),
    tag = "dashboard"
)]
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<DashboardParams>,
) -> Result<Json<DashboardSummary>, AppError> {
    let since = match params.days {
        Some(days) if days > 0 => Some(chrono::Utc::now() - chrono::Duration::days(days)),
        Some(_) => return Err(AppError::BadRequest("days must be positive".to_string())),
        None => None,
    };
    Ok(Json(state.storage.dashboard_summary(user.id(), since).await?))
}

/// GET /api/v1/dashboard/outstanding
///
/// Orders and quotations with money still due, largest balance first.
#[utoipa::path(
    get,
    path = "/api/v1/dashboard/outstanding",
    params(("limit" = Option<i64>, Query,)),
    responses((status = 200, description = "Documents with a balance due")),
    tag = "dashboard"
)]
pub async fn outstanding(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<OutstandingParams>,
) -> Result<Json<Vec<OutstandingItem>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    Ok(Json(
        state.storage.outstanding_balances(user.id(), limit).await?,
    ))
}

/// GET /api/v1/me
#[utoipa::path(
    get,
    path = "/api/v1/me",
    responses((status = 200, description = "The authenticated business owner")),
    tag = "profile"
)]
pub async fn me(Extension(user): Extension<AuthUser>) -> Json<User> {
    Json(user.0)
}

/// PUT /api/v1/me/whatsapp
///
/// Stores Cloud API credentials. A phone number id can belong to one
/// business only (409).
#[utoipa::path(
    put,
    path = "/api/v1/me/whatsapp",
    request_body = UpdateWhatsAppRequest,
    responses(
        (status = 200, description = "Updated profile"),
        (status = 409, description = "Phone number id already connected to another business")
    ),
    tag = "profile"
)]
pub async fn update_whatsapp(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<UpdateWhatsAppRequest>,
) -> Result<Json<User>, AppError> {
    let phone_number_id = require_text(&req.phone_number_id, "phone_number_id")?;
    let access_token = require_text(&req.access_token, "access_token")?;
    if !phone_number_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::BadRequest(
            "phone_number_id must be numeric".to_string(),
        ));
    }

    let previous = user.0.wa_phone_number_id.clone();
    let updated = state
        .storage
        .update_whatsapp_credentials(
            user.id(),
            phone_number_id,
            access_token,
            req.business_account_id
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty()),
        )
        .await?;

    if let Some(previous) = previous {
        state.phone_owner_cache.invalidate(&previous).await;
    }
    state
        .phone_owner_cache
        .insert(phone_number_id.to_string(), updated.id)
        .await;

    tracing::info!(
        "✓ WhatsApp connected for user {} (phone number id {})",
        updated.id,
        phone_number_id
    );
    Ok(Json(updated))
}
