use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::{require_text, AppState};
use crate::auth::AuthUser;
use crate::broadcast::{spawn_broadcast, BroadcastJob, CampaignContent};
use crate::errors::AppError;
use crate::events::EventPayload;
use crate::models::{Broadcast, BroadcastDetail, CreateBroadcastRequest, Page};
use crate::storage::{BroadcastTarget, NewBroadcast};

#[derive(Debug, Default, Deserialize)]
pub struct BroadcastListParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Checks the request shape: exactly one target and some content.
pub(crate) fn plan_broadcast(req: &CreateBroadcastRequest) -> Result<NewBroadcast, AppError> {
    let name = require_text(&req.name, "name")?.to_string();

    let target = match (req.group_id, req.tag_id, &req.contact_ids) {
        (Some(group_id), None, None) => BroadcastTarget::Group(group_id),
        (None, Some(tag_id), None) => BroadcastTarget::Tag(tag_id),
        (None, None, Some(ids)) if !ids.is_empty() => {
            let mut unique = ids.clone();
            unique.sort();
            unique.dedup();
            BroadcastTarget::Contacts(unique)
        }
        (None, None, Some(_)) => {
            return Err(AppError::BadRequest("contact_ids cannot be empty".to_string()))
        }
        _ => {
            return Err(AppError::BadRequest(
                "Give exactly one of group_id, tag_id or contact_ids".to_string(),
            ))
        }
    };

    let template_name = non_blank(&req.template_name);
    let message_body = non_blank(&req.message_body);
    if template_name.is_none() && message_body.is_none() {
        return Err(AppError::BadRequest(
            "A broadcast needs a template_name or a message_body".to_string(),
        ));
    }

    Ok(NewBroadcast {
        name,
        template_name,
        language_code: non_blank(&req.language_code).unwrap_or_else(|| "en".to_string()),
        template_params: req.params.clone(),
        message_body,
        target,
    })
}

fn campaign_content(plan: &NewBroadcast) -> CampaignContent {
    match (&plan.template_name, &plan.message_body) {
        (Some(name), _) => CampaignContent::Template {
            name: name.clone(),
            language_code: plan.language_code.clone(),
            params: plan.template_params.clone(),
        },
        (None, body) => CampaignContent::Body(body.clone().unwrap_or_default()),
    }
}

/// POST /api/v1/broadcasts
///
/// Stores the campaign and its recipients, then sends in the background.
/// Progress is published as `broadcast.progress` events.
#[utoipa::path(
    post,
    path = "/api/v1/broadcasts",
    request_body = CreateBroadcastRequest,
    responses(
        (status = 202, description = "Broadcast accepted and sending"),
        (status = 400, description = "Invalid target or content, no recipients, or WhatsApp not connected")
    ),
    tag = "broadcasts"
)]
pub async fn create_broadcast(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateBroadcastRequest>,
) -> Result<(StatusCode, Json<Broadcast>), AppError> {
    let plan = plan_broadcast(&req)?;
    let credentials = user.whatsapp()?;

    let recipients = state
        .storage
        .resolve_recipients(user.id(), &plan.target)
        .await?;
    if recipients.is_empty() {
        return Err(AppError::BadRequest(
            "The broadcast has no recipients (blocked contacts are skipped)".to_string(),
        ));
    }

    let broadcast = state
        .storage
        .create_broadcast(user.id(), &plan, &recipients)
        .await?;
    tracing::info!(
        "✓ Broadcast '{}' queued for {} recipient(s)",
        broadcast.name,
        broadcast.total_recipients
    );
    state.events.publish(
        user.id(),
        EventPayload::BroadcastProgress {
            broadcast_id: broadcast.id,
            status: broadcast.status.clone(),
            total: broadcast.total_recipients,
            sent: 0,
            failed: 0,
        },
    );

    spawn_broadcast(
        state.storage.clone(),
        state.whatsapp.clone(),
        state.events.clone(),
        BroadcastJob {
            broadcast: broadcast.clone(),
            content: campaign_content(&plan),
            recipients,
            credentials,
        },
    );

    Ok((StatusCode::ACCEPTED, Json(broadcast)))
}

#[utoipa::path(
    get,
    path = "/api/v1/broadcasts",
    params(("page" = Option<i64>, Query,), ("per_page" = Option<i64>, Query,)),
    responses((status = 200, description = "Page of broadcasts, newest first")),
    tag = "broadcasts"
)]
pub async fn list_broadcasts(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<BroadcastListParams>,
) -> Result<Json<Page<Broadcast>>, AppError> {
    let page = state
        .storage
        .list_broadcasts(user.id(), params.page, params.per_page)
        .await?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/broadcasts/{id}",
    params(("id" = Uuid, Path, description = "Broadcast id")),
    responses((status = 200, description = "Broadcast with per-recipient status")),
    tag = "broadcasts"
)]
pub async fn get_broadcast(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<BroadcastDetail>, AppError> {
    Ok(Json(state.storage.get_broadcast_detail(user.id(), id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> CreateBroadcastRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn exactly_one_target_is_required() {
        let group = Uuid::new_v4();
        let tag = Uuid::new_v4();
        let both = format!(
            r#"{{"name":"Sale","message_body":"Hi","group_id":"{}","tag_id":"{}"}}"#,
            group, tag
        );
        assert!(plan_broadcast(&request(&both)).is_err());
        assert!(plan_broadcast(&request(r#"{"name":"Sale","message_body":"Hi"}"#)).is_err());
        assert!(plan_broadcast(&request(
            r#"{"name":"Sale","message_body":"Hi","contact_ids":[]}"#
        ))
        .is_err());

        let ok = format!(r#"{{"name":"Sale","message_body":"Hi","group_id":"{}"}}"#, group);
        assert_eq!(
            plan_broadcast(&request(&ok)).unwrap().target,
            BroadcastTarget::Group(group)
        );
    }

    #[test]
    fn content_is_required_and_template_wins() {
        let id = Uuid::new_v4();
        let none = format!(r#"{{"name":"Sale","tag_id":"{}"}}"#, id);
        assert!(plan_broadcast(&request(&none)).is_err());

        let both = format!(
            r#"{{"name":"Sale","tag_id":"{}","template_name":"offer","params":["10%"],"message_body":"x"}}"#,
            id
        );
        let plan = plan_broadcast(&request(&both)).unwrap();
        assert_eq!(plan.language_code, "en");
        assert_eq!(
            campaign_content(&plan),
            CampaignContent::Template {
                name: "offer".to_string(),
                language_code: "en".to_string(),
                params: vec!["10%".to_string()],
            }
        );
    }

    #[test]
    fn explicit_contacts_are_deduplicated() {
        let a = Uuid::new_v4();
        let json = format!(
            r#"{{"name":"Sale","message_body":"Hi","contact_ids":["{}","{}"]}}"#,
            a, a
        );
        assert_eq!(
            plan_broadcast(&request(&json)).unwrap().target,
            BroadcastTarget::Contacts(vec![a])
        );
    }
}
