use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::AppState;
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::events::EventPayload;
use crate::models::{
    ChatListParams, ChatSummary, Message, MessageHistoryParams, OutboundKind, Page, Product,
    SendMessageRequest, ShareProductRequest,
};
use crate::outbound::Outbound;

fn required<'a>(value: &'a Option<String>, field: &str, kind: &str) -> Result<&'a str, AppError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("'{}' is required for {} messages", field, kind)))
}

fn https_url<'a>(value: &'a Option<String>, kind: &str) -> Result<&'a str, AppError> {
    let url = required(value, "media_url", kind)?;
    if !url.starts_with("https://") {
        return Err(AppError::BadRequest("media_url must be an https URL".to_string()));
    }
    Ok(url)
}

/// Validates a send request and turns it into an outbound message.
pub(crate) fn outbound_from_request(req: &SendMessageRequest) -> Result<Outbound<'_>, AppError> {
    let caption = req.body.as_deref().map(str::trim).filter(|b| !b.is_empty());
    match req.kind {
        OutboundKind::Text => {
            let body = required(&req.body, "body", "text")?;
            if body.chars().count() > 4096 {
                return Err(AppError::BadRequest(
                    "Text messages are limited to 4096 characters".to_string(),
                ));
            }
            Ok(Outbound::Text { body })
        }
        OutboundKind::Image => Ok(Outbound::Image {
            link: https_url(&req.media_url, "image")?,
            caption,
        }),
        OutboundKind::Document => Ok(Outbound::Document {
            link: https_url(&req.media_url, "document")?,
            filename: req.filename.as_deref().map(str::trim).filter(|f| !f.is_empty()),
            caption,
        }),
        OutboundKind::Template => Ok(Outbound::Template {
            name: required(&req.template_name, "template_name", "template")?,
            language_code: req
                .language_code
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .unwrap_or("en"),
            params: &req.params,
        }),
    }
}

/// Caption used when sharing a catalog product.
pub(crate) fn product_caption(product: &Product) -> String {
    let mut caption = format!("{}\n₹{}", product.name, product.price);
    if let Some(description) = product
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
    {
        caption.push('\n');
        caption.push_str(description);
    }
    caption
}

/// GET /api/v1/chats
///
/// Contacts ordered by their latest message, with preview and unread count.
#[utoipa::path(
    get,
    path = "/api/v1/chats",
    params(
        ("q" = Option<String>, Query,),
        ("page" = Option<i64>, Query,),
        ("per_page" = Option<i64>, Query,)
    ),
    responses((status = 200, description = "Page of chats")),
    tag = "chats"
)]
pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<ChatListParams>,
) -> Result<Json<Page<ChatSummary>>, AppError> {
    Ok(Json(state.storage.list_chats(user.id(), &params).await?))
}

/// GET /api/v1/contacts/:id/messages
///
/// Newest first. Opening a conversation clears its unread count.
#[utoipa::path(
    get,
    path = "/api/v1/contacts/{id}/messages",
    params(
        ("id" = Uuid, Path, description = "Contact id"),
        ("before" = Option<String>, Query, description = "RFC 3339 timestamp, exclusive"),
        ("limit" = Option<i64>, Query, description = "At most 100, default 50")
    ),
    responses((status = 200, description = "Messages, newest first")),
    tag = "chats"
)]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Query(params): Query<MessageHistoryParams>,
) -> Result<Json<Vec<Message>>, AppError> {
    let contact = state.storage.get_contact(user.id(), id).await?;
    let messages = state
        .storage
        .list_messages(user.id(), contact.id, params.before, params.limit)
        .await?;

    if contact.unread_count > 0 {
        state.storage.reset_unread(user.id(), contact.id).await?;
    }
    Ok(Json(messages))
}

/// POST /api/v1/contacts/:id/messages
///
/// The message is stored as `pending` first; a provider failure marks it
/// `failed` and is returned as 502.
#[utoipa::path(
    post,
    path = "/api/v1/contacts/{id}/messages",
    params(("id" = Uuid, Path, description = "Contact id")),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Sent message"),
        (status = 400, description = "Invalid message, blocked contact or WhatsApp not connected"),
        (status = 502, description = "WhatsApp rejected the message")
    ),
    tag = "chats"
)]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    let outbound = outbound_from_request(&req)?;
    let credentials = user.whatsapp()?;
    let contact = state.storage.get_contact(user.id(), id).await?;

    let message = state.sender(&credentials).deliver(&contact, outbound).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /api/v1/contacts/:id/share-product
#[utoipa::path(
    post,
    path = "/api/v1/contacts/{id}/share-product",
    params(("id" = Uuid, Path, description = "Contact id")),
    request_body = ShareProductRequest,
    responses((status = 201, description = "Sent message")),
    tag = "chats"
)]
pub async fn share_product(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<ShareProductRequest>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    let credentials = user.whatsapp()?;
    let contact = state.storage.get_contact(user.id(), id).await?;
    let product = state.storage.get_product(user.id(), req.product_id).await?;

    let caption = product_caption(&product);
    let outbound = match product.image_url.as_deref() {
        Some(link) => Outbound::Image {
            link,
            caption: Some(&caption),
        },
        None => Outbound::Text { body: &caption },
    };

    let message = state.sender(&credentials).deliver(&contact, outbound).await?;
    tracing::info!("✓ Product {} shared with contact {}", product.id, contact.id);
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /api/v1/contacts/:id/read
///
/// Clears the unread count and sends a read receipt for the latest inbound
/// message. The receipt is best effort.
#[utoipa::path(
    post,
    path = "/api/v1/contacts/{id}/read",
    params(("id" = Uuid, Path, description = "Contact id")),
    responses((status = 204, description = "Marked as read")),
    tag = "chats"
)]
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let contact = state.storage.get_contact(user.id(), id).await?;
    state.storage.reset_unread(user.id(), contact.id).await?;

    if let Ok(credentials) = user.whatsapp() {
        if let Some(wa_id) = state.storage.last_inbound_wa_id(user.id(), contact.id).await? {
            if let Err(e) = state.whatsapp.mark_as_read(&credentials, &wa_id).await {
                tracing::warn!("Read receipt for {} failed: {}", wa_id, e);
            }
        }
    }

    let refreshed = state.storage.get_contact(user.id(), contact.id).await?;
    state.events.publish(
        user.id(),
        EventPayload::ContactUpdated { contact: refreshed },
    );
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use std::str::FromStr;

    fn request(json: &str) -> SendMessageRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn text_requires_body() {
        assert!(outbound_from_request(&request(r#"{"type":"text"}"#)).is_err());
        assert!(outbound_from_request(&request(r#"{"type":"text","body":"  "}"#)).is_err());
        let req = request(r#"{"type":"text","body":"Namaste"}"#);
        assert!(matches!(
            outbound_from_request(&req).unwrap(),
            Outbound::Text { body: "Namaste" }
        ));
    }

    #[test]
    fn media_requires_https_url() {
        let req = request(r#"{"type":"image","media_url":"http://x/a.png"}"#);
        assert!(outbound_from_request(&req).is_err());
        let req = request(r#"{"type":"document","media_url":"https://x/a.pdf","filename":"a.pdf"}"#);
        match outbound_from_request(&req).unwrap() {
            Outbound::Document { link, filename, caption } => {
                assert_eq!(link, "https://x/a.pdf");
                assert_eq!(filename, Some("a.pdf"));
                assert_eq!(caption, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn template_defaults_language() {
        let req = request(r#"{"type":"template","template_name":"order_ready","params":["Asha"]}"#);
        match outbound_from_request(&req).unwrap() {
            Outbound::Template { name, language_code, params } => {
                assert_eq!(name, "order_ready");
                assert_eq!(language_code, "en");
                assert_eq!(params, &["Asha".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(outbound_from_request(&request(r#"{"type":"template"}"#)).is_err());
    }

    #[test]
    fn product_caption_format() {
        let now = Utc::now();
        let mut product = Product {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Brass diya".to_string(),
            description: Some("Hand polished".to_string()),
            price: BigDecimal::from_str("349.00").unwrap(),
            currency: "INR".to_string(),
            sku: None,
            stock: Some(12),
            image_url: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(product_caption(&product), "Brass diya\n₹349.00\nHand polished");
        product.description = None;
        assert_eq!(product_caption(&product), "Brass diya\n₹349.00");
    }
}
