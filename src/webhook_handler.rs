use crate::errors::AppError;
use crate::events::EventPayload;
use crate::handlers::AppState;
use crate::models::{MessageDirection, MessageStatus};
use crate::signatures::{constant_time_compare, verify_meta_signature};
use crate::storage::NewMessage;
use crate::validation::{preview, wa_id_to_e164};
use crate::webhook_models::{
    ChangeValue, InboundMessage, ProfileContact, StatusUpdate, VerifyParams, WebhookResponse,
    WhatsAppPayload,
};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

/// WhatsApp subscription handshake.
///
/// Meta calls this once when the webhook URL is registered and expects the
/// challenge echoed back as plain text.
pub async fn verify_whatsapp_webhook(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let mode_ok = params.mode.as_deref() == Some("subscribe");
    let token_ok = params
        .verify_token
        .as_deref()
        .map(|token| constant_time_compare(token, &state.config.whatsapp_verify_token))
        .unwrap_or(false);

    match (mode_ok && token_ok, params.challenge) {
        (true, Some(challenge)) => {
            tracing::info!("✓ WhatsApp webhook verified");
            (StatusCode::OK, challenge).into_response()
        }
        _ => {
            tracing::warn!("WhatsApp webhook verification rejected");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// WhatsApp Cloud API webhook
///
/// Receives inbound messages and delivery statuses for every connected
/// business. The raw body is needed for the signature, so JSON is parsed
/// here rather than by an extractor.
///
/// Authentication: `X-Hub-Signature-256` when `WHATSAPP_APP_SECRET` is set.
pub async fn whatsapp_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookResponse>), AppError> {
    validate_meta_signature(&state, &headers, &body)?;

    let payload: WhatsAppPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid webhook payload: {}", e)))?;

    let mut received = 0;
    let mut processed = 0;
    let mut duplicates = 0;

    for change in payload.entry.iter().flat_map(|entry| entry.changes.iter()) {
        let value = &change.value;
        received += value.messages.len() + value.statuses.len();

        let Some(owner) = resolve_change_owner(&state, value).await else {
            continue;
        };

        for message in &value.messages {
            match process_inbound_message(&state, owner, &value.contacts, message).await {
                Ok(ProcessResult::Processed) => processed += 1,
                Ok(ProcessResult::Duplicate) => {
                    duplicates += 1;
                    tracing::debug!("Skipped duplicate message {}", message.id);
                }
                Err(e) => tracing::error!("Failed to process message {}: {}", message.id, e),
            }
        }

        for status in &value.statuses {
            match process_status_update(&state, owner, status).await {
                Ok(ProcessResult::Processed) => processed += 1,
                Ok(ProcessResult::Duplicate) => duplicates += 1,
                Err(e) => tracing::error!("Failed to apply status for {}: {}", status.id, e),
            }
        }
    }

    tracing::info!(
        "WhatsApp webhook complete: {} received, {} processed, {} duplicates",
        received,
        processed,
        duplicates
    );

    Ok((
        StatusCode::OK,
        Json(WebhookResponse {
            status: "received".to_string(),
            received,
            processed,
            duplicates,
        }),
    ))
}

fn validate_meta_signature(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), AppError> {
    // Without an app secret the check is skipped (warned at startup).
    let Some(ref app_secret) = state.config.whatsapp_app_secret else {
        return Ok(());
    };

    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Hub-Signature-256 header".to_string()))?;

    if !verify_meta_signature(app_secret, body, signature) {
        tracing::warn!("Invalid WhatsApp webhook signature");
        return Err(AppError::Unauthorized("Invalid webhook signature".to_string()));
    }
    Ok(())
}

#[derive(Debug, PartialEq)]
enum ProcessResult {
    Processed,
    /// Already seen, or a status that would not move the message forward.
    Duplicate,
}

/// Business that owns the phone number a change was delivered to.
async fn resolve_change_owner(state: &AppState, value: &ChangeValue) -> Option<Uuid> {
    let Some(metadata) = &value.metadata else {
        tracing::warn!("Webhook change without metadata skipped");
        return None;
    };
    let phone_number_id = metadata.phone_number_id.as_str();

    if let Some(user_id) = state.phone_owner_cache.get(phone_number_id).await {
        return Some(user_id);
    }

    match state.storage.find_user_by_phone_number_id(phone_number_id).await {
        Ok(Some(user)) => {
            state
                .phone_owner_cache
                .insert(phone_number_id.to_string(), user.id)
                .await;
            Some(user.id)
        }
        Ok(None) => {
            tracing::warn!(
                "No business connected for phone number id {}; skipping",
                phone_number_id
            );
            None
        }
        Err(e) => {
            tracing::error!("Owner lookup for {} failed: {}", phone_number_id, e);
            None
        }
    }
}

fn profile_name<'a>(contacts: &'a [ProfileContact], wa_id: &str) -> Option<&'a str> {
    contacts
        .iter()
        .find(|c| c.wa_id == wa_id)
        .and_then(|c| c.profile.as_ref())
        .and_then(|p| p.name.as_deref())
}

async fn process_inbound_message(
    state: &AppState,
    user_id: Uuid,
    contacts: &[ProfileContact],
    message: &InboundMessage,
) -> Result<ProcessResult, AppError> {
    // 1. Cheap check against recently seen ids
    if state.seen_messages.contains_key(&message.id) {
        return Ok(ProcessResult::Duplicate);
    }

    // 2. Sender becomes (or already is) a contact
    let phone = wa_id_to_e164(&message.from);
    let (contact, created) = state
        .storage
        .upsert_inbound_contact(user_id, &phone, profile_name(contacts, &message.from))
        .await?;
    if created {
        tracing::info!("✓ New contact {} from inbound message", contact.phone);
    }

    // 3. Store; the unique provider id catches what the cache missed
    let content = message.content();
    let stored = state
        .storage
        .insert_message(&NewMessage {
            user_id,
            contact_id: contact.id,
            wa_message_id: Some(&message.id),
            direction: MessageDirection::Inbound,
            message_type: content.message_type,
            body: Some(&content.body),
            media_url: None,
            status: MessageStatus::Received,
            created_at: message.sent_at(),
        })
        .await?;
    state.seen_messages.insert(message.id.clone(), ()).await;

    let Some(stored) = stored else {
        return Ok(ProcessResult::Duplicate);
    };

    // 4. Chat list bookkeeping, then notify dashboards
    let contact = state
        .storage
        .record_inbound_activity(contact.id, &preview(&content.body), stored.created_at)
        .await?;

    tracing::debug!(
        "Inbound {} message from {} stored",
        stored.message_type,
        contact.phone
    );
    state.events.publish(
        user_id,
        EventPayload::MessageReceived {
            message: stored,
            contact,
        },
    );

    Ok(ProcessResult::Processed)
}

async fn process_status_update(
    state: &AppState,
    user_id: Uuid,
    status: &StatusUpdate,
) -> Result<ProcessResult, AppError> {
    let Some(next) = MessageStatus::parse(&status.status) else {
        tracing::debug!("Ignoring unknown status '{}' for {}", status.status, status.id);
        return Ok(ProcessResult::Duplicate);
    };
    let error = status.error_text();

    let Some(message) = state
        .storage
        .apply_message_status(user_id, &status.id, next, error.as_deref())
        .await?
    else {
        return Ok(ProcessResult::Duplicate);
    };

    let recipients = state
        .storage
        .update_recipient_status(user_id, &status.id, next.as_str(), error.as_deref())
        .await?;
    if recipients > 0 {
        tracing::debug!("Broadcast recipient {} now {}", status.id, next.as_str());
    }

    if let Some(error) = &error {
        tracing::warn!("Message {} failed: {}", status.id, error);
    }

    state.events.publish(
        user_id,
        EventPayload::MessageStatus {
            message_id: message.id,
            contact_id: message.contact_id,
            wa_message_id: message.wa_message_id.clone(),
            status: message.status.clone(),
        },
    );

    Ok(ProcessResult::Processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook_models::Profile;

    #[test]
    fn profile_name_matches_sender() {
        let contacts = vec![
            ProfileContact {
                wa_id: "919800000001".to_string(),
                profile: Some(Profile {
                    name: Some("Ravi".to_string()),
                }),
            },
            ProfileContact {
                wa_id: "919800000002".to_string(),
                profile: None,
            },
        ];
        assert_eq!(profile_name(&contacts, "919800000001"), Some("Ravi"));
        assert_eq!(profile_name(&contacts, "919800000002"), None);
        assert_eq!(profile_name(&contacts, "919800000003"), None);
    }
}
