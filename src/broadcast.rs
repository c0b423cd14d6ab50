//! Background execution of a broadcast campaign.

use std::sync::Arc;

use crate::events::{EventBus, EventPayload};
use crate::models::{Broadcast, BroadcastStatus, Contact};
use crate::outbound::{Outbound, Sender};
use crate::storage::Storage;
use crate::validation::render_placeholders;
use crate::whatsapp_client::{WhatsAppClient, WhatsAppCredentials};

/// The message of a campaign: an approved template, or free text with
/// `{{name}}`/`{{phone}}` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub enum CampaignContent {
    Template {
        name: String,
        language_code: String,
        params: Vec<String>,
    },
    Body(String),
}

impl CampaignContent {
    /// Parameters and bodies personalized for one recipient.
    pub fn personalize(&self, contact: &Contact) -> CampaignContent {
        match self {
            CampaignContent::Template {
                name,
                language_code,
                params,
            } => CampaignContent::Template {
                name: name.clone(),
                language_code: language_code.clone(),
                params: params
                    .iter()
                    .map(|p| render_placeholders(p, &contact.name, &contact.phone))
                    .collect(),
            },
            CampaignContent::Body(body) => {
                CampaignContent::Body(render_placeholders(body, &contact.name, &contact.phone))
            }
        }
    }

    fn as_outbound(&self) -> Outbound<'_> {
        match self {
            CampaignContent::Template {
                name,
                language_code,
                params,
            } => Outbound::Template {
                name,
                language_code,
                params,
            },
            CampaignContent::Body(body) => Outbound::Text { body },
        }
    }
}

/// Everything the background task needs; owned so it can outlive the request.
pub struct BroadcastJob {
    pub broadcast: Broadcast,
    pub content: CampaignContent,
    pub recipients: Vec<Contact>,
    pub credentials: WhatsAppCredentials,
}

fn progress(broadcast: &Broadcast) -> EventPayload {
    EventPayload::BroadcastProgress {
        broadcast_id: broadcast.id,
        status: broadcast.status.clone(),
        total: broadcast.total_recipients,
        sent: broadcast.sent_count,
        failed: broadcast.failed_count,
    }
}

/// Sends to every recipient in turn, recording each outcome, then settles
/// the campaign status. Never returns an error: failures are recorded per
/// recipient and logged.
pub async fn run_broadcast(
    storage: Storage,
    whatsapp: WhatsAppClient,
    events: Arc<EventBus>,
    job: BroadcastJob,
) {
    let broadcast_id = job.broadcast.id;
    let user_id = job.broadcast.user_id;
    let sender = Sender {
        storage: &storage,
        whatsapp: &whatsapp,
        events: &events,
        credentials: &job.credentials,
    };

    tracing::info!(
        "Broadcast {} started: {} recipient(s)",
        broadcast_id,
        job.recipients.len()
    );

    let mut latest = job.broadcast.clone();
    for contact in &job.recipients {
        let content = job.content.personalize(contact);
        let outcome = sender.deliver(contact, content.as_outbound()).await;

        let recorded = match outcome {
            Ok(message) => {
                let wa_id = message.wa_message_id.unwrap_or_default();
                storage
                    .mark_recipient_sent(broadcast_id, contact.id, &wa_id)
                    .await
            }
            Err(e) => {
                tracing::warn!(
                    "Broadcast {} to {} failed: {}",
                    broadcast_id,
                    contact.phone,
                    e
                );
                storage
                    .mark_recipient_failed(broadcast_id, contact.id, &e.to_string())
                    .await
            }
        };

        match recorded {
            Ok(updated) => {
                events.publish(user_id, progress(&updated));
                latest = updated;
            }
            Err(e) => tracing::error!(
                "Broadcast {}: could not record outcome for contact {}: {}",
                broadcast_id,
                contact.id,
                e
            ),
        }
    }

    let status = BroadcastStatus::from_counts(latest.sent_count, latest.failed_count);
    match storage.finish_broadcast(broadcast_id, status).await {
        Ok(finished) => {
            tracing::info!(
                "✓ Broadcast {} {}: {} sent, {} failed",
                broadcast_id,
                finished.status,
                finished.sent_count,
                finished.failed_count
            );
            events.publish(user_id, progress(&finished));
        }
        Err(e) => tracing::error!("Broadcast {} could not be finished: {}", broadcast_id, e),
    }
}

/// Detaches [`run_broadcast`] onto the runtime.
pub fn spawn_broadcast(
    storage: Storage,
    whatsapp: WhatsAppClient,
    events: Arc<EventBus>,
    job: BroadcastJob,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_broadcast(storage, whatsapp, events, job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn contact(name: &str, phone: &str) -> Contact {
        let now = Utc::now();
        Contact {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: name.to_string(),
            phone: phone.to_string(),
            email: None,
            company: None,
            notes: None,
            is_blocked: false,
            unread_count: 0,
            last_message_at: None,
            last_message_preview: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn body_placeholders_are_rendered_per_contact() {
        let content = CampaignContent::Body("Hi {{name}}, Diwali sale starts today!".to_string());
        assert_eq!(
            content.personalize(&contact("Asha", "+919812345678")),
            CampaignContent::Body("Hi Asha, Diwali sale starts today!".to_string())
        );
    }

    #[test]
    fn template_params_are_rendered_per_contact() {
        let content = CampaignContent::Template {
            name: "festival_offer".to_string(),
            language_code: "en".to_string(),
            params: vec!["{{name}}".to_string(), "20%".to_string()],
        };
        match content.personalize(&contact("Ravi", "+919800000001")) {
            CampaignContent::Template { params, .. } => {
                assert_eq!(params, vec!["Ravi".to_string(), "20%".to_string()])
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
