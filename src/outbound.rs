//! Outbound WhatsApp delivery: persist as `pending`, send, then record the
//! provider id or the failure.

use crate::errors::AppError;
use crate::events::{EventBus, EventPayload};
use crate::models::{Contact, Message, MessageDirection, MessageStatus};
use crate::storage::{NewMessage, Storage};
use crate::validation::{e164_to_wa_id, preview};
use crate::whatsapp_client::{WhatsAppClient, WhatsAppCredentials};

/// What to send.
#[derive(Debug, Clone)]
pub enum Outbound<'a> {
    Text {
        body: &'a str,
    },
    Image {
        link: &'a str,
        caption: Option<&'a str>,
    },
    Document {
        link: &'a str,
        filename: Option<&'a str>,
        caption: Option<&'a str>,
    },
    Template {
        name: &'a str,
        language_code: &'a str,
        params: &'a [String],
    },
}

impl Outbound<'_> {
    pub fn message_type(&self) -> &'static str {
        match self {
            Outbound::Text { .. } => "text",
            Outbound::Image { .. } => "image",
            Outbound::Document { .. } => "document",
            Outbound::Template { .. } => "template",
        }
    }

    /// Text kept in the message history.
    pub fn stored_body(&self) -> Option<String> {
        match self {
            Outbound::Text { body } => Some(body.to_string()),
            Outbound::Image { caption, .. } => caption.map(str::to_string),
            Outbound::Document {
                caption, filename, ..
            } => caption.or(*filename).map(str::to_string),
            Outbound::Template { name, params, .. } if params.is_empty() => {
                Some(format!("[template: {}]", name))
            }
            Outbound::Template { name, params, .. } => {
                Some(format!("[template: {}] {}", name, params.join(", ")))
            }
        }
    }

    pub fn media_url(&self) -> Option<&str> {
        match self {
            Outbound::Image { link, .. } | Outbound::Document { link, .. } => Some(*link),
            _ => None,
        }
    }

    fn preview_text(&self) -> String {
        match self {
            Outbound::Image { caption: None, .. } => "📷 Image".to_string(),
            Outbound::Document {
                caption: None,
                filename: None,
                ..
            } => "📄 Document".to_string(),
            _ => preview(&self.stored_body().unwrap_or_default()),
        }
    }
}

/// Everything needed to deliver a message on behalf of one business.
pub struct Sender<'a> {
    pub storage: &'a Storage,
    pub whatsapp: &'a WhatsAppClient,
    pub events: &'a EventBus,
    pub credentials: &'a WhatsAppCredentials,
}

impl Sender<'_> {
    /// Sends to `contact` and returns the stored message. A provider failure
    /// is recorded on the message and returned as the error.
    pub async fn deliver(
        &self,
        contact: &Contact,
        outbound: Outbound<'_>,
    ) -> Result<Message, AppError> {
        if contact.is_blocked {
            return Err(AppError::BadRequest(format!(
                "Contact {} is blocked",
                contact.id
            )));
        }

        let body = outbound.stored_body();
        let pending = self
            .storage
            .insert_message(&NewMessage {
                user_id: contact.user_id,
                contact_id: contact.id,
                wa_message_id: None,
                direction: MessageDirection::Outbound,
                message_type: outbound.message_type(),
                body: body.as_deref(),
                media_url: outbound.media_url(),
                status: MessageStatus::Pending,
                created_at: None,
            })
            .await?
            .ok_or_else(|| AppError::InternalError("Outbound message was not stored".to_string()))?;

        match self.send(contact, &outbound).await {
            Ok(wa_message_id) => {
                let message = self
                    .storage
                    .mark_message_sent(pending.id, &wa_message_id)
                    .await?;
                self.storage
                    .record_outbound_activity(contact.id, &outbound.preview_text())
                    .await?;
                tracing::info!(
                    "✓ Sent {} message {} to contact {}",
                    outbound.message_type(),
                    wa_message_id,
                    contact.id
                );
                self.events.publish(
                    contact.user_id,
                    EventPayload::MessageSent {
                        message: message.clone(),
                    },
                );
                Ok(message)
            }
            Err(e) => {
                tracing::warn!("Send to contact {} failed: {}", contact.id, e);
                let failed = self
                    .storage
                    .mark_message_failed(pending.id, &e.to_string())
                    .await?;
                self.events.publish(
                    contact.user_id,
                    EventPayload::MessageStatus {
                        message_id: failed.id,
                        contact_id: contact.id,
                        wa_message_id: None,
                        status: failed.status.clone(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn send(&self, contact: &Contact, outbound: &Outbound<'_>) -> Result<String, AppError> {
        let to = e164_to_wa_id(&contact.phone);
        let creds = self.credentials;
        match outbound {
            Outbound::Text { body } => self.whatsapp.send_text(creds, &to, body).await,
            Outbound::Image { link, caption } => {
                self.whatsapp.send_image(creds, &to, link, *caption).await
            }
            Outbound::Document {
                link,
                filename,
                caption,
            } => {
                self.whatsapp
                    .send_document(creds, &to, link, *filename, *caption)
                    .await
            }
            Outbound::Template {
                name,
                language_code,
                params,
            } => {
                self.whatsapp
                    .send_template(creds, &to, name, language_code, params)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_body_per_kind() {
        let params = vec!["Asha".to_string(), "ORD-00001".to_string()];
        assert_eq!(
            Outbound::Text { body: "hi" }.stored_body().as_deref(),
            Some("hi")
        );
        assert_eq!(
            Outbound::Image {
                link: "https://img",
                caption: None
            }
            .stored_body(),
            None
        );
        assert_eq!(
            Outbound::Template {
                name: "order_update",
                language_code: "en",
                params: &params
            }
            .stored_body()
            .as_deref(),
            Some("[template: order_update] Asha, ORD-00001")
        );
    }

    #[test]
    fn previews_for_media_without_caption() {
        let doc = Outbound::Document {
            link: "https://files/invoice.pdf",
            filename: None,
            caption: None,
        };
        assert_eq!(doc.preview_text(), "📄 Document");
        assert_eq!(doc.media_url(), Some("https://files/invoice.pdf"));
        assert_eq!(doc.message_type(), "document");
    }
}
