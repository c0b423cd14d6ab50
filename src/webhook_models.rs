use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============ WhatsApp Cloud API ============

/// Query string of the subscription handshake (`GET /webhooks/whatsapp`).
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Top-level notification body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WhatsAppPayload {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WhatsAppEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WhatsAppEntry {
    /// WhatsApp Business Account id
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub changes: Vec<WhatsAppChange>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WhatsAppChange {
    #[serde(default)]
    pub field: Option<String>,
    pub value: ChangeValue,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChangeValue {
    pub metadata: Option<ChangeMetadata>,
    #[serde(default)]
    pub contacts: Vec<ProfileContact>,
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
    #[serde(default)]
    pub statuses: Vec<StatusUpdate>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChangeMetadata {
    pub display_phone_number: Option<String>,
    pub phone_number_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileContact {
    pub wa_id: String,
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InboundMessage {
    pub id: String,
    pub from: String,
    /// Unix seconds, as a string
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: Option<TextBody>,
    pub image: Option<MediaBody>,
    pub document: Option<MediaBody>,
    pub audio: Option<MediaBody>,
    pub video: Option<MediaBody>,
    pub sticker: Option<MediaBody>,
    pub location: Option<LocationBody>,
    pub interactive: Option<InteractiveBody>,
    pub button: Option<ButtonBody>,
    pub order: Option<Value>,
    pub reaction: Option<ReactionBody>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaBody {
    pub id: Option<String>,
    pub mime_type: Option<String>,
    pub caption: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocationBody {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InteractiveBody {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub button_reply: Option<ReplyOption>,
    pub list_reply: Option<ReplyOption>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplyOption {
    pub id: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ButtonBody {
    pub text: Option<String>,
    pub payload: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReactionBody {
    pub emoji: Option<String>,
    pub message_id: Option<String>,
}

/// Stored form of an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageContent {
    pub message_type: &'static str,
    pub body: String,
}

impl InboundMessage {
    /// Normalizes the provider's per-type bodies into one type and text.
    pub fn content(&self) -> MessageContent {
        let with_caption = |label: &str, media: &Option<MediaBody>| {
            media
                .as_ref()
                .and_then(|m| m.caption.clone().or_else(|| m.filename.clone()))
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| format!("[{}]", label))
        };

        let (message_type, body) = match self.kind.as_str() {
            "text" => (
                "text",
                self.text.as_ref().map(|t| t.body.clone()).unwrap_or_default(),
            ),
            "image" => ("image", with_caption("image", &self.image)),
            "document" => ("document", with_caption("document", &self.document)),
            "audio" => ("audio", "[voice message]".to_string()),
            "video" => ("video", with_caption("video", &self.video)),
            "sticker" => ("sticker", "[sticker]".to_string()),
            "location" => (
                "location",
                match &self.location {
                    Some(loc) => match (&loc.name, &loc.address) {
                        (Some(name), Some(address)) => format!("📍 {}, {}", name, address),
                        (Some(name), None) => format!("📍 {}", name),
                        _ => format!("📍 {:.5}, {:.5}", loc.latitude, loc.longitude),
                    },
                    None => "[location]".to_string(),
                },
            ),
            "interactive" => (
                "interactive",
                self.interactive
                    .as_ref()
                    .and_then(|i| i.button_reply.as_ref().or(i.list_reply.as_ref()))
                    .and_then(|r| r.title.clone())
                    .unwrap_or_else(|| "[interactive reply]".to_string()),
            ),
            "button" => (
                "button",
                self.button
                    .as_ref()
                    .and_then(|b| b.text.clone().or_else(|| b.payload.clone()))
                    .unwrap_or_else(|| "[button]".to_string()),
            ),
            "order" => (
                "order",
                self.order
                    .as_ref()
                    .and_then(|o| o.get("product_items"))
                    .and_then(|items| items.as_array())
                    .map(|items| format!("🛒 Order with {} item(s)", items.len()))
                    .unwrap_or_else(|| "🛒 Order".to_string()),
            ),
            "reaction" => (
                "reaction",
                self.reaction
                    .as_ref()
                    .and_then(|r| r.emoji.clone())
                    .unwrap_or_else(|| "[reaction]".to_string()),
            ),
            _ => ("unknown", format!("[unsupported message: {}]", self.kind)),
        };

        MessageContent { message_type, body }
    }

    pub fn sent_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.timestamp
            .as_deref()
            .and_then(|ts| ts.parse::<i64>().ok())
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusUpdate {
    /// Provider message id (`wamid...`)
    pub id: String,
    pub status: String,
    pub timestamp: Option<String>,
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub errors: Vec<StatusError>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusError {
    pub code: Option<i64>,
    pub title: Option<String>,
    pub message: Option<String>,
}

impl StatusUpdate {
    pub fn error_text(&self) -> Option<String> {
        self.errors.first().map(|e| {
            let detail = e
                .message
                .clone()
                .or_else(|| e.title.clone())
                .unwrap_or_else(|| "unknown error".to_string());
            match e.code {
                Some(code) => format!("{} ({})", detail, code),
                None => detail,
            }
        })
    }
}

/// Answer to the provider. Always 200 once the signature checks out.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct WebhookResponse {
    pub status: String,
    pub received: usize,
    pub processed: usize,
    pub duplicates: usize,
}

// ============ Razorpay ============

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RazorpayEvent {
    pub event: String,
    #[serde(default)]
    pub payload: RazorpayPayload,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RazorpayPayload {
    pub payment_link: Option<EntityWrapper<RazorpayPaymentLink>>,
    pub payment: Option<EntityWrapper<RazorpayPayment>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntityWrapper<T> {
    pub entity: T,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RazorpayPaymentLink {
    pub id: String,
    pub status: Option<String>,
    pub reference_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RazorpayPayment {
    pub id: String,
    /// Paise
    pub amount: Option<i64>,
    pub status: Option<String>,
    pub error_description: Option<String>,
    #[serde(default)]
    pub notes: Value,
}

impl RazorpayEvent {
    pub fn link_id(&self) -> Option<&str> {
        self.payload
            .payment_link
            .as_ref()
            .map(|l| l.entity.id.as_str())
    }

    /// Our payment row behind the event: the `payment_id` note that payment
    /// attempts inherit from the link, else the link's `reference_id`.
    pub fn local_payment_id(&self) -> Option<Uuid> {
        let from_notes = self
            .payload
            .payment
            .as_ref()
            .and_then(|p| p.entity.notes.get("payment_id"))
            .and_then(|v| v.as_str());
        let from_link = self
            .payload
            .payment_link
            .as_ref()
            .and_then(|l| l.entity.reference_id.as_deref());
        from_notes
            .or(from_link)
            .and_then(|id| Uuid::parse_str(id).ok())
    }

    pub fn error_description(&self) -> Option<&str> {
        self.payload
            .payment
            .as_ref()
            .and_then(|p| p.entity.error_description.as_deref())
    }

    pub fn payment_id(&self) -> Option<&str> {
        self.payload.payment.as_ref().map(|p| p.entity.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(json: &str) -> InboundMessage {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_full_notification() {
        let raw = r#"{
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "WABA1",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": {"display_phone_number": "919800000000", "phone_number_id": "PNID"},
                        "contacts": [{"profile": {"name": "Asha"}, "wa_id": "919876543210"}],
                        "messages": [{"from": "919876543210", "id": "wamid.1", "timestamp": "1700000000",
                                      "type": "text", "text": {"body": "Price of rice?"}}]
                    }
                }]
            }]
        }"#;
        let payload: WhatsAppPayload = serde_json::from_str(raw).unwrap();
        let value = &payload.entry[0].changes[0].value;
        assert_eq!(value.metadata.as_ref().unwrap().phone_number_id, "PNID");
        assert_eq!(value.contacts[0].profile.as_ref().unwrap().name.as_deref(), Some("Asha"));
        assert_eq!(value.messages[0].content().body, "Price of rice?");
        assert!(value.statuses.is_empty());
        assert_eq!(
            value.messages[0].sent_at().unwrap().timestamp(),
            1_700_000_000
        );
    }

    #[test]
    fn media_and_replies_get_readable_bodies() {
        let img = message(r#"{"from":"1","id":"a","type":"image","image":{"id":"m1","caption":"blue one"}}"#);
        assert_eq!(
            img.content(),
            MessageContent {
                message_type: "image",
                body: "blue one".to_string()
            }
        );

        let audio = message(r#"{"from":"1","id":"b","type":"audio","audio":{"id":"m2"}}"#);
        assert_eq!(audio.content().body, "[voice message]");

        let reply = message(
            r#"{"from":"1","id":"c","type":"interactive","interactive":{"type":"button_reply","button_reply":{"id":"yes","title":"Confirm order"}}}"#,
        );
        assert_eq!(reply.content().body, "Confirm order");

        let odd = message(r#"{"from":"1","id":"d","type":"ephemeral"}"#);
        assert_eq!(odd.content().message_type, "unknown");
    }

    #[test]
    fn status_errors_are_summarized() {
        let status: StatusUpdate = serde_json::from_str(
            r#"{"id":"wamid.9","status":"failed","errors":[{"code":131047,"title":"Re-engagement message"}]}"#,
        )
        .unwrap();
        assert_eq!(status.error_text().as_deref(), Some("Re-engagement message (131047)"));
    }

    #[test]
    fn razorpay_link_paid_event() {
        let event: RazorpayEvent = serde_json::from_str(
            r#"{"entity":"event","event":"payment_link.paid","payload":{
                "payment_link":{"entity":{"id":"plink_1","status":"paid","reference_id":"ORD-00001"}},
                "payment":{"entity":{"id":"pay_1","amount":50000,"status":"captured"}}}}"#,
        )
        .unwrap();
        assert_eq!(event.link_id(), Some("plink_1"));
        assert_eq!(event.payment_id(), Some("pay_1"));
        assert_eq!(event.local_payment_id(), None);
    }

    #[test]
    fn failed_attempt_resolves_through_notes() {
        let event: RazorpayEvent = serde_json::from_str(
            r#"{"entity":"event","event":"payment.failed","payload":{
                "payment":{"entity":{"id":"pay_9","amount":50000,"status":"failed",
                    "error_description":"Payment declined by bank",
                    "notes":{"payment_id":"5f0c2f9e-8d7a-4a51-9f43-0b6a1e2c7d11"}}}}}"#,
        )
        .unwrap();
        assert_eq!(event.link_id(), None);
        assert_eq!(
            event.local_payment_id().map(|id| id.to_string()).as_deref(),
            Some("5f0c2f9e-8d7a-4a51-9f43-0b6a1e2c7d11")
        );
        assert_eq!(event.error_description(), Some("Payment declined by bank"));

        let bare: RazorpayEvent = serde_json::from_str(
            r#"{"event":"payment.failed","payload":{"payment":{"entity":{"id":"pay_9","notes":{}}}}}"#,
        )
        .unwrap();
        assert_eq!(bare.local_payment_id(), None);
    }

    #[test]
    fn expired_link_resolves_through_reference_id() {
        let event: RazorpayEvent = serde_json::from_str(
            r#"{"event":"payment_link.expired","payload":{"payment_link":{"entity":{
                "id":"plink_2","status":"expired",
                "reference_id":"5f0c2f9e-8d7a-4a51-9f43-0b6a1e2c7d11"}}}}"#,
        )
        .unwrap();
        assert_eq!(event.link_id(), Some("plink_2"));
        assert!(event.local_payment_id().is_some());
    }
}
