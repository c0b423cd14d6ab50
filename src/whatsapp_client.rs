use failsafe::futures::CircuitBreaker;
use serde_json::{json, Value};
use std::time::Duration;

use crate::circuit_breaker::ApiCircuitBreaker;
use crate::errors::AppError;

/// Per-business credentials for the Cloud API.
#[derive(Debug, Clone)]
pub struct WhatsAppCredentials {
    pub phone_number_id: String,
    pub access_token: String,
}

/// Failure classification used by the circuit breaker: only transport
/// errors and provider 5xx answers count against it.
#[derive(Debug)]
enum CallError {
    Transient(String),
    Rejected(String),
}

impl CallError {
    fn is_transient(&self) -> bool {
        matches!(self, CallError::Transient(_))
    }

    fn into_app_error(self) -> AppError {
        match self {
            CallError::Transient(msg) | CallError::Rejected(msg) => AppError::ExternalApiError(msg),
        }
    }
}

/// Client for the WhatsApp Business Cloud API.
#[derive(Clone)]
pub struct WhatsAppClient {
    client: reqwest::Client,
    base_url: String,
    api_version: String,
    breaker: ApiCircuitBreaker,
}

impl WhatsAppClient {
    pub fn new(
        base_url: &str,
        api_version: &str,
        breaker: ApiCircuitBreaker,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create WhatsApp client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
            breaker,
        })
    }

    fn messages_url(&self, creds: &WhatsAppCredentials) -> String {
        format!(
            "{}/{}/{}/messages",
            self.base_url, self.api_version, creds.phone_number_id
        )
    }

    /// Sends a plain text message. `to` is E.164 (with or without `+`).
    pub async fn send_text(
        &self,
        creds: &WhatsAppCredentials,
        to: &str,
        body: &str,
    ) -> Result<String, AppError> {
        self.send(creds, text_payload(to, body)).await
    }

    pub async fn send_image(
        &self,
        creds: &WhatsAppCredentials,
        to: &str,
        link: &str,
        caption: Option<&str>,
    ) -> Result<String, AppError> {
        self.send(creds, image_payload(to, link, caption)).await
    }

    pub async fn send_document(
        &self,
        creds: &WhatsAppCredentials,
        to: &str,
        link: &str,
        filename: Option<&str>,
        caption: Option<&str>,
    ) -> Result<String, AppError> {
        self.send(creds, document_payload(to, link, filename, caption))
            .await
    }

    /// Sends an approved template with positional body parameters.
    pub async fn send_template(
        &self,
        creds: &WhatsAppCredentials,
        to: &str,
        name: &str,
        language_code: &str,
        body_params: &[String],
    ) -> Result<String, AppError> {
        self.send(creds, template_payload(to, name, language_code, body_params))
            .await
    }

    /// Marks an inbound message as read (blue ticks on the customer's phone).
    pub async fn mark_as_read(
        &self,
        creds: &WhatsAppCredentials,
        message_id: &str,
    ) -> Result<(), AppError> {
        let body = json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": message_id,
        });
        self.post(creds, &body).await.map(|_| ())
    }

    async fn send(&self, creds: &WhatsAppCredentials, body: Value) -> Result<String, AppError> {
        let kind = body
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("message")
            .to_string();
        let response = self.post(creds, &body).await?;

        let message_id = response
            .get("messages")
            .and_then(|m| m.get(0))
            .and_then(|m| m.get("id"))
            .and_then(|id| id.as_str())
            .ok_or_else(|| {
                tracing::warn!("Unexpected WhatsApp response format: {:?}", response);
                AppError::ExternalApiError("WhatsApp response missing message id".to_string())
            })?;

        tracing::info!("✓ WhatsApp {} sent: {}", kind, message_id);
        Ok(message_id.to_string())
    }

    async fn post(&self, creds: &WhatsAppCredentials, body: &Value) -> Result<Value, AppError> {
        let url = self.messages_url(creds);
        let request = self
            .client
            .post(&url)
            .bearer_auth(&creds.access_token)
            .json(body);

        let call = async move {
            let response = request
                .send()
                .await
                .map_err(|e| CallError::Transient(format!("WhatsApp request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                let message = format!(
                    "WhatsApp API returned {}: {}",
                    status,
                    provider_error_message(&error_text)
                );
                return Err(if status.is_server_error() {
                    CallError::Transient(message)
                } else {
                    CallError::Rejected(message)
                });
            }

            response.json::<Value>().await.map_err(|e| {
                CallError::Transient(format!("Failed to parse WhatsApp response: {}", e))
            })
        };

        match self.breaker.call_with(CallError::is_transient, call).await {
            Ok(value) => Ok(value),
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("WhatsApp circuit breaker open, failing fast");
                Err(AppError::ExternalApiError(
                    "WhatsApp API temporarily unavailable".to_string(),
                ))
            }
            Err(failsafe::Error::Inner(e)) => {
                tracing::error!("WhatsApp call failed: {:?}", e);
                Err(e.into_app_error())
            }
        }
    }
}

/// Pulls `error.message` out of a Graph API error body, falling back to the raw text.
fn provider_error_message(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| raw.to_string())
}

fn recipient(to: &str) -> String {
    to.trim().trim_start_matches('+').to_string()
}

pub fn text_payload(to: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": recipient(to),
        "type": "text",
        "text": { "preview_url": true, "body": body },
    })
}

pub fn image_payload(to: &str, link: &str, caption: Option<&str>) -> Value {
    let mut image = json!({ "link": link });
    if let Some(caption) = caption {
        image["caption"] = json!(caption);
    }
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": recipient(to),
        "type": "image",
        "image": image,
    })
}

pub fn document_payload(
    to: &str,
    link: &str,
    filename: Option<&str>,
    caption: Option<&str>,
) -> Value {
    let mut document = json!({ "link": link });
    if let Some(filename) = filename {
        document["filename"] = json!(filename);
    }
    if let Some(caption) = caption {
        document["caption"] = json!(caption);
    }
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": recipient(to),
        "type": "document",
        "document": document,
    })
}

pub fn template_payload(to: &str, name: &str, language_code: &str, body_params: &[String]) -> Value {
    let mut template = json!({
        "name": name,
        "language": { "code": language_code },
    });
    if !body_params.is_empty() {
        let parameters: Vec<Value> = body_params
            .iter()
            .map(|p| json!({ "type": "text", "text": p }))
            .collect();
        template["components"] = json!([{ "type": "body", "parameters": parameters }]);
    }
    json!({
        "messaging_product": "whatsapp",
        "to": recipient(to),
        "type": "template",
        "template": template,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_payload_strips_plus() {
        let payload = text_payload("+919876543210", "hello");
        assert_eq!(payload["to"], "919876543210");
        assert_eq!(payload["type"], "text");
        assert_eq!(payload["text"]["body"], "hello");
    }

    #[test]
    fn template_without_params_has_no_components() {
        let payload = template_payload("919876543210", "diwali_offer", "en", &[]);
        assert!(payload["template"].get("components").is_none());

        let payload = template_payload("919876543210", "order_update", "hi", &["Asha".to_string()]);
        assert_eq!(
            payload["template"]["components"][0]["parameters"][0]["text"],
            "Asha"
        );
        assert_eq!(payload["template"]["language"]["code"], "hi");
    }

    #[test]
    fn provider_errors_are_unwrapped() {
        let raw = r#"{"error":{"message":"Invalid parameter","code":100}}"#;
        assert_eq!(provider_error_message(raw), "Invalid parameter");
        assert_eq!(provider_error_message("gateway timeout"), "gateway timeout");
    }
}
