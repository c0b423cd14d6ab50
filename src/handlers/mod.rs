//! HTTP handlers and the shared application state.

pub mod assistant;
pub mod broadcasts;
pub mod chats;
pub mod contacts;
pub mod dashboard;
pub mod groups;
pub mod orders;
pub mod payments;
pub mod products;
pub mod quotations;
pub mod realtime;
pub mod tags;

use axum::{extract::State, http::StatusCode, Json};
use moka::future::Cache;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::assistant::AssistantClient;
use crate::circuit_breaker::create_api_circuit_breaker;
use crate::config::Config;
use crate::errors::AppError;
use crate::events::EventBus;
use crate::gateway_client::PaymentGatewayClient;
use crate::media::MediaClient;
use crate::outbound::Sender;
use crate::storage::Storage;
use crate::whatsapp_client::{WhatsAppClient, WhatsAppCredentials};

/// Shared application state injected into handlers.
pub struct AppState {
    pub config: Config,
    pub storage: Storage,
    /// Realtime fan-out to connected dashboards.
    pub events: Arc<EventBus>,
    pub whatsapp: WhatsAppClient,
    /// `None` when Razorpay credentials are not configured.
    pub payment_gateway: Option<PaymentGatewayClient>,
    /// `None` when Cloudinary credentials are not configured.
    pub media: Option<MediaClient>,
    /// `None` when no Gemini key is configured.
    pub assistant: Option<AssistantClient>,
    /// Provider message ids seen recently (10 minutes), ahead of the unique index.
    pub seen_messages: Cache<String, ()>,
    /// phone_number_id -> owning user (1 hour).
    pub phone_owner_cache: Cache<String, Uuid>,
}

impl AppState {
    pub fn new(config: Config, pool: PgPool) -> Result<Self, AppError> {
        let whatsapp = WhatsAppClient::new(
            &config.whatsapp_api_base_url,
            &config.whatsapp_api_version,
            create_api_circuit_breaker(),
        )?;
        tracing::info!(
            "✓ WhatsApp client initialized: {}/{}",
            config.whatsapp_api_base_url,
            config.whatsapp_api_version
        );

        let payment_gateway = match &config.razorpay {
            Some(credentials) => {
                let client = PaymentGatewayClient::new(&config.razorpay_base_url, credentials)?;
                tracing::info!("✓ Razorpay client initialized");
                Some(client)
            }
            None => None,
        };

        let media = match &config.cloudinary {
            Some(credentials) => {
                let client = MediaClient::new(&config.cloudinary_base_url, credentials.clone())?;
                tracing::info!("✓ Cloudinary client initialized");
                Some(client)
            }
            None => None,
        };

        let assistant = match &config.gemini_api_key {
            Some(key) => {
                let client =
                    AssistantClient::new(&config.gemini_base_url, &config.gemini_model, key)?;
                tracing::info!("✓ Gemini assistant initialized ({})", config.gemini_model);
                Some(client)
            }
            None => None,
        };

        let seen_messages = Cache::builder()
            .time_to_live(Duration::from_secs(600))
            .max_capacity(100_000)
            .build();

        let phone_owner_cache = Cache::builder()
            .time_to_live(Duration::from_secs(3600))
            .max_capacity(10_000)
            .build();

        Ok(Self {
            config,
            storage: Storage::new(pool),
            events: Arc::new(EventBus::default()),
            whatsapp,
            payment_gateway,
            media,
            assistant,
            seen_messages,
            phone_owner_cache,
        })
    }

    /// Outbound sender bound to one business's credentials.
    pub fn sender<'a>(&'a self, credentials: &'a WhatsAppCredentials) -> Sender<'a> {
        Sender {
            storage: &self.storage,
            whatsapp: &self.whatsapp,
            events: &self.events,
            credentials,
        }
    }

    pub fn payment_gateway(&self) -> Result<&PaymentGatewayClient, AppError> {
        self.payment_gateway
            .as_ref()
            .ok_or_else(|| AppError::NotConfigured("Payment gateway is not configured".to_string()))
    }

    pub fn media(&self) -> Result<&MediaClient, AppError> {
        self.media
            .as_ref()
            .ok_or_else(|| AppError::NotConfigured("Image hosting is not configured".to_string()))
    }

    pub fn assistant(&self) -> Result<&AssistantClient, AppError> {
        self.assistant
            .as_ref()
            .ok_or_else(|| AppError::NotConfigured("AI assistant is not configured".to_string()))
    }
}

/// Health check endpoint.
///
/// Reports whether the database answers; the process itself is up if this
/// responds at all.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database = match state.storage.ping().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::error!("Health check database ping failed: {}", e);
            "unavailable"
        }
    };

    let status = if database == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if database == "ok" { "healthy" } else { "degraded" },
            "service": "vyapar-connect",
            "version": env!("CARGO_PKG_VERSION"),
            "database": database,
            "realtime_subscribers": state.events.receiver_count(),
        })),
    )
}

/// Rejects empty or whitespace-only required text.
pub(crate) fn require_text<'a>(value: &'a str, field: &str) -> Result<&'a str, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(format!("{} cannot be empty", field)));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_text_trims_and_rejects_blank() {
        assert_eq!(require_text("  Asha ", "name").unwrap(), "Asha");
        let err = require_text("   ", "name").unwrap_err();
        assert!(err.to_string().contains("name cannot be empty"));
    }
}
