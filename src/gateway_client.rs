use bigdecimal::{BigDecimal, ToPrimitive};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::billing::round_money;
use crate::config::RazorpayConfig;
use crate::errors::AppError;

/// A hosted payment page created at the gateway.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PaymentLink {
    pub id: String,
    pub short_url: String,
    pub status: String,
}

/// Details printed on the gateway's payment page.
#[derive(Debug, Clone)]
pub struct PaymentLinkRequest<'a> {
    pub amount_paise: i64,
    pub currency: &'a str,
    pub description: &'a str,
    /// Our payment id. Sent as `reference_id` and copied into the link's
    /// notes, which Razorpay repeats on every payment attempt.
    pub reference_id: &'a str,
    pub customer_name: &'a str,
    pub customer_phone: &'a str,
}

/// Client for the Razorpay payment links API.
#[derive(Clone)]
pub struct PaymentGatewayClient {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl PaymentGatewayClient {
    pub fn new(base_url: &str, credentials: &RazorpayConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create Razorpay client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id: credentials.key_id.clone(),
            key_secret: credentials.key_secret.clone(),
        })
    }

    /// Creates a payment link for `amount_paise` (smallest currency unit).
    pub async fn create_payment_link(
        &self,
        req: &PaymentLinkRequest<'_>,
    ) -> Result<PaymentLink, AppError> {
        let url = format!("{}/v1/payment_links", self.base_url);
        tracing::info!(
            "Creating payment link for {} ({} paise)",
            req.reference_id,
            req.amount_paise
        );

        let body = json!({
            "amount": req.amount_paise,
            "currency": req.currency,
            "accept_partial": false,
            "description": req.description,
            "reference_id": req.reference_id,
            "notes": { "payment_id": req.reference_id },
            "customer": {
                "name": req.customer_name,
                "contact": req.customer_phone,
            },
            "notify": { "sms": false, "email": false },
            "reminder_enable": true,
        });

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Razorpay request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Razorpay returned {}: {}",
                status, error_text
            )));
        }

        let link: PaymentLink = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Razorpay response: {}", e))
        })?;

        tracing::info!("✓ Payment link created: {} {}", link.id, link.short_url);
        Ok(link)
    }
}

/// Rupees to paise, rounding to the nearest paisa first.
pub fn to_paise(amount: &BigDecimal) -> Result<i64, AppError> {
    (round_money(amount) * BigDecimal::from(100))
        .to_i64()
        .ok_or_else(|| AppError::BadRequest(format!("Amount {} is out of range", amount)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn paise_conversion() {
        assert_eq!(to_paise(&BigDecimal::from_str("1499.50").unwrap()).unwrap(), 149950);
        assert_eq!(to_paise(&BigDecimal::from_str("0.005").unwrap()).unwrap(), 1);
        assert_eq!(to_paise(&BigDecimal::from(10)).unwrap(), 1000);
    }

    #[test]
    fn client_creation() {
        let client = PaymentGatewayClient::new(
            "https://api.razorpay.com/",
            &RazorpayConfig {
                key_id: "rzp_test".to_string(),
                key_secret: "secret".to_string(),
            },
        );
        assert!(client.is_ok());
    }
}
