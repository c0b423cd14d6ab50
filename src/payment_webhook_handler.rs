use crate::errors::{AppError, ResultExt};
use crate::handlers::payments::{publish_payment, send_receipt};
use crate::handlers::AppState;
use crate::signatures::verify_hmac_sha256_hex;
use crate::webhook_models::RazorpayEvent;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

const SOURCE: &str = "razorpay";

/// Razorpay webhook
///
/// `payment_link.paid` settles the pending payment behind the link and applies
/// it to its order or quotation. `payment.failed` only notes the declined
/// attempt since the link stays payable; an expired or cancelled link fails
/// its payment. Every other event is acknowledged and ignored.
///
/// Authentication: `X-Razorpay-Signature` (hex HMAC-SHA256 of the raw body).
pub async fn razorpay_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let secret = state
        .config
        .razorpay_webhook_secret
        .as_deref()
        .ok_or_else(|| {
            AppError::NotConfigured("Razorpay webhook secret is not configured".to_string())
        })?;

    let signature = headers
        .get("x-razorpay-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Razorpay-Signature header".to_string()))?;
    if !verify_hmac_sha256_hex(secret.as_bytes(), &body, signature) {
        tracing::warn!("Invalid Razorpay webhook signature");
        return Err(AppError::Unauthorized("Invalid webhook signature".to_string()));
    }

    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid webhook payload: {}", e)))?;
    let event: RazorpayEvent = serde_json::from_value(raw.clone())
        .map_err(|e| AppError::BadRequest(format!("Invalid Razorpay event: {}", e)))?;

    tracing::info!("Received Razorpay event {}", event.event);

    let handled = matches!(
        event.event.as_str(),
        "payment_link.paid" | "payment.failed" | "payment_link.expired" | "payment_link.cancelled"
    );
    if !handled {
        tracing::debug!("Ignoring Razorpay event {}", event.event);
        return Ok(ack("ignored"));
    }

    let external_id = external_id(&event)?;
    if !state
        .storage
        .record_webhook_event(SOURCE, &external_id, &raw)
        .await?
    {
        tracing::info!("Duplicate Razorpay event {}", external_id);
        return Ok(ack("duplicate"));
    }

    let outcome = match event.event.as_str() {
        "payment_link.paid" => handle_link_paid(&state, &event).await,
        "payment.failed" => handle_attempt_failed(&state, &event).await,
        _ => handle_link_closed(&state, &event).await,
    };

    // A failed row stays visible for reconciliation; the provider is not
    // asked to retry a delivery that is already recorded.
    let error = outcome.as_ref().err().map(|e| e.to_string());
    if let Some(error) = &error {
        tracing::error!("Razorpay event {} failed: {}", external_id, error);
    }
    state
        .storage
        .finish_webhook_event(SOURCE, &external_id, error.as_deref())
        .await?;

    Ok(ack("processed"))
}

fn ack(status: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": status })))
}

/// Idempotency key. A paid link is keyed by the gateway payment id so the
/// same money is never applied twice.
fn external_id(event: &RazorpayEvent) -> Result<String, AppError> {
    let key = match event.event.as_str() {
        "payment_link.paid" => event.payment_id().map(str::to_string),
        _ => event
            .payment_id()
            .or_else(|| event.link_id())
            .map(|id| format!("{}:{}", event.event, id)),
    };
    key.ok_or_else(|| {
        AppError::BadRequest(format!("{} event without a payment or link id", event.event))
    })
}

async fn handle_link_paid(state: &AppState, event: &RazorpayEvent) -> Result<(), AppError> {
    let link_id = event
        .link_id()
        .ok_or_else(|| AppError::BadRequest("payment_link.paid without a link id".to_string()))?;
    let gateway_payment_id = event
        .payment_id()
        .ok_or_else(|| AppError::BadRequest("payment_link.paid without a payment".to_string()))?;

    let Some(applied) = state
        .storage
        .capture_link_payment(link_id, gateway_payment_id)
        .await?
    else {
        return Ok(());
    };

    let user = state
        .storage
        .get_user(applied.payment.user_id)
        .await
        .context("Loading the owner of a paid link")?;
    tracing::info!(
        "✓ Payment link {} paid: ₹{} (balance due ₹{})",
        link_id,
        applied.payment.amount,
        applied.balance_due
    );
    publish_payment(state, user.id, &applied);
    send_receipt(state, &user, &applied).await;
    Ok(())
}

/// A declined attempt. The link stays open, so the payment stays pending.
async fn handle_attempt_failed(state: &AppState, event: &RazorpayEvent) -> Result<(), AppError> {
    let Some(payment_id) = event.local_payment_id() else {
        tracing::debug!("payment.failed not tied to one of our payment links");
        return Ok(());
    };
    let reason = event.error_description().unwrap_or("payment attempt failed");

    match state
        .storage
        .record_link_attempt_failure(payment_id, reason)
        .await?
    {
        Some(payment) => tracing::info!(
            "Payment {} attempt declined, link still open: {}",
            payment.id,
            reason
        ),
        None => tracing::debug!("No pending link payment {}", payment_id),
    }
    Ok(())
}

/// The link expired or was cancelled: its pending payment fails.
async fn handle_link_closed(state: &AppState, event: &RazorpayEvent) -> Result<(), AppError> {
    let link_id = event
        .link_id()
        .ok_or_else(|| AppError::BadRequest(format!("{} without a link id", event.event)))?;

    match state.storage.fail_link_payment(link_id, &event.event).await? {
        Some(payment) => tracing::info!(
            "Payment {} failed: link {} {}",
            payment.id,
            link_id,
            event.event
        ),
        None => tracing::debug!("No pending payment for link {}", link_id),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> RazorpayEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn paid_links_are_keyed_by_payment_id() {
        let paid = event(
            r#"{"event":"payment_link.paid","payload":{
                "payment_link":{"entity":{"id":"plink_1"}},
                "payment":{"entity":{"id":"pay_1"}}}}"#,
        );
        assert_eq!(external_id(&paid).unwrap(), "pay_1");
    }

    #[test]
    fn failures_are_keyed_by_event_and_id() {
        let expired = event(
            r#"{"event":"payment_link.expired","payload":{"payment_link":{"entity":{"id":"plink_2"}}}}"#,
        );
        assert_eq!(external_id(&expired).unwrap(), "payment_link.expired:plink_2");

        let empty = event(r#"{"event":"payment.failed","payload":{}}"#);
        assert!(external_id(&empty).is_err());
    }
}
