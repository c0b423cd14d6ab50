use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use bigdecimal::BigDecimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::AppState;
use crate::auth::{whatsapp_credentials, AuthUser};
use crate::errors::AppError;
use crate::events::EventPayload;
use crate::models::{Page, Payment, PaymentListParams, User};
use crate::outbound::Outbound;
use crate::storage::PaymentApplied;

/// Response for a recorded or captured payment.
#[derive(Debug, Serialize)]
pub struct PaymentResult {
    pub payment: Payment,
    pub balance_due: BigDecimal,
    pub fully_paid: bool,
}

impl From<&PaymentApplied> for PaymentResult {
    fn from(applied: &PaymentApplied) -> Self {
        Self {
            payment: applied.payment.clone(),
            balance_due: applied.balance_due.clone(),
            fully_paid: applied.fully_paid,
        }
    }
}

/// Publishes `payment.received` plus the updated document.
pub(crate) fn publish_payment(state: &AppState, user_id: Uuid, applied: &PaymentApplied) {
    state.events.publish(
        user_id,
        EventPayload::PaymentReceived {
            payment: applied.payment.clone(),
            balance_due: applied.balance_due.clone(),
        },
    );
    if let Some(order) = &applied.order {
        state.events.publish(
            user_id,
            EventPayload::OrderUpdated {
                order: order.clone(),
            },
        );
    }
    if let Some(quotation) = &applied.quotation {
        state.events.publish(
            user_id,
            EventPayload::QuotationUpdated {
                quotation: quotation.clone(),
            },
        );
    }
}

pub(crate) fn receipt_text(
    business_name: &str,
    document_number: &str,
    amount: &BigDecimal,
    total: &BigDecimal,
) -> String {
    format!(
        "✅ Payment received\n\nThank you! {} has received ₹{} for {}.\nTotal paid: ₹{}\n{} is now fully paid.",
        business_name, amount, document_number, total, document_number
    )
}

/// Sends a WhatsApp receipt when the payment settled its document.
/// Best effort: failures are logged and swallowed.
pub(crate) async fn send_receipt(state: &AppState, user: &User, applied: &PaymentApplied) {
    if !applied.fully_paid {
        return;
    }

    let (number, total) = match (&applied.order, &applied.quotation) {
        (Some(order), _) => (order.order_number.clone(), order.total.clone()),
        (None, Some(quotation)) => (quotation.quote_number.clone(), quotation.total.clone()),
        (None, None) => return,
    };

    let credentials = match whatsapp_credentials(user) {
        Ok(c) => c,
        Err(_) => {
            tracing::debug!("Skipping receipt for {}: WhatsApp not connected", number);
            return;
        }
    };

    let contact = match state
        .storage
        .get_contact(user.id, applied.payment.contact_id)
        .await
    {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Receipt for {} skipped, contact lookup failed: {}", number, e);
            return;
        }
    };

    let text = receipt_text(&user.business_name, &number, &applied.payment.amount, &total);
    match state
        .sender(&credentials)
        .deliver(&contact, Outbound::Text { body: &text })
        .await
    {
        Ok(_) => tracing::info!("✓ Receipt sent for {}", number),
        Err(e) => tracing::warn!("Receipt for {} not sent: {}", number, e),
    }
}

/// GET /api/v1/payments
#[utoipa::path(
    get,
    path = "/api/v1/payments",
    params(
        ("order_id" = Option<Uuid>, Query,),
        ("quotation_id" = Option<Uuid>, Query,),
        ("status" = Option<String>, Query, description = "pending, captured or failed"),
        ("page" = Option<i64>, Query,),
        ("per_page" = Option<i64>, Query,)
    ),
    responses((status = 200, description = "Page of payments, newest first")),
    tag = "payments"
)]
pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<PaymentListParams>,
) -> Result<Json<Page<Payment>>, AppError> {
    Ok(Json(state.storage.list_payments(user.id(), &params).await?))
}

/// GET /api/v1/payments/:id
#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment id")),
    responses((status = 200, description = "Payment"), (status = 404, description = "Not found")),
    tag = "payments"
)]
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(state.storage.get_payment(user.id(), id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn receipt_mentions_amount_and_document() {
        let text = receipt_text(
            "Sharma Textiles",
            "ORD-00007",
            &BigDecimal::from_str("250.00").unwrap(),
            &BigDecimal::from_str("1250.00").unwrap(),
        );
        assert!(text.contains("Sharma Textiles has received ₹250.00 for ORD-00007"));
        assert!(text.contains("Total paid: ₹1250.00"));
    }
}
