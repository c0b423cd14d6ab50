use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use bigdecimal::{BigDecimal, Zero};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use super::payments::{publish_payment, send_receipt, PaymentResult};
use super::AppState;
use crate::auth::AuthUser;
use crate::billing::QuotationStatus;
use crate::errors::AppError;
use crate::events::EventPayload;
use crate::models::{
    CreateQuotationRequest, Message, OrderDetail, Page, Quotation, QuotationDetail,
    QuotationListParams, RecordPaymentRequest, StatusChangeRequest, UpdateQuotationRequest,
};
use crate::outbound::Outbound;
use crate::storage::{NewQuotation, QuotationPatch};

#[derive(Debug, Serialize)]
pub struct QuotationSent {
    pub quotation: Quotation,
    pub message: Message,
}

/// Plain-text quotation for WhatsApp (`*bold*` is WhatsApp markup).
pub(crate) fn quotation_text(business_name: &str, detail: &QuotationDetail) -> String {
    let q = &detail.quotation;
    let mut lines = vec![
        format!("*Quotation {}*", q.quote_number),
        format!("From: {}", business_name),
        format!("For: {}", detail.contact_name),
        String::new(),
    ];

    for (idx, item) in detail.items.iter().enumerate() {
        lines.push(format!(
            "{}. {} × {} @ ₹{} = ₹{}",
            idx + 1,
            item.name,
            item.quantity,
            item.unit_price,
            item.line_total
        ));
    }

    lines.push(String::new());
    lines.push(format!("Subtotal: ₹{}", q.subtotal));
    if q.discount > BigDecimal::zero() {
        lines.push(format!("Discount: -₹{}", q.discount));
    }
    if q.tax_amount > BigDecimal::zero() {
        lines.push(format!("Tax ({}%): ₹{}", q.tax_rate.normalized(), q.tax_amount));
    }
    lines.push(format!("*Total: ₹{}*", q.total));
    if let Some(valid_until) = q.valid_until {
        lines.push(format!("Valid until: {}", valid_until.format("%d %b %Y")));
    }
    if let Some(notes) = q.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        lines.push(String::new());
        lines.push(notes.trim().to_string());
    }
    lines.join("\n")
}

/// GET /api/v1/quotations
#[utoipa::path(
    get,
    path = "/api/v1/quotations",
    params(
        ("status" = Option<String>, Query,),
        ("contact_id" = Option<Uuid>, Query,),
        ("page" = Option<i64>, Query,),
        ("per_page" = Option<i64>, Query,)
    ),
    responses((status = 200, description = "Page of quotations")),
    tag = "quotations"
)]
pub async fn list_quotations(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<QuotationListParams>,
) -> Result<Json<Page<Quotation>>, AppError> {
    if let Some(status) = &params.status {
        QuotationStatus::from_str(status)?;
    }
    Ok(Json(state.storage.list_quotations(user.id(), &params).await?))
}

/// POST /api/v1/quotations
///
/// Lines referencing a product take missing names and prices from the catalog.
/// The quotation starts as `draft` with totals computed by the billing rules.
#[utoipa::path(
    post,
    path = "/api/v1/quotations",
    request_body = CreateQuotationRequest,
    responses(
        (status = 201, description = "Quotation with items"),
        (status = 422, description = "Billing rule violated")
    ),
    tag = "quotations"
)]
pub async fn create_quotation(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateQuotationRequest>,
) -> Result<(StatusCode, Json<QuotationDetail>), AppError> {
    state.storage.get_contact(user.id(), req.contact_id).await?;
    let lines = state.storage.resolve_lines(user.id(), &req.items).await?;

    let detail = state
        .storage
        .create_quotation(
            user.id(),
            NewQuotation {
                contact_id: req.contact_id,
                lines,
                discount: req.discount.unwrap_or_else(BigDecimal::zero),
                tax_rate: req.tax_rate.unwrap_or_else(BigDecimal::zero),
                valid_until: req.valid_until,
                notes: req.notes,
            },
        )
        .await?;

    tracing::info!(
        "✓ Quotation {} created, total ₹{}",
        detail.quotation.quote_number,
        detail.quotation.total
    );
    state.events.publish(
        user.id(),
        EventPayload::QuotationUpdated {
            quotation: detail.quotation.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(detail)))
}

#[utoipa::path(
    get,
    path = "/api/v1/quotations/{id}",
    params(("id" = Uuid, Path, description = "Quotation id")),
    responses((status = 200, description = "Quotation with items"), (status = 404, description = "Not found")),
    tag = "quotations"
)]
pub async fn get_quotation(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<QuotationDetail>, AppError> {
    Ok(Json(state.storage.get_quotation_detail(user.id(), id).await?))
}

/// PATCH /api/v1/quotations/:id
///
/// Only `draft` and `sent` quotations can be edited; totals are recomputed.
#[utoipa::path(
    patch,
    path = "/api/v1/quotations/{id}",
    params(("id" = Uuid, Path, description = "Quotation id")),
    request_body = UpdateQuotationRequest,
    responses((status = 200, description = "Updated quotation"), (status = 422, description = "Not editable")),
    tag = "quotations"
)]
pub async fn update_quotation(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateQuotationRequest>,
) -> Result<Json<QuotationDetail>, AppError> {
    let lines = match &req.items {
        Some(items) => Some(state.storage.resolve_lines(user.id(), items).await?),
        None => None,
    };

    let detail = state
        .storage
        .update_quotation(
            user.id(),
            id,
            QuotationPatch {
                lines,
                discount: req.discount,
                tax_rate: req.tax_rate,
                valid_until: req.valid_until,
                notes: req.notes,
            },
        )
        .await?;

    state.events.publish(
        user.id(),
        EventPayload::QuotationUpdated {
            quotation: detail.quotation.clone(),
        },
    );
    Ok(Json(detail))
}

/// POST /api/v1/quotations/:id/status
///
/// Manual transitions only. Conversion has its own endpoint and payment
/// states are reached by recording payments.
#[utoipa::path(
    post,
    path = "/api/v1/quotations/{id}/status",
    params(("id" = Uuid, Path, description = "Quotation id")),
    request_body = StatusChangeRequest,
    responses((status = 200, description = "Quotation in its new status"), (status = 422, description = "Transition not allowed")),
    tag = "quotations"
)]
pub async fn change_quotation_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusChangeRequest>,
) -> Result<Json<Quotation>, AppError> {
    let next = QuotationStatus::from_str(req.status.trim())?;
    match next {
        QuotationStatus::Converted => {
            return Err(AppError::BadRequest(format!(
                "Use POST /api/v1/quotations/{}/convert to convert a quotation",
                id
            )))
        }
        QuotationStatus::PartiallyPaid | QuotationStatus::Paid => {
            return Err(AppError::BadRequest(
                "Payment states are set by recording payments".to_string(),
            ))
        }
        _ => {}
    }

    let quotation = state
        .storage
        .set_quotation_status(user.id(), id, next)
        .await?;
    tracing::info!("Quotation {} -> {}", quotation.quote_number, quotation.status);
    state.events.publish(
        user.id(),
        EventPayload::QuotationUpdated {
            quotation: quotation.clone(),
        },
    );
    Ok(Json(quotation))
}

/// POST /api/v1/quotations/:id/send
///
/// Sends the quotation summary to the contact on WhatsApp. A `draft`
/// quotation becomes `sent`.
#[utoipa::path(
    post,
    path = "/api/v1/quotations/{id}/send",
    params(("id" = Uuid, Path, description = "Quotation id")),
    responses(
        (status = 200, description = "Quotation and the sent message"),
        (status = 400, description = "WhatsApp not connected or contact blocked"),
        (status = 502, description = "WhatsApp rejected the message")
    ),
    tag = "quotations"
)]
pub async fn send_quotation(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<QuotationSent>, AppError> {
    let credentials = user.whatsapp()?;
    let detail = state.storage.get_quotation_detail(user.id(), id).await?;
    let status = QuotationStatus::from_str(&detail.quotation.status)?;
    if status.is_terminal() {
        return Err(AppError::BadRequest(format!(
            "Quotation {} is {} and cannot be sent",
            detail.quotation.quote_number, status
        )));
    }

    let contact = state
        .storage
        .get_contact(user.id(), detail.quotation.contact_id)
        .await?;
    let text = quotation_text(&user.0.business_name, &detail);
    let message = state
        .sender(&credentials)
        .deliver(&contact, Outbound::Text { body: &text })
        .await?;

    let quotation = if status == QuotationStatus::Draft {
        let sent = state
            .storage
            .set_quotation_status(user.id(), id, QuotationStatus::Sent)
            .await?;
        state.events.publish(
            user.id(),
            EventPayload::QuotationUpdated {
                quotation: sent.clone(),
            },
        );
        sent
    } else {
        detail.quotation
    };

    tracing::info!("✓ Quotation {} sent to {}", quotation.quote_number, contact.phone);
    Ok(Json(QuotationSent { quotation, message }))
}

/// POST /api/v1/quotations/:id/convert
///
/// Creates an order from an accepted (or paid) quotation. Payments already
/// taken move to the new order.
#[utoipa::path(
    post,
    path = "/api/v1/quotations/{id}/convert",
    params(("id" = Uuid, Path, description = "Quotation id")),
    responses((status = 201, description = "The new order"), (status = 422, description = "Quotation not convertible")),
    tag = "quotations"
)]
pub async fn convert_quotation(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<OrderDetail>), AppError> {
    let order = state.storage.convert_quotation(user.id(), id).await?;
    let quotation = state.storage.get_quotation(user.id(), id).await?;

    tracing::info!(
        "✓ Quotation {} converted to order {}",
        quotation.quote_number,
        order.order.order_number
    );
    state
        .events
        .publish(user.id(), EventPayload::QuotationUpdated { quotation });
    state.events.publish(
        user.id(),
        EventPayload::OrderUpdated {
            order: order.order.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(order)))
}

/// POST /api/v1/quotations/:id/payments
///
/// Records an advance against a quotation that has been sent or accepted.
#[utoipa::path(
    post,
    path = "/api/v1/quotations/{id}/payments",
    params(("id" = Uuid, Path, description = "Quotation id")),
    request_body = RecordPaymentRequest,
    responses((status = 201, description = "Recorded payment and remaining balance"), (status = 422, description = "Payment refused")),
    tag = "quotations"
)]
pub async fn record_quotation_payment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResult>), AppError> {
    let applied = state
        .storage
        .record_quotation_payment(user.id(), id, &req.amount, req.method, req.notes.as_deref())
        .await?;

    tracing::info!(
        "✓ Payment ₹{} ({}) recorded on quotation {}",
        applied.payment.amount,
        applied.payment.method,
        id
    );
    publish_payment(&state, user.id(), &applied);
    send_receipt(&state, &user.0, &applied).await;
    Ok((StatusCode::CREATED, Json(PaymentResult::from(&applied))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LineItem;
    use chrono::{NaiveDate, Utc};

    fn d(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn sample() -> QuotationDetail {
        let now = Utc::now();
        QuotationDetail {
            quotation: Quotation {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                contact_id: Uuid::new_v4(),
                quote_number: "QT-00003".to_string(),
                status: "draft".to_string(),
                subtotal: d("1000.00"),
                discount: d("100.00"),
                tax_rate: d("18.00"),
                tax_amount: d("162.00"),
                total: d("1062.00"),
                amount_paid: d("0.00"),
                valid_until: NaiveDate::from_ymd_opt(2024, 7, 1),
                notes: Some("Delivery in 3 days".to_string()),
                converted_order_id: None,
                created_at: now,
                updated_at: now,
            },
            contact_name: "Asha".to_string(),
            balance_due: d("1062.00"),
            items: vec![LineItem {
                id: Uuid::new_v4(),
                product_id: None,
                name: "Cotton saree".to_string(),
                quantity: 2,
                unit_price: d("500.00"),
                line_total: d("1000.00"),
                position: 0,
            }],
        }
    }

    #[test]
    fn quotation_text_lists_items_and_totals() {
        let text = quotation_text("Sharma Textiles", &sample());
        assert!(text.starts_with("*Quotation QT-00003*"));
        assert!(text.contains("1. Cotton saree × 2 @ ₹500.00 = ₹1000.00"));
        assert!(text.contains("Discount: -₹100.00"));
        assert!(text.contains("Tax (18%): ₹162.00"));
        assert!(text.contains("*Total: ₹1062.00*"));
        assert!(text.contains("Valid until: 01 Jul 2024"));
        assert!(text.ends_with("Delivery in 3 days"));
    }

    #[test]
    fn zero_discount_and_tax_are_omitted() {
        let mut detail = sample();
        detail.quotation.discount = d("0.00");
        detail.quotation.tax_amount = d("0.00");
        let text = quotation_text("Shop", &detail);
        assert!(!text.contains("Discount"));
        assert!(!text.contains("Tax"));
    }
}
