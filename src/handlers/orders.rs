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
use crate::billing::{OrderStatus, PaymentMethod, PaymentStatus};
use crate::errors::AppError;
use crate::events::EventPayload;
use crate::gateway_client::{to_paise, PaymentLinkRequest as GatewayLinkRequest};
use crate::models::{
    CreateOrderRequest, Message, Order, OrderDetail, OrderListParams, Page, Payment,
    PaymentLinkRequest, RecordPaymentRequest, StatusChangeRequest,
};
use crate::outbound::Outbound;
use crate::storage::NewOrder;

#[derive(Debug, Serialize)]
pub struct PaymentLinkCreated {
    pub payment: Payment,
    pub short_url: String,
    /// Present when the link was also sent on WhatsApp.
    pub message: Option<Message>,
}

pub(crate) fn payment_link_text(order_number: &str, amount: &BigDecimal, url: &str) -> String {
    format!(
        "Please pay ₹{} for order {} using this secure link:\n{}",
        amount, order_number, url
    )
}

/// GET /api/v1/orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(
        ("status" = Option<String>, Query,),
        ("payment_status" = Option<String>, Query,),
        ("contact_id" = Option<Uuid>, Query,),
        ("page" = Option<i64>, Query,),
        ("per_page" = Option<i64>, Query,)
    ),
    responses((status = 200, description = "Page of orders")),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<OrderListParams>,
) -> Result<Json<Page<Order>>, AppError> {
    if let Some(status) = &params.status {
        OrderStatus::from_str(status)?;
    }
    if let Some(payment_status) = &params.payment_status {
        PaymentStatus::from_str(payment_status)?;
    }
    Ok(Json(state.storage.list_orders(user.id(), &params).await?))
}

/// POST /api/v1/orders
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses((status = 201, description = "Order with items"), (status = 422, description = "Billing rule violated")),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderDetail>), AppError> {
    state.storage.get_contact(user.id(), req.contact_id).await?;
    let lines = state.storage.resolve_lines(user.id(), &req.items).await?;

    let detail = state
        .storage
        .create_order(
            user.id(),
            NewOrder {
                contact_id: req.contact_id,
                lines,
                discount: req.discount.unwrap_or_else(BigDecimal::zero),
                tax_rate: req.tax_rate.unwrap_or_else(BigDecimal::zero),
                shipping_address: req.shipping_address,
                notes: req.notes,
            },
        )
        .await?;

    tracing::info!(
        "✓ Order {} created, total ₹{}",
        detail.order.order_number,
        detail.order.total
    );
    state.events.publish(
        user.id(),
        EventPayload::OrderUpdated {
            order: detail.order.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(detail)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses((status = 200, description = "Order with items and payments"), (status = 404, description = "Not found")),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderDetail>, AppError> {
    Ok(Json(state.storage.get_order_detail(user.id(), id).await?))
}

/// POST /api/v1/orders/:id/status
///
/// `pending → confirmed → processing → shipped → delivered`, with
/// cancellation before shipping for orders that have no payments.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = StatusChangeRequest,
    responses((status = 200, description = "Order in its new status"), (status = 422, description = "Transition not allowed")),
    tag = "orders"
)]
pub async fn change_order_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusChangeRequest>,
) -> Result<Json<Order>, AppError> {
    let next = OrderStatus::from_str(req.status.trim())?;
    let order = state.storage.set_order_status(user.id(), id, next).await?;

    tracing::info!("Order {} -> {}", order.order_number, order.status);
    state.events.publish(
        user.id(),
        EventPayload::OrderUpdated {
            order: order.clone(),
        },
    );
    Ok(Json(order))
}

/// POST /api/v1/orders/:id/payments
///
/// Records an offline payment. Amounts above the balance due are refused.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payments",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = RecordPaymentRequest,
    responses((status = 201, description = "Recorded payment and remaining balance"), (status = 422, description = "Payment refused")),
    tag = "orders"
)]
pub async fn record_order_payment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResult>), AppError> {
    if req.method == PaymentMethod::PaymentLink {
        return Err(AppError::BadRequest(
            "Payment links are settled by the gateway; use POST /payment-link".to_string(),
        ));
    }

    let applied = state
        .storage
        .record_order_payment(user.id(), id, &req.amount, req.method, req.notes.as_deref())
        .await?;

    tracing::info!(
        "✓ Payment ₹{} ({}) recorded on order {}",
        applied.payment.amount,
        applied.payment.method,
        id
    );
    publish_payment(&state, user.id(), &applied);
    send_receipt(&state, &user.0, &applied).await;
    Ok((StatusCode::CREATED, Json(PaymentResult::from(&applied))))
}

/// POST /api/v1/orders/:id/payment-link
///
/// Reserves a pending payment for the outstanding balance, creates a hosted
/// payment link for it and optionally sends the link on WhatsApp.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payment-link",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = PaymentLinkRequest,
    responses(
        (status = 201, description = "Pending payment with link"),
        (status = 502, description = "Gateway refused the link"),
        (status = 503, description = "Gateway not configured")
    ),
    tag = "orders"
)]
pub async fn create_payment_link(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    body: Option<Json<PaymentLinkRequest>>,
) -> Result<(StatusCode, Json<PaymentLinkCreated>), AppError> {
    let gateway = state.payment_gateway()?;
    let send = body.map(|Json(b)| b.send).unwrap_or(false);
    // Fail before reserving anything when the link could not be delivered.
    let credentials = if send { Some(user.whatsapp()?) } else { None };

    let draft = state.storage.create_link_payment(user.id(), id).await?;
    let amount_paise = to_paise(&draft.payment.amount)?;
    let description = format!("Order {}", draft.order.order_number);
    let reference_id = draft.payment.id.to_string();

    let link = match gateway
        .create_payment_link(&GatewayLinkRequest {
            amount_paise,
            currency: "INR",
            description: &description,
            reference_id: &reference_id,
            customer_name: &draft.contact.name,
            customer_phone: &draft.contact.phone,
        })
        .await
    {
        Ok(link) => link,
        Err(e) => {
            state
                .storage
                .mark_payment_failed(draft.payment.id, &e.to_string())
                .await?;
            return Err(e);
        }
    };

    let payment = state
        .storage
        .attach_payment_link(draft.payment.id, &link.id, &link.short_url)
        .await?;
    tracing::info!(
        "✓ Payment link {} created for order {} (₹{})",
        link.id,
        draft.order.order_number,
        payment.amount
    );

    let message = match credentials {
        Some(credentials) => {
            let text = payment_link_text(
                &draft.order.order_number,
                &payment.amount,
                &link.short_url,
            );
            Some(
                state
                    .sender(&credentials)
                    .deliver(&draft.contact, Outbound::Text { body: &text })
                    .await?,
            )
        }
        None => None,
    };

    Ok((
        StatusCode::CREATED,
        Json(PaymentLinkCreated {
            payment,
            short_url: link.short_url,
            message,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_link_text_includes_url() {
        let text = payment_link_text(
            "ORD-00002",
            &BigDecimal::from_str("499.00").unwrap(),
            "https://rzp.io/i/abc",
        );
        assert_eq!(
            text,
            "Please pay ₹499.00 for order ORD-00002 using this secure link:\nhttps://rzp.io/i/abc"
        );
    }
}
