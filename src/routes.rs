//! HTTP routing, middleware stack and the OpenAPI document.

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth;
use crate::errors::AppError;
use crate::handlers::{self, AppState};
use crate::models;
use crate::payment_webhook_handler;
use crate::webhook_handler;

/// 5MB: enough for a base64 product image.
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    info(title = "VyaparConnect API", description = "WhatsApp Business CRM for small shops"),
    paths(
        handlers::contacts::list_contacts,
        handlers::contacts::create_contact,
        handlers::contacts::get_contact,
        handlers::contacts::update_contact,
        handlers::contacts::delete_contact,
        handlers::contacts::attach_tags,
        handlers::contacts::detach_tag,
        handlers::tags::list_tags,
        handlers::tags::create_tag,
        handlers::tags::delete_tag,
        handlers::groups::list_groups,
        handlers::groups::create_group,
        handlers::groups::get_group,
        handlers::groups::update_group_members,
        handlers::groups::delete_group,
        handlers::products::list_products,
        handlers::products::create_product,
        handlers::products::get_product,
        handlers::products::update_product,
        handlers::products::delete_product,
        handlers::products::upload_product_image,
        handlers::chats::list_chats,
        handlers::chats::list_messages,
        handlers::chats::send_message,
        handlers::chats::share_product,
        handlers::chats::mark_read,
        handlers::quotations::list_quotations,
        handlers::quotations::create_quotation,
        handlers::quotations::get_quotation,
        handlers::quotations::update_quotation,
        handlers::quotations::change_quotation_status,
        handlers::quotations::send_quotation,
        handlers::quotations::convert_quotation,
        handlers::quotations::record_quotation_payment,
        handlers::orders::list_orders,
        handlers::orders::create_order,
        handlers::orders::get_order,
        handlers::orders::change_order_status,
        handlers::orders::record_order_payment,
        handlers::orders::create_payment_link,
        handlers::payments::list_payments,
        handlers::payments::get_payment,
        handlers::broadcasts::create_broadcast,
        handlers::broadcasts::list_broadcasts,
        handlers::broadcasts::get_broadcast,
        handlers::assistant::chat,
        handlers::dashboard::dashboard,
        handlers::dashboard::outstanding,
        handlers::dashboard::me,
        handlers::dashboard::update_whatsapp,
    ),
    components(schemas(
        models::CreateContactRequest,
        models::UpdateContactRequest,
        models::AttachTagsRequest,
        models::CreateTagRequest,
        models::CreateGroupRequest,
        models::UpdateGroupMembersRequest,
        models::CreateProductRequest,
        models::UpdateProductRequest,
        models::UploadImageRequest,
        models::LineItemInput,
        models::CreateQuotationRequest,
        models::UpdateQuotationRequest,
        models::StatusChangeRequest,
        models::CreateOrderRequest,
        models::RecordPaymentRequest,
        models::PaymentLinkRequest,
        models::OutboundKind,
        models::SendMessageRequest,
        models::ShareProductRequest,
        models::CreateBroadcastRequest,
        models::ChatTurn,
        models::AssistantChatRequest,
        models::ToolCallSummary,
        models::AssistantChatResponse,
        models::UpdateWhatsAppRequest,
        models::DashboardSummary,
    )),
    modifiers(&SecurityAddon),
    security(("bearer_token" = [])),
    tags(
        (name = "contacts"), (name = "tags"), (name = "groups"), (name = "products"),
        (name = "chats"), (name = "quotations"), (name = "orders"), (name = "payments"),
        (name = "broadcasts"), (name = "assistant"), (name = "dashboard"), (name = "profile")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_token",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some("API token issued by create_api_user"))
                        .build(),
                ),
            );
        }
    }
}

/// Authenticated business API under `/api/v1`.
fn api_routes(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    use handlers::{
        assistant, broadcasts, chats, contacts, dashboard, groups, orders, payments, products,
        quotations, tags,
    };

    Router::new()
        // Contacts, tags, groups
        .route(
            "/contacts",
            get(contacts::list_contacts).post(contacts::create_contact),
        )
        .route(
            "/contacts/:id",
            get(contacts::get_contact)
                .patch(contacts::update_contact)
                .delete(contacts::delete_contact),
        )
        .route("/contacts/:id/tags", post(contacts::attach_tags))
        .route("/contacts/:id/tags/:tag_id", delete(contacts::detach_tag))
        .route("/tags", get(tags::list_tags).post(tags::create_tag))
        .route("/tags/:id", delete(tags::delete_tag))
        .route("/groups", get(groups::list_groups).post(groups::create_group))
        .route(
            "/groups/:id",
            get(groups::get_group).delete(groups::delete_group),
        )
        .route("/groups/:id/members", post(groups::update_group_members))
        // Catalog
        .route(
            "/products",
            get(products::list_products).post(products::create_product),
        )
        .route(
            "/products/:id",
            get(products::get_product)
                .patch(products::update_product)
                .delete(products::delete_product),
        )
        .route("/products/:id/image", post(products::upload_product_image))
        // Chats
        .route("/chats", get(chats::list_chats))
        .route(
            "/contacts/:id/messages",
            get(chats::list_messages).post(chats::send_message),
        )
        .route("/contacts/:id/share-product", post(chats::share_product))
        .route("/contacts/:id/read", post(chats::mark_read))
        // Billing
        .route(
            "/quotations",
            get(quotations::list_quotations).post(quotations::create_quotation),
        )
        .route(
            "/quotations/:id",
            get(quotations::get_quotation).patch(quotations::update_quotation),
        )
        .route(
            "/quotations/:id/status",
            post(quotations::change_quotation_status),
        )
        .route("/quotations/:id/send", post(quotations::send_quotation))
        .route("/quotations/:id/convert", post(quotations::convert_quotation))
        .route(
            "/quotations/:id/payments",
            post(quotations::record_quotation_payment),
        )
        .route("/orders", get(orders::list_orders).post(orders::create_order))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/status", post(orders::change_order_status))
        .route("/orders/:id/payments", post(orders::record_order_payment))
        .route("/orders/:id/payment-link", post(orders::create_payment_link))
        .route("/payments", get(payments::list_payments))
        .route("/payments/:id", get(payments::get_payment))
        // Campaigns and assistant
        .route(
            "/broadcasts",
            get(broadcasts::list_broadcasts).post(broadcasts::create_broadcast),
        )
        .route("/broadcasts/:id", get(broadcasts::get_broadcast))
        .route("/assistant/chat", post(assistant::chat))
        // Dashboard and profile
        .route("/dashboard", get(dashboard::dashboard))
        .route("/dashboard/outstanding", get(dashboard::outstanding))
        .route("/me", get(dashboard::me))
        .route("/me/whatsapp", put(dashboard::update_whatsapp))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
}

/// Builds the full application router.
///
/// `/health`, the provider webhooks and the realtime socket sit outside the
/// rate limiter; the webhooks authenticate by signature and the socket by
/// its `token` query parameter.
pub fn build_router(state: Arc<AppState>) -> Result<Router, AppError> {
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(state.config.rate_limit_per_second)
            .burst_size(state.config.rate_limit_burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| {
                AppError::InternalError(
                    "Rate limit settings must be positive (RATE_LIMIT_PER_SECOND, RATE_LIMIT_BURST)"
                        .to_string(),
                )
            })?,
    );

    let rate_limited = Router::new()
        .nest("/api/v1", api_routes(&state))
        .layer(GovernorLayer {
            config: governor_conf,
        });

    let public = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/realtime", get(handlers::realtime::realtime))
        .route(
            "/webhooks/whatsapp",
            get(webhook_handler::verify_whatsapp_webhook).post(webhook_handler::whatsapp_webhook),
        )
        .route(
            "/webhooks/razorpay",
            post(payment_webhook_handler::razorpay_webhook),
        );

    let app = Router::new()
        .merge(public)
        .merge(rate_limited)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Request size limit (prevents memory exhaustion)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_the_business_api() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/contacts"));
        assert!(doc.paths.paths.contains_key("/api/v1/orders/{id}/payment-link"));
        assert!(doc.paths.paths.contains_key("/api/v1/assistant/chat"));
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_token"));
        assert!(components.schemas.contains_key("CreateOrderRequest"));
    }
}
