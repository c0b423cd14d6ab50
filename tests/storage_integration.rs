use bigdecimal::BigDecimal;
use serde_json::json;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vyapar_connect::auth::{authenticate, generate_api_token, hash_token};
use vyapar_connect::billing::{OrderStatus, PaymentMethod, QuotationStatus};
use vyapar_connect::broadcast::{run_broadcast, BroadcastJob, CampaignContent};
use vyapar_connect::circuit_breaker::create_api_circuit_breaker;
use vyapar_connect::db::Database;
use vyapar_connect::errors::AppError;
use vyapar_connect::events::EventBus;
use vyapar_connect::models::{
    CreateProductRequest, LineItemInput, MessageDirection, MessageStatus, User,
};
use vyapar_connect::storage::{
    BroadcastTarget, NewBroadcast, NewMessage, NewOrder, NewQuotation, Storage,
};
use vyapar_connect::validation::e164_to_wa_id;
use vyapar_connect::whatsapp_client::{WhatsAppClient, WhatsAppCredentials};

fn d(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

async fn storage() -> anyhow::Result<Storage> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;
    let db = Database::new(&db_url).await?;
    Ok(Storage::new(db.pool.clone()))
}

/// Unique Indian mobile number per run.
fn phone() -> String {
    format!("+9198{:08}", Uuid::new_v4().as_u128() % 100_000_000)
}

/// Billing smoke test: quotation → payment → conversion → order payments.
/// Marked ignored to avoid touching a real database by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn quotation_to_paid_order_smoke_test() -> anyhow::Result<()> {
    let storage = storage().await?;

    let token = generate_api_token();
    let email = format!("owner-{}@example.com", Uuid::new_v4());
    let user = storage
        .create_user("Asha", &email, "Asha Traders", &hash_token(&token))
        .await?;
    assert_eq!(authenticate(&storage, &token).await?.id, user.id);

    let contact = storage
        .create_contact(user.id, "Ravi Kumar", &phone(), None, Some("Kumar Stores"), None)
        .await?;
    let product = storage
        .create_product(
            user.id,
            &CreateProductRequest {
                name: "Basmati Rice 5kg".to_string(),
                description: None,
                price: d("450.00"),
                currency: None,
                sku: None,
                stock: Some(100),
                image_url: None,
                is_active: None,
            },
        )
        .await?;

    let lines = storage
        .resolve_lines(
            user.id,
            &[
                LineItemInput {
                    product_id: Some(product.id),
                    name: None,
                    quantity: 2,
                    unit_price: None,
                },
                LineItemInput {
                    product_id: None,
                    name: Some("Delivery".to_string()),
                    quantity: 1,
                    unit_price: Some(d("100")),
                },
            ],
        )
        .await?;

    // 2 x 450 + 100 = 1000, minus 100 discount, plus 5% tax = 945
    let quotation = storage
        .create_quotation(
            user.id,
            NewQuotation {
                contact_id: contact.id,
                lines,
                discount: d("100"),
                tax_rate: d("5"),
                valid_until: None,
                notes: None,
            },
        )
        .await?;
    assert!(quotation.quotation.quote_number.starts_with("QT-"));
    assert_eq!(quotation.quotation.total, d("945.00"));

    storage
        .set_quotation_status(user.id, quotation.quotation.id, QuotationStatus::Sent)
        .await?;
    let advance = storage
        .record_quotation_payment(
            user.id,
            quotation.quotation.id,
            &d("300"),
            PaymentMethod::Upi,
            None,
        )
        .await?;
    assert!(!advance.fully_paid);
    assert_eq!(advance.balance_due, d("645.00"));

    let order = storage.convert_quotation(user.id, quotation.quotation.id).await?;
    assert!(order.order.order_number.starts_with("ORD-"));
    assert_eq!(order.order.status, OrderStatus::Confirmed.as_str());
    assert_eq!(order.order.amount_paid, d("300.00"));

    // Converting twice is refused.
    let again = storage.convert_quotation(user.id, quotation.quotation.id).await;
    assert!(matches!(again, Err(AppError::Billing(_))));

    let overpay = storage
        .record_order_payment(user.id, order.order.id, &d("1000"), PaymentMethod::Cash, None)
        .await;
    assert!(matches!(overpay, Err(AppError::Billing(_))));

    let settled = storage
        .record_order_payment(user.id, order.order.id, &d("645"), PaymentMethod::Cash, None)
        .await?;
    assert!(settled.fully_paid);
    assert_eq!(settled.order.as_ref().map(|o| o.payment_status.as_str()), Some("paid"));

    let cancel = storage
        .set_order_status(user.id, order.order.id, OrderStatus::Cancelled)
        .await;
    assert!(matches!(cancel, Err(AppError::Billing(_))));

    Ok(())
}

/// Inbound de-duplication and forward-only delivery statuses.
#[tokio::test]
#[ignore]
async fn message_dedup_and_status_smoke_test() -> anyhow::Result<()> {
    let storage = storage().await?;

    let email = format!("owner-{}@example.com", Uuid::new_v4());
    let user = storage
        .create_user("Meena", &email, "Meena Sarees", &hash_token(&generate_api_token()))
        .await?;

    let number = phone();
    let (contact, created) = storage
        .upsert_inbound_contact(user.id, &number, Some("Priya"))
        .await?;
    assert!(created);
    assert_eq!(contact.name, "Priya");
    let (same, created) = storage.upsert_inbound_contact(user.id, &number, Some("Other")).await?;
    assert!(!created);
    assert_eq!(same.id, contact.id);

    let wa_id = format!("wamid.{}", Uuid::new_v4());
    let inbound = NewMessage {
        user_id: user.id,
        contact_id: contact.id,
        wa_message_id: Some(&wa_id),
        direction: MessageDirection::Inbound,
        message_type: "text",
        body: Some("Do you have red sarees?"),
        media_url: None,
        status: MessageStatus::Received,
        created_at: None,
    };
    assert!(storage.insert_message(&inbound).await?.is_some());
    assert!(storage.insert_message(&inbound).await?.is_none());

    let outbound = storage
        .insert_message(&NewMessage {
            user_id: user.id,
            contact_id: contact.id,
            wa_message_id: None,
            direction: MessageDirection::Outbound,
            message_type: "text",
            body: Some("Yes, 12 designs"),
            media_url: None,
            status: MessageStatus::Pending,
            created_at: None,
        })
        .await?
        .ok_or_else(|| anyhow::anyhow!("outbound insert returned nothing"))?;
    let out_wa_id = format!("wamid.{}", Uuid::new_v4());
    storage.mark_message_sent(outbound.id, &out_wa_id).await?;

    // Another owner cannot move this message.
    let stranger = owner(&storage, "Stranger").await?;
    let foreign = storage
        .apply_message_status(stranger.id, &out_wa_id, MessageStatus::Read, None)
        .await?;
    assert!(foreign.is_none());
    assert_eq!(
        storage
            .update_recipient_status(stranger.id, &out_wa_id, "read", None)
            .await?,
        0
    );

    let read = storage
        .apply_message_status(user.id, &out_wa_id, MessageStatus::Read, None)
        .await?;
    assert_eq!(read.map(|m| m.status), Some("read".to_string()));

    // A late "delivered" must not move the message backwards.
    let late = storage
        .apply_message_status(user.id, &out_wa_id, MessageStatus::Delivered, None)
        .await?;
    assert!(late.is_none());

    Ok(())
}

async fn owner(storage: &Storage, name: &str) -> anyhow::Result<User> {
    let email = format!("owner-{}@example.com", Uuid::new_v4());
    Ok(storage
        .create_user(name, &email, "Test Traders", &hash_token(&generate_api_token()))
        .await?)
}

/// An unpaid order with a single ₹500 line.
async fn order_of_500(storage: &Storage, user_id: Uuid) -> anyhow::Result<Uuid> {
    let contact = storage
        .create_contact(user_id, "Kiran", &phone(), None, None, None)
        .await?;
    let lines = storage
        .resolve_lines(
            user_id,
            &[LineItemInput {
                product_id: None,
                name: Some("Steel tiffin".to_string()),
                quantity: 1,
                unit_price: Some(d("500")),
            }],
        )
        .await?;
    let order = storage
        .create_order(
            user_id,
            NewOrder {
                contact_id: contact.id,
                lines,
                discount: d("0"),
                tax_rate: d("0"),
                shipping_address: None,
                notes: None,
            },
        )
        .await?;
    Ok(order.order.id)
}

/// A declined attempt keeps the link payable; the later capture settles the order.
#[tokio::test]
#[ignore]
async fn failed_link_attempt_then_paid_settles_order() -> anyhow::Result<()> {
    let storage = storage().await?;
    let user = owner(&storage, "Kiran").await?;
    let order_id = order_of_500(&storage, user.id).await?;

    let draft = storage.create_link_payment(user.id, order_id).await?;
    assert_eq!(draft.payment.amount, d("500.00"));
    let link_id = format!("plink_{}", Uuid::new_v4().simple());
    storage
        .attach_payment_link(draft.payment.id, &link_id, "https://rzp.io/i/test")
        .await?;

    let failed_key = format!("payment.failed:pay_{}", Uuid::new_v4().simple());
    let payload = json!({"event": "payment.failed"});
    assert!(storage.record_webhook_event("razorpay", &failed_key, &payload).await?);
    assert!(!storage.record_webhook_event("razorpay", &failed_key, &payload).await?);

    let attempt = storage
        .record_link_attempt_failure(draft.payment.id, "Payment declined by bank")
        .await?
        .ok_or_else(|| anyhow::anyhow!("pending link payment not found"))?;
    assert_eq!(attempt.status, "pending");
    assert_eq!(attempt.notes.as_deref(), Some("Payment declined by bank"));

    let gateway_id = format!("pay_{}", Uuid::new_v4().simple());
    let applied = storage
        .capture_link_payment(&link_id, &gateway_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("capture after a failed attempt was dropped"))?;
    assert!(applied.fully_paid);
    assert_eq!(applied.payment.status, "captured");
    assert_eq!(applied.payment.gateway_reference.as_deref(), Some(gateway_id.as_str()));
    assert_eq!(applied.order.as_ref().map(|o| o.payment_status.as_str()), Some("paid"));

    // A redelivered capture applies nothing.
    assert!(storage.capture_link_payment(&link_id, &gateway_id).await?.is_none());
    let order = storage.get_order_detail(user.id, order_id).await?;
    assert_eq!(order.order.amount_paid, d("500.00"));

    Ok(())
}

/// An expired link fails its pending payment and later attempts leave it alone.
#[tokio::test]
#[ignore]
async fn closed_link_fails_pending_payment() -> anyhow::Result<()> {
    let storage = storage().await?;
    let user = owner(&storage, "Lata").await?;
    let order_id = order_of_500(&storage, user.id).await?;

    let draft = storage.create_link_payment(user.id, order_id).await?;
    let link_id = format!("plink_{}", Uuid::new_v4().simple());
    storage
        .attach_payment_link(draft.payment.id, &link_id, "https://rzp.io/i/test")
        .await?;

    let failed = storage
        .fail_link_payment(&link_id, "payment_link.expired")
        .await?
        .ok_or_else(|| anyhow::anyhow!("pending link payment not found"))?;
    assert_eq!(failed.status, "failed");
    assert!(storage.fail_link_payment(&link_id, "payment_link.expired").await?.is_none());
    assert!(storage
        .record_link_attempt_failure(draft.payment.id, "late decline")
        .await?
        .is_none());

    let order = storage.get_order_detail(user.id, order_id).await?;
    assert_eq!(order.order.amount_paid, d("0.00"));
    assert_eq!(order.order.payment_status, "unpaid");

    Ok(())
}

/// One recipient accepted, one rejected by WhatsApp: both outcomes are
/// recorded and the campaign ends partially failed.
#[tokio::test]
#[ignore]
async fn broadcast_records_each_recipient_outcome() -> anyhow::Result<()> {
    let storage = storage().await?;
    let user = owner(&storage, "Nisha").await?;
    let reachable = storage
        .create_contact(user.id, "Anil", &phone(), None, None, None)
        .await?;
    let unreachable = storage
        .create_contact(user.id, "Bhavna", &phone(), None, None, None)
        .await?;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v19.0/PNID/messages"))
        .and(body_partial_json(json!({"to": e164_to_wa_id(&reachable.phone)})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messaging_product": "whatsapp",
            "messages": [{ "id": "wamid.broadcast-ok" }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v19.0/PNID/messages"))
        .and(body_partial_json(json!({"to": e164_to_wa_id(&unreachable.phone)})))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "Recipient phone number not in allowed list", "code": 131030 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let target = BroadcastTarget::Contacts(vec![reachable.id, unreachable.id, reachable.id]);
    let recipients = storage.resolve_recipients(user.id, &target).await?;
    assert_eq!(recipients.len(), 2);

    let broadcast = storage
        .create_broadcast(
            user.id,
            &NewBroadcast {
                name: "Diwali offer".to_string(),
                template_name: None,
                language_code: "en".to_string(),
                template_params: Vec::new(),
                message_body: Some("Hi {{name}}, 20% off this week".to_string()),
                target,
            },
            &recipients,
        )
        .await?;

    let events = Arc::new(EventBus::new(64));
    let mut progress = events.subscribe(user.id);
    let whatsapp = WhatsAppClient::new(&server.uri(), "v19.0", create_api_circuit_breaker())?;
    run_broadcast(
        storage.clone(),
        whatsapp,
        events.clone(),
        BroadcastJob {
            broadcast: broadcast.clone(),
            content: CampaignContent::Body("Hi {{name}}, 20% off this week".to_string()),
            recipients,
            credentials: WhatsAppCredentials {
                phone_number_id: "PNID".to_string(),
                access_token: "token".to_string(),
            },
        },
    )
    .await;

    let detail = storage.get_broadcast_detail(user.id, broadcast.id).await?;
    assert_eq!(detail.broadcast.status, "partially_failed");
    assert_eq!(detail.broadcast.sent_count, 1);
    assert_eq!(detail.broadcast.failed_count, 1);
    for recipient in &detail.recipients {
        if recipient.contact_id == reachable.id {
            assert_eq!(recipient.status, "sent");
            assert_eq!(recipient.wa_message_id.as_deref(), Some("wamid.broadcast-ok"));
        } else {
            assert_eq!(recipient.status, "failed");
            assert!(recipient
                .error_message
                .as_deref()
                .is_some_and(|e| e.contains("not in allowed list")));
        }
    }
    assert!(progress.recv().await.is_some());

    Ok(())
}
