use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::billing::PaymentMethod;

// ============ Database Models ============

/// A business owner. Everything else is scoped by `user_id`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub business_name: String,
    #[serde(skip_serializing)]
    pub api_token_hash: String,
    pub wa_phone_number_id: Option<String>,
    #[serde(skip_serializing)]
    pub wa_access_token: Option<String>,
    pub wa_business_account_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Returns `(phone_number_id, access_token)` when WhatsApp is connected.
    pub fn whatsapp_credentials(&self) -> Option<(String, String)> {
        match (&self.wa_phone_number_id, &self.wa_access_token) {
            (Some(id), Some(token)) => Some((id.clone(), token.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    /// E.164, unique per user.
    pub phone: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub notes: Option<String>,
    pub is_blocked: bool,
    pub unread_count: i32,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TagWithCount {
    pub id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub contact_count: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ContactGroup {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GroupWithCount {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub member_count: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Product {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: BigDecimal,
    pub currency: String,
    pub sku: Option<String>,
    pub stock: Option<i32>,
    pub image_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Quotation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub contact_id: Uuid,
    pub quote_number: String,
    pub status: String,
    pub subtotal: BigDecimal,
    pub discount: BigDecimal,
    pub tax_rate: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total: BigDecimal,
    pub amount_paid: BigDecimal,
    pub valid_until: Option<NaiveDate>,
    pub notes: Option<String>,
    pub converted_order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub contact_id: Uuid,
    pub quotation_id: Option<Uuid>,
    pub order_number: String,
    pub status: String,
    pub payment_status: String,
    pub subtotal: BigDecimal,
    pub discount: BigDecimal,
    pub tax_rate: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total: BigDecimal,
    pub amount_paid: BigDecimal,
    pub shipping_address: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A quotation or order line.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LineItem {
    pub id: Uuid,
    pub product_id: Option<Uuid>,
    pub name: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub line_total: BigDecimal,
    pub position: i32,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub contact_id: Uuid,
    pub order_id: Option<Uuid>,
    pub quotation_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub method: String,
    pub status: String,
    pub gateway_reference: Option<String>,
    pub payment_link_id: Option<String>,
    pub payment_link_url: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub user_id: Uuid,
    pub contact_id: Uuid,
    pub wa_message_id: Option<String>,
    pub direction: String,
    pub message_type: String,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Broadcast {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub template_name: Option<String>,
    pub language_code: String,
    pub template_params: serde_json::Value,
    pub message_body: Option<String>,
    pub target_group_id: Option<Uuid>,
    pub target_tag_id: Option<Uuid>,
    pub status: String,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BroadcastRecipient {
    pub contact_id: Uuid,
    pub contact_name: String,
    pub phone: String,
    pub status: String,
    pub wa_message_id: Option<String>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// ============ Message / Broadcast / Payment record states ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Inbound => "inbound",
            MessageDirection::Outbound => "outbound",
        }
    }
}

/// Delivery state of a message. Outbound messages only move forward
/// (`pending → sent → delivered → read`); `failed` is reachable until the
/// message is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Received,
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Received => "received",
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "received" => Some(MessageStatus::Received),
            "pending" => Some(MessageStatus::Pending),
            "sent" => Some(MessageStatus::Sent),
            "delivered" => Some(MessageStatus::Delivered),
            "read" => Some(MessageStatus::Read),
            "failed" => Some(MessageStatus::Failed),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            MessageStatus::Received | MessageStatus::Pending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            MessageStatus::Failed => 0,
        }
    }

    /// Whether a provider status callback may replace `self` with `next`.
    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        match (self, next) {
            (MessageStatus::Failed, _) | (MessageStatus::Received, _) => false,
            (_, MessageStatus::Failed) => self.rank() < MessageStatus::Delivered.rank(),
            (_, next) => next.rank() > self.rank(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastStatus {
    Sending,
    Completed,
    PartiallyFailed,
    Failed,
}

impl BroadcastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastStatus::Sending => "sending",
            BroadcastStatus::Completed => "completed",
            BroadcastStatus::PartiallyFailed => "partially_failed",
            BroadcastStatus::Failed => "failed",
        }
    }

    pub fn from_counts(sent: i32, failed: i32) -> Self {
        match (sent, failed) {
            (_, 0) => BroadcastStatus::Completed,
            (0, _) => BroadcastStatus::Failed,
            _ => BroadcastStatus::PartiallyFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentRecordStatus {
    Pending,
    Captured,
    Failed,
}

impl PaymentRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRecordStatus::Pending => "pending",
            PaymentRecordStatus::Captured => "captured",
            PaymentRecordStatus::Failed => "failed",
        }
    }
}

// ============ Composite responses ============

#[derive(Debug, Serialize)]
pub struct ContactDetail {
    #[serde(flatten)]
    pub contact: Contact,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Serialize)]
pub struct GroupDetail {
    #[serde(flatten)]
    pub group: ContactGroup,
    pub members: Vec<Contact>,
}

#[derive(Debug, Serialize)]
pub struct QuotationDetail {
    #[serde(flatten)]
    pub quotation: Quotation,
    pub contact_name: String,
    pub balance_due: BigDecimal,
    pub items: Vec<LineItem>,
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub contact_name: String,
    pub balance_due: BigDecimal,
    pub items: Vec<LineItem>,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Serialize)]
pub struct BroadcastDetail {
    #[serde(flatten)]
    pub broadcast: Broadcast,
    pub recipients: Vec<BroadcastRecipient>,
}

/// Contact row with its latest message, for the chat list.
pub type ChatSummary = Contact;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DashboardSummary {
    pub contacts: i64,
    pub unread_chats: i64,
    pub open_quotations: i64,
    pub orders_by_status: BTreeMap<String, i64>,
    #[schema(value_type = String)]
    pub revenue: BigDecimal,
    #[schema(value_type = String)]
    pub collected: BigDecimal,
    #[schema(value_type = String)]
    pub outstanding: BigDecimal,
}

// ============ Pagination ============

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// Normalized `(page, per_page, offset)`: page ≥ 1, per_page in 1..=100, default 20.
pub fn page_window(page: Option<i64>, per_page: Option<i64>) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(20).clamp(1, 100);
    (page, per_page, (page - 1) * per_page)
}

// ============ API Request Models ============

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateContactRequest {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateContactRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub notes: Option<String>,
    pub is_blocked: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContactListParams {
    pub q: Option<String>,
    pub tag: Option<Uuid>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AttachTagsRequest {
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTagRequest {
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateGroupRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub contact_ids: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateGroupMembersRequest {
    #[serde(default)]
    pub add: Vec<Uuid>,
    #[serde(default)]
    pub remove: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductListParams {
    pub q: Option<String>,
    pub active: Option<bool>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: Option<String>,
    #[schema(value_type = String)]
    pub price: BigDecimal,
    pub currency: Option<String>,
    pub sku: Option<String>,
    pub stock: Option<i32>,
    pub image_url: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = Option<String>)]
    pub price: Option<BigDecimal>,
    pub currency: Option<String>,
    pub sku: Option<String>,
    pub stock: Option<i32>,
    pub image_url: Option<String>,
    pub is_active: Option<bool>,
}

/// Image payload: a `data:` URI or an https URL the host can fetch.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UploadImageRequest {
    pub data: String,
}

/// One requested line. With `product_id`, missing name and price are taken
/// from the catalog.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LineItemInput {
    pub product_id: Option<Uuid>,
    pub name: Option<String>,
    pub quantity: i32,
    #[schema(value_type = Option<String>)]
    pub unit_price: Option<BigDecimal>,
}

/// A line with name and price resolved, ready for billing.
#[derive(Debug, Clone)]
pub struct ResolvedLine {
    pub product_id: Option<Uuid>,
    pub name: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateQuotationRequest {
    pub contact_id: Uuid,
    pub items: Vec<LineItemInput>,
    #[schema(value_type = Option<String>)]
    pub discount: Option<BigDecimal>,
    #[schema(value_type = Option<String>)]
    pub tax_rate: Option<BigDecimal>,
    pub valid_until: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateQuotationRequest {
    pub items: Option<Vec<LineItemInput>>,
    #[schema(value_type = Option<String>)]
    pub discount: Option<BigDecimal>,
    #[schema(value_type = Option<String>)]
    pub tax_rate: Option<BigDecimal>,
    pub valid_until: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusChangeRequest {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuotationListParams {
    pub status: Option<String>,
    pub contact_id: Option<Uuid>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub contact_id: Uuid,
    pub items: Vec<LineItemInput>,
    #[schema(value_type = Option<String>)]
    pub discount: Option<BigDecimal>,
    #[schema(value_type = Option<String>)]
    pub tax_rate: Option<BigDecimal>,
    pub shipping_address: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderListParams {
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub contact_id: Option<Uuid>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RecordPaymentRequest {
    #[schema(value_type = String)]
    pub amount: BigDecimal,
    pub method: PaymentMethod,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct PaymentLinkRequest {
    /// Also send the link to the contact on WhatsApp.
    #[serde(default)]
    pub send: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentListParams {
    pub order_id: Option<Uuid>,
    pub quotation_id: Option<Uuid>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    Text,
    Image,
    Document,
    Template,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendMessageRequest {
    #[serde(rename = "type")]
    pub kind: OutboundKind,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub filename: Option<String>,
    pub template_name: Option<String>,
    pub language_code: Option<String>,
    #[serde(default)]
    pub params: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ShareProductRequest {
    pub product_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageHistoryParams {
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatListParams {
    pub q: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateBroadcastRequest {
    pub name: String,
    pub template_name: Option<String>,
    pub language_code: Option<String>,
    #[serde(default)]
    pub params: Vec<String>,
    pub message_body: Option<String>,
    pub group_id: Option<Uuid>,
    pub tag_id: Option<Uuid>,
    pub contact_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct ChatTurn {
    /// `user` or `model`.
    pub role: String,
    pub text: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssistantChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToolCallSummary {
    pub name: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AssistantChatResponse {
    pub reply: String,
    pub tool_calls: Vec<ToolCallSummary>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateWhatsAppRequest {
    pub phone_number_id: String,
    pub access_token: String,
    pub business_account_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_window_clamps() {
        assert_eq!(page_window(None, None), (1, 20, 0));
        assert_eq!(page_window(Some(0), Some(500)), (1, 100, 0));
        assert_eq!(page_window(Some(3), Some(10)), (3, 10, 20));
    }

    #[test]
    fn message_status_only_moves_forward() {
        use MessageStatus::*;
        assert!(Pending.can_advance_to(Sent));
        assert!(Sent.can_advance_to(Read));
        assert!(!Read.can_advance_to(Delivered));
        assert!(!Delivered.can_advance_to(Delivered));
        assert!(Sent.can_advance_to(Failed));
        assert!(!Delivered.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Sent));
    }

    #[test]
    fn broadcast_status_from_counts() {
        assert_eq!(BroadcastStatus::from_counts(5, 0), BroadcastStatus::Completed);
        assert_eq!(BroadcastStatus::from_counts(0, 5), BroadcastStatus::Failed);
        assert_eq!(
            BroadcastStatus::from_counts(3, 2),
            BroadcastStatus::PartiallyFailed
        );
    }

    #[test]
    fn send_message_request_uses_type_field() {
        let req: SendMessageRequest =
            serde_json::from_str(r#"{"type":"text","body":"hello"}"#).unwrap();
        assert_eq!(req.kind, OutboundKind::Text);
        assert!(req.params.is_empty());
    }

    #[test]
    fn money_deserializes_from_string_or_number() {
        let a: RecordPaymentRequest =
            serde_json::from_str(r#"{"amount":"150.50","method":"upi"}"#).unwrap();
        let b: RecordPaymentRequest =
            serde_json::from_str(r#"{"amount":150,"method":"cash"}"#).unwrap();
        assert_eq!(a.amount.to_string(), "150.50");
        assert_eq!(b.amount, BigDecimal::from(150));
        assert_eq!(a.method, PaymentMethod::Upi);
    }
}
