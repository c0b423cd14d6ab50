use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::Storage;
use crate::billing::{balance_due, OrderStatus, QuotationStatus};
use crate::errors::AppError;
use crate::models::{DashboardSummary, PaymentRecordStatus};

/// An order or quotation with money still owed.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OutstandingItem {
    pub kind: String,
    pub id: Uuid,
    pub number: String,
    pub contact_name: String,
    pub status: String,
    pub total: BigDecimal,
    pub amount_paid: BigDecimal,
    #[sqlx(skip)]
    pub balance_due: BigDecimal,
}

impl Storage {
    /// Business totals. With `since`, order and payment figures only cover
    /// that window; contact and chat counts are always current.
    pub async fn dashboard_summary(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<DashboardSummary, AppError> {
        let (contacts, unread_chats) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT COUNT(*), COUNT(*) FILTER (WHERE unread_count > 0)
            FROM contacts WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        let open_quotations = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM quotations WHERE user_id = $1 AND status = ANY($2)",
        )
        .bind(user_id)
        .bind(
            [
                QuotationStatus::Draft,
                QuotationStatus::Sent,
                QuotationStatus::Accepted,
                QuotationStatus::PartiallyPaid,
            ]
            .iter()
            .map(|s| s.as_str().to_string())
            .collect::<Vec<_>>(),
        )
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT status, COUNT(*) FROM orders
            WHERE user_id = $1 AND ($2::timestamptz IS NULL OR created_at >= $2)
            GROUP BY status
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        let orders_by_status: BTreeMap<String, i64> = rows.into_iter().collect();

        let (revenue, order_paid) = sqlx::query_as::<_, (BigDecimal, BigDecimal)>(
            r#"
            SELECT COALESCE(SUM(total), 0), COALESCE(SUM(amount_paid), 0) FROM orders
            WHERE user_id = $1 AND status <> $2
              AND ($3::timestamptz IS NULL OR created_at >= $3)
            "#,
        )
        .bind(user_id)
        .bind(OrderStatus::Cancelled.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        let collected = sqlx::query_scalar::<_, BigDecimal>(
            r#"
            SELECT COALESCE(SUM(amount), 0) FROM payments
            WHERE user_id = $1 AND status = $2
              AND ($3::timestamptz IS NULL OR paid_at >= $3)
            "#,
        )
        .bind(user_id)
        .bind(PaymentRecordStatus::Captured.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(DashboardSummary {
            contacts,
            unread_chats,
            open_quotations,
            orders_by_status,
            outstanding: balance_due(&revenue, &order_paid),
            revenue,
            collected,
        })
    }

    /// Orders that are not cancelled and quotations awaiting payment, with
    /// their balance, largest first.
    pub async fn outstanding_balances(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<OutstandingItem>, AppError> {
        let mut items = sqlx::query_as::<_, OutstandingItem>(
            r#"
            SELECT * FROM (
                SELECT 'order' AS kind, o.id, o.order_number AS number, c.name AS contact_name,
                       o.status, o.total, o.amount_paid
                FROM orders o JOIN contacts c ON c.id = o.contact_id
                WHERE o.user_id = $1 AND o.status <> $2 AND o.amount_paid < o.total
                UNION ALL
                SELECT 'quotation', q.id, q.quote_number, c.name, q.status, q.total, q.amount_paid
                FROM quotations q JOIN contacts c ON c.id = q.contact_id
                WHERE q.user_id = $1 AND q.status = ANY($3) AND q.amount_paid < q.total
            ) outstanding
            ORDER BY (total - amount_paid) DESC
            LIMIT $4
            "#,
        )
        .bind(user_id)
        .bind(OrderStatus::Cancelled.as_str())
        .bind(vec![
            QuotationStatus::Accepted.as_str().to_string(),
            QuotationStatus::PartiallyPaid.as_str().to_string(),
        ])
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        for item in &mut items {
            item.balance_due = balance_due(&item.total, &item.amount_paid);
        }
        Ok(items)
    }
}
