use bigdecimal::BigDecimal;
use sqlx::{Postgres, Transaction};
use std::str::FromStr;
use uuid::Uuid;

use super::billing_docs::{lock_order, lock_quotation};
use super::Storage;
use crate::billing::{self, OrderStatus, PaymentMethod, PaymentStatus, QuotationStatus};
use crate::errors::{AppError, ResultExt};
use crate::models::{
    page_window, Contact, Order, Page, Payment, PaymentListParams, PaymentRecordStatus, Quotation,
};

/// Result of applying money to an order or a quotation.
#[derive(Debug, Clone)]
pub struct PaymentApplied {
    pub payment: Payment,
    pub order: Option<Order>,
    pub quotation: Option<Quotation>,
    pub balance_due: BigDecimal,
    /// The document became fully paid with this payment.
    pub fully_paid: bool,
}

/// A pending gateway payment for an order's outstanding balance.
#[derive(Debug, Clone)]
pub struct LinkPaymentDraft {
    pub payment: Payment,
    pub order: Order,
    pub contact: Contact,
}

async fn apply_to_order(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    order_id: Uuid,
    amount: &BigDecimal,
) -> Result<(Order, BigDecimal, bool), AppError> {
    let order = lock_order(tx, user_id, order_id).await?;
    let outcome = billing::apply_order_payment(
        OrderStatus::from_str(&order.status)?,
        &order.total,
        &order.amount_paid,
        amount,
    )?;

    let updated = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET amount_paid = $2, payment_status = $3, status = $4, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(order_id)
    .bind(&outcome.amount_paid)
    .bind(outcome.payment_status.as_str())
    .bind(outcome.status.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(AppError::DatabaseError)?;

    let fully_paid = outcome.payment_status == PaymentStatus::Paid;
    Ok((updated, outcome.balance_due, fully_paid))
}

async fn apply_to_quotation(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    quotation_id: Uuid,
    amount: &BigDecimal,
) -> Result<(Quotation, BigDecimal, bool), AppError> {
    let quotation = lock_quotation(tx, user_id, quotation_id).await?;
    let outcome = billing::apply_quotation_payment(
        QuotationStatus::from_str(&quotation.status)?,
        &quotation.total,
        &quotation.amount_paid,
        amount,
    )?;

    let updated = sqlx::query_as::<_, Quotation>(
        r#"
        UPDATE quotations
        SET amount_paid = $2, status = $3, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(quotation_id)
    .bind(&outcome.amount_paid)
    .bind(outcome.status.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(AppError::DatabaseError)?;

    let fully_paid = outcome.status == QuotationStatus::Paid;
    Ok((updated, outcome.balance_due, fully_paid))
}

#[allow(clippy::too_many_arguments)]
async fn insert_captured_payment(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    contact_id: Uuid,
    order_id: Option<Uuid>,
    quotation_id: Option<Uuid>,
    amount: &BigDecimal,
    method: PaymentMethod,
    notes: Option<&str>,
) -> Result<Payment, AppError> {
    sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (id, user_id, contact_id, order_id, quotation_id, amount, method, status, notes, paid_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(contact_id)
    .bind(order_id)
    .bind(quotation_id)
    .bind(billing::round_money(amount))
    .bind(method.as_str())
    .bind(PaymentRecordStatus::Captured.as_str())
    .bind(notes)
    .fetch_one(&mut **tx)
    .await
    .map_err(AppError::DatabaseError)
}

impl Storage {
    /// Manual (offline) payment against an order.
    pub async fn record_order_payment(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        amount: &BigDecimal,
        method: PaymentMethod,
        notes: Option<&str>,
    ) -> Result<PaymentApplied, AppError> {
        let mut tx = self.pool.begin().await.context("Begin transaction: record order payment")?;
        let (order, balance_due, fully_paid) = apply_to_order(&mut tx, user_id, order_id, amount).await?;
        let payment = insert_captured_payment(
            &mut tx,
            user_id,
            order.contact_id,
            Some(order.id),
            None,
            amount,
            method,
            notes,
        )
        .await?;
        tx.commit().await.context("Commit transaction: record order payment")?;

        tracing::info!(
            "Recorded {} payment of {} on order {} (balance {})",
            method,
            payment.amount,
            order.order_number,
            balance_due
        );
        Ok(PaymentApplied {
            payment,
            order: Some(order),
            quotation: None,
            balance_due,
            fully_paid,
        })
    }

    /// Advance payment against a quotation that has not been converted yet.
    pub async fn record_quotation_payment(
        &self,
        user_id: Uuid,
        quotation_id: Uuid,
        amount: &BigDecimal,
        method: PaymentMethod,
        notes: Option<&str>,
    ) -> Result<PaymentApplied, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Begin transaction: record quotation payment")?;
        let (quotation, balance_due, fully_paid) =
            apply_to_quotation(&mut tx, user_id, quotation_id, amount).await?;
        let payment = insert_captured_payment(
            &mut tx,
            user_id,
            quotation.contact_id,
            None,
            Some(quotation.id),
            amount,
            method,
            notes,
        )
        .await?;
        tx.commit().await.context("Commit transaction: record quotation payment")?;

        tracing::info!(
            "Recorded {} payment of {} on quotation {} (balance {})",
            method,
            payment.amount,
            quotation.quote_number,
            balance_due
        );
        Ok(PaymentApplied {
            payment,
            order: None,
            quotation: Some(quotation),
            balance_due,
            fully_paid,
        })
    }

    /// Reserve a pending `payment_link` payment for the order's balance.
    pub async fn create_link_payment(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<LinkPaymentDraft, AppError> {
        let mut tx = self.pool.begin().await.context("Begin transaction: create link payment")?;
        let order = lock_order(&mut tx, user_id, order_id).await?;
        let balance = billing::balance_due(&order.total, &order.amount_paid);

        // Same rules as an actual payment of the full balance.
        billing::apply_order_payment(
            OrderStatus::from_str(&order.status)?,
            &order.total,
            &order.amount_paid,
            &balance,
        )?;

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (id, user_id, contact_id, order_id, amount, method, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(order.contact_id)
        .bind(order.id)
        .bind(&balance)
        .bind(PaymentMethod::PaymentLink.as_str())
        .bind(PaymentRecordStatus::Pending.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;
        tx.commit().await.context("Commit transaction: create link payment")?;

        let contact = self.get_contact(user_id, order.contact_id).await?;
        Ok(LinkPaymentDraft {
            payment,
            order,
            contact,
        })
    }

    pub async fn attach_payment_link(
        &self,
        payment_id: Uuid,
        link_id: &str,
        link_url: &str,
    ) -> Result<Payment, AppError> {
        sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments SET payment_link_id = $2, payment_link_url = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .bind(link_id)
        .bind(link_url)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    pub async fn mark_payment_failed(&self, payment_id: Uuid, reason: &str) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE payments SET status = $2, notes = $3 WHERE id = $1 AND status = $4",
        )
        .bind(payment_id)
        .bind(PaymentRecordStatus::Failed.as_str())
        .bind(reason)
        .bind(PaymentRecordStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    /// Settles the pending payment behind a paid gateway link.
    /// Returns `None` when the link is unknown or was already settled.
    pub async fn capture_link_payment(
        &self,
        link_id: &str,
        gateway_payment_id: &str,
    ) -> Result<Option<PaymentApplied>, AppError> {
        let mut tx = self.pool.begin().await.context("Begin transaction: capture link payment")?;

        let Some(pending) = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE payment_link_id = $1 FOR UPDATE",
        )
        .bind(link_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?
        else {
            tracing::warn!("No payment found for link {}", link_id);
            return Ok(None);
        };

        if pending.status == PaymentRecordStatus::Captured.as_str() {
            tracing::info!("Payment link {} already captured", link_id);
            return Ok(None);
        }
        if pending.status != PaymentRecordStatus::Pending.as_str() {
            // Money arrived after the link was closed on our side; it still counts.
            tracing::warn!(
                "Payment link {} paid while its payment was {}",
                link_id,
                pending.status
            );
        }

        let (order, quotation, balance_due, fully_paid) = match (pending.order_id, pending.quotation_id)
        {
            (Some(order_id), _) => {
                let (order, balance, paid) =
                    apply_to_order(&mut tx, pending.user_id, order_id, &pending.amount).await?;
                (Some(order), None, balance, paid)
            }
            (None, Some(quotation_id)) => {
                let (quotation, balance, paid) =
                    apply_to_quotation(&mut tx, pending.user_id, quotation_id, &pending.amount)
                        .await?;
                (None, Some(quotation), balance, paid)
            }
            (None, None) => {
                return Err(AppError::InternalError(format!(
                    "Payment {} is not attached to an order or quotation",
                    pending.id
                )))
            }
        };

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = $2, gateway_reference = $3, paid_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(pending.id)
        .bind(PaymentRecordStatus::Captured.as_str())
        .bind(gateway_payment_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        tx.commit().await.context("Commit transaction: capture link payment")?;
        tracing::info!(
            "Captured gateway payment {} ({}) via link {}",
            gateway_payment_id,
            payment.amount,
            link_id
        );

        Ok(Some(PaymentApplied {
            payment,
            order,
            quotation,
            balance_due,
            fully_paid,
        }))
    }

    /// Notes a declined attempt on a link payment. The payment stays pending
    /// because the customer can retry on the same link.
    pub async fn record_link_attempt_failure(
        &self,
        payment_id: Uuid,
        reason: &str,
    ) -> Result<Option<Payment>, AppError> {
        sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments SET notes = $2
            WHERE id = $1 AND status = $3 AND method = $4
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .bind(reason)
        .bind(PaymentRecordStatus::Pending.as_str())
        .bind(PaymentMethod::PaymentLink.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    /// Marks the pending payment behind a closed (expired or cancelled) link
    /// as failed. Settled payments are left alone.
    pub async fn fail_link_payment(
        &self,
        link_id: &str,
        reason: &str,
    ) -> Result<Option<Payment>, AppError> {
        sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments SET status = $2, notes = $3
            WHERE payment_link_id = $1 AND status = $4
            RETURNING *
            "#,
        )
        .bind(link_id)
        .bind(PaymentRecordStatus::Failed.as_str())
        .bind(reason)
        .bind(PaymentRecordStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    pub async fn list_payments(
        &self,
        user_id: Uuid,
        params: &PaymentListParams,
    ) -> Result<Page<Payment>, AppError> {
        let (page, per_page, offset) = page_window(params.page, params.per_page);
        let filter = r#"
            user_id = $1
            AND ($2::uuid IS NULL OR order_id = $2)
            AND ($3::uuid IS NULL OR quotation_id = $3)
            AND ($4::text IS NULL OR status = $4)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM payments WHERE {}",
            filter
        ))
        .bind(user_id)
        .bind(params.order_id)
        .bind(params.quotation_id)
        .bind(params.status.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        let items = sqlx::query_as::<_, Payment>(&format!(
            "SELECT * FROM payments WHERE {} ORDER BY created_at DESC, id LIMIT $5 OFFSET $6",
            filter
        ))
        .bind(user_id)
        .bind(params.order_id)
        .bind(params.quotation_id)
        .bind(params.status.as_deref())
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(Page {
            items,
            total,
            page,
            per_page,
        })
    }

    pub async fn get_payment(&self, user_id: Uuid, payment_id: Uuid) -> Result<Payment, AppError> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 AND user_id = $2")
            .bind(payment_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?
            .ok_or_else(|| AppError::NotFound(format!("Payment {}", payment_id)))
    }
}
