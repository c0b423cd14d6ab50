//! Quotations and orders. Every mutation runs in one transaction that locks
//! the document row before the billing rules are applied.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sqlx::{Postgres, Transaction};
use std::str::FromStr;
use uuid::Uuid;

use super::Storage;
use crate::billing::{
    self, balance_due, LineAmount, OrderStatus, QuotationStatus, Totals,
};
use crate::errors::{AppError, ResultExt};
use crate::models::{
    page_window, LineItem, Order, OrderDetail, OrderListParams, Page, Payment, Quotation,
    QuotationDetail, QuotationListParams, ResolvedLine,
};

#[derive(Debug, Clone)]
pub struct NewQuotation {
    pub contact_id: Uuid,
    pub lines: Vec<ResolvedLine>,
    pub discount: BigDecimal,
    pub tax_rate: BigDecimal,
    pub valid_until: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct QuotationPatch {
    pub lines: Option<Vec<ResolvedLine>>,
    pub discount: Option<BigDecimal>,
    pub tax_rate: Option<BigDecimal>,
    pub valid_until: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub contact_id: Uuid,
    pub lines: Vec<ResolvedLine>,
    pub discount: BigDecimal,
    pub tax_rate: BigDecimal,
    pub shipping_address: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone, Copy)]
enum ItemTable {
    Quotation,
    Order,
}

impl ItemTable {
    fn table(self) -> &'static str {
        match self {
            ItemTable::Quotation => "quotation_items",
            ItemTable::Order => "order_items",
        }
    }

    fn parent_column(self) -> &'static str {
        match self {
            ItemTable::Quotation => "quotation_id",
            ItemTable::Order => "order_id",
        }
    }
}

fn amounts(lines: &[ResolvedLine]) -> Vec<LineAmount> {
    lines
        .iter()
        .map(|l| LineAmount {
            quantity: l.quantity,
            unit_price: l.unit_price.clone(),
        })
        .collect()
}

/// Serializes document numbering per user by locking the user row.
async fn next_number(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    table: &str,
    prefix: &str,
) -> Result<String, AppError> {
    sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map_err(AppError::DatabaseError)?;

    let count = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM {} WHERE user_id = $1",
        table
    ))
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(AppError::DatabaseError)?;

    Ok(format!("{}-{:05}", prefix, count + 1))
}

async fn insert_items(
    tx: &mut Transaction<'_, Postgres>,
    table: ItemTable,
    parent_id: Uuid,
    lines: &[ResolvedLine],
    totals: &Totals,
) -> Result<(), AppError> {
    let sql = format!(
        "INSERT INTO {} (id, {}, product_id, name, quantity, unit_price, line_total, position) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        table.table(),
        table.parent_column()
    );
    for (position, (line, line_total)) in lines.iter().zip(&totals.line_totals).enumerate() {
        sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(parent_id)
            .bind(line.product_id)
            .bind(&line.name)
            .bind(line.quantity)
            .bind(billing::round_money(&line.unit_price))
            .bind(line_total)
            .bind(position as i32)
            .execute(&mut **tx)
            .await
            .map_err(AppError::DatabaseError)?;
    }
    Ok(())
}

async fn copy_items(
    tx: &mut Transaction<'_, Postgres>,
    quotation_id: Uuid,
    order_id: Uuid,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO order_items (id, order_id, product_id, name, quantity, unit_price, line_total, position)
        SELECT gen_random_uuid(), $2, product_id, name, quantity, unit_price, line_total, position
        FROM quotation_items WHERE quotation_id = $1
        "#,
    )
    .bind(quotation_id)
    .bind(order_id)
    .execute(&mut **tx)
    .await
    .map_err(AppError::DatabaseError)?;
    Ok(())
}

pub(crate) async fn lock_quotation(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    quotation_id: Uuid,
) -> Result<Quotation, AppError> {
    sqlx::query_as::<_, Quotation>(
        "SELECT * FROM quotations WHERE id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(quotation_id)
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(AppError::DatabaseError)?
    .ok_or_else(|| AppError::NotFound(format!("Quotation {}", quotation_id)))
}

pub(crate) async fn lock_order(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    order_id: Uuid,
) -> Result<Order, AppError> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 AND user_id = $2 FOR UPDATE")
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(AppError::DatabaseError)?
        .ok_or_else(|| AppError::NotFound(format!("Order {}", order_id)))
}

impl Storage {
    // ============ Quotations ============

    pub async fn list_quotations(
        &self,
        user_id: Uuid,
        params: &QuotationListParams,
    ) -> Result<Page<Quotation>, AppError> {
        let (page, per_page, offset) = page_window(params.page, params.per_page);
        let filter = r#"
            user_id = $1
            AND ($2::text IS NULL OR status = $2)
            AND ($3::uuid IS NULL OR contact_id = $3)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM quotations WHERE {}",
            filter
        ))
        .bind(user_id)
        .bind(params.status.as_deref())
        .bind(params.contact_id)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        let items = sqlx::query_as::<_, Quotation>(&format!(
            "SELECT * FROM quotations WHERE {} ORDER BY created_at DESC, id LIMIT $4 OFFSET $5",
            filter
        ))
        .bind(user_id)
        .bind(params.status.as_deref())
        .bind(params.contact_id)
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

    pub async fn create_quotation(
        &self,
        user_id: Uuid,
        new: NewQuotation,
    ) -> Result<QuotationDetail, AppError> {
        self.get_contact(user_id, new.contact_id).await?;
        let totals = billing::compute_totals(&amounts(&new.lines), &new.discount, &new.tax_rate)?;

        let mut tx = self.pool.begin().await.context("Begin transaction: create quotation")?;
        let number = next_number(&mut tx, user_id, "quotations", "QT").await?;
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO quotations (
                id, user_id, contact_id, quote_number, status,
                subtotal, discount, tax_rate, tax_amount, total, amount_paid,
                valid_until, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0, $11, $12)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(new.contact_id)
        .bind(&number)
        .bind(QuotationStatus::Draft.as_str())
        .bind(&totals.subtotal)
        .bind(&totals.discount)
        .bind(&totals.tax_rate)
        .bind(&totals.tax_amount)
        .bind(&totals.total)
        .bind(new.valid_until)
        .bind(new.notes.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        insert_items(&mut tx, ItemTable::Quotation, id, &new.lines, &totals).await?;
        tx.commit().await.context("Commit transaction: create quotation")?;

        tracing::info!("Created quotation {} ({}) total={}", number, id, totals.total);
        self.get_quotation_detail(user_id, id).await
    }

    pub async fn get_quotation(
        &self,
        user_id: Uuid,
        quotation_id: Uuid,
    ) -> Result<Quotation, AppError> {
        sqlx::query_as::<_, Quotation>("SELECT * FROM quotations WHERE id = $1 AND user_id = $2")
            .bind(quotation_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?
            .ok_or_else(|| AppError::NotFound(format!("Quotation {}", quotation_id)))
    }

    pub async fn get_quotation_detail(
        &self,
        user_id: Uuid,
        quotation_id: Uuid,
    ) -> Result<QuotationDetail, AppError> {
        let quotation = self.get_quotation(user_id, quotation_id).await?;
        let items = self.line_items(ItemTable::Quotation, quotation_id).await?;
        let contact_name = self.contact_name(quotation.contact_id).await?;
        Ok(QuotationDetail {
            balance_due: balance_due(&quotation.total, &quotation.amount_paid),
            quotation,
            contact_name,
            items,
        })
    }

    /// Edit lines, discount, tax or notes while the quotation is still a draft
    /// or freshly sent.
    pub async fn update_quotation(
        &self,
        user_id: Uuid,
        quotation_id: Uuid,
        patch: QuotationPatch,
    ) -> Result<QuotationDetail, AppError> {
        let mut tx = self.pool.begin().await.context("Begin transaction: update quotation")?;
        let current = lock_quotation(&mut tx, user_id, quotation_id).await?;
        let status = QuotationStatus::from_str(&current.status)?;
        if !status.is_editable() {
            return Err(billing::BillingError::NotEditable(status.to_string()).into());
        }

        let reprice = patch.lines.is_some() || patch.discount.is_some() || patch.tax_rate.is_some();
        if reprice {
            let lines = match patch.lines {
                Some(lines) => lines,
                None => self
                    .line_items(ItemTable::Quotation, quotation_id)
                    .await?
                    .into_iter()
                    .map(|item| ResolvedLine {
                        product_id: item.product_id,
                        name: item.name,
                        quantity: item.quantity,
                        unit_price: item.unit_price,
                    })
                    .collect(),
            };
            let discount = patch.discount.unwrap_or(current.discount);
            let tax_rate = patch.tax_rate.unwrap_or(current.tax_rate);
            let totals = billing::compute_totals(&amounts(&lines), &discount, &tax_rate)?;

            sqlx::query("DELETE FROM quotation_items WHERE quotation_id = $1")
                .bind(quotation_id)
                .execute(&mut *tx)
                .await
                .map_err(AppError::DatabaseError)?;
            insert_items(&mut tx, ItemTable::Quotation, quotation_id, &lines, &totals).await?;

            sqlx::query(
                r#"
                UPDATE quotations
                SET subtotal = $2, discount = $3, tax_rate = $4, tax_amount = $5, total = $6,
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(quotation_id)
            .bind(&totals.subtotal)
            .bind(&totals.discount)
            .bind(&totals.tax_rate)
            .bind(&totals.tax_amount)
            .bind(&totals.total)
            .execute(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;
        }

        sqlx::query(
            r#"
            UPDATE quotations
            SET valid_until = COALESCE($2, valid_until),
                notes = COALESCE($3, notes),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(quotation_id)
        .bind(patch.valid_until)
        .bind(patch.notes.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        tx.commit().await.context("Commit transaction: update quotation")?;
        self.get_quotation_detail(user_id, quotation_id).await
    }

    pub async fn set_quotation_status(
        &self,
        user_id: Uuid,
        quotation_id: Uuid,
        next: QuotationStatus,
    ) -> Result<Quotation, AppError> {
        let mut tx = self.pool.begin().await.context("Begin transaction: set quotation status")?;
        let current = lock_quotation(&mut tx, user_id, quotation_id).await?;
        let status = billing::transition_quotation(QuotationStatus::from_str(&current.status)?, next)?;

        let updated = sqlx::query_as::<_, Quotation>(
            "UPDATE quotations SET status = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(quotation_id)
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        tx.commit().await.context("Commit transaction: set quotation status")?;
        tracing::info!(
            "Quotation {} moved {} -> {}",
            updated.quote_number,
            current.status,
            updated.status
        );
        Ok(updated)
    }

    /// Turn an accepted or (partly) paid quotation into an order. Items and
    /// amounts are copied, recorded payments follow the money to the order.
    pub async fn convert_quotation(
        &self,
        user_id: Uuid,
        quotation_id: Uuid,
    ) -> Result<OrderDetail, AppError> {
        let mut tx = self.pool.begin().await.context("Begin transaction: convert quotation")?;
        let quotation = lock_quotation(&mut tx, user_id, quotation_id).await?;
        let status = QuotationStatus::from_str(&quotation.status)?;
        let order_status = billing::plan_conversion(status, &quotation.amount_paid)?;
        let payment_status = billing::derive_payment_status(&quotation.amount_paid, &quotation.total);

        let number = next_number(&mut tx, user_id, "orders", "ORD").await?;
        let order_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, contact_id, quotation_id, order_number, status, payment_status,
                subtotal, discount, tax_rate, tax_amount, total, amount_paid, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(order_id)
        .bind(user_id)
        .bind(quotation.contact_id)
        .bind(quotation.id)
        .bind(&number)
        .bind(order_status.as_str())
        .bind(payment_status.as_str())
        .bind(&quotation.subtotal)
        .bind(&quotation.discount)
        .bind(&quotation.tax_rate)
        .bind(&quotation.tax_amount)
        .bind(&quotation.total)
        .bind(&quotation.amount_paid)
        .bind(quotation.notes.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        copy_items(&mut tx, quotation.id, order_id).await?;

        sqlx::query("UPDATE payments SET order_id = $2 WHERE quotation_id = $1")
            .bind(quotation.id)
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;

        sqlx::query(
            r#"
            UPDATE quotations
            SET status = $2, converted_order_id = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(quotation.id)
        .bind(QuotationStatus::Converted.as_str())
        .bind(order_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        tx.commit().await.context("Commit transaction: convert quotation")?;
        tracing::info!(
            "Converted quotation {} into order {}",
            quotation.quote_number,
            number
        );
        self.get_order_detail(user_id, order_id).await
    }

    // ============ Orders ============

    pub async fn list_orders(
        &self,
        user_id: Uuid,
        params: &OrderListParams,
    ) -> Result<Page<Order>, AppError> {
        let (page, per_page, offset) = page_window(params.page, params.per_page);
        let filter = r#"
            user_id = $1
            AND ($2::text IS NULL OR status = $2)
            AND ($3::text IS NULL OR payment_status = $3)
            AND ($4::uuid IS NULL OR contact_id = $4)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM orders WHERE {}",
            filter
        ))
        .bind(user_id)
        .bind(params.status.as_deref())
        .bind(params.payment_status.as_deref())
        .bind(params.contact_id)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        let items = sqlx::query_as::<_, Order>(&format!(
            "SELECT * FROM orders WHERE {} ORDER BY created_at DESC, id LIMIT $5 OFFSET $6",
            filter
        ))
        .bind(user_id)
        .bind(params.status.as_deref())
        .bind(params.payment_status.as_deref())
        .bind(params.contact_id)
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

    pub async fn create_order(&self, user_id: Uuid, new: NewOrder) -> Result<OrderDetail, AppError> {
        self.get_contact(user_id, new.contact_id).await?;
        let totals = billing::compute_totals(&amounts(&new.lines), &new.discount, &new.tax_rate)?;
        let zero = BigDecimal::from(0);
        let payment_status = billing::derive_payment_status(&zero, &totals.total);

        let mut tx = self.pool.begin().await.context("Begin transaction: create order")?;
        let number = next_number(&mut tx, user_id, "orders", "ORD").await?;
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, contact_id, order_number, status, payment_status,
                subtotal, discount, tax_rate, tax_amount, total, amount_paid,
                shipping_address, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0, $12, $13)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(new.contact_id)
        .bind(&number)
        .bind(OrderStatus::Pending.as_str())
        .bind(payment_status.as_str())
        .bind(&totals.subtotal)
        .bind(&totals.discount)
        .bind(&totals.tax_rate)
        .bind(&totals.tax_amount)
        .bind(&totals.total)
        .bind(new.shipping_address.as_deref())
        .bind(new.notes.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        insert_items(&mut tx, ItemTable::Order, id, &new.lines, &totals).await?;
        tx.commit().await.context("Commit transaction: create order")?;

        tracing::info!("Created order {} ({}) total={}", number, id, totals.total);
        self.get_order_detail(user_id, id).await
    }

    pub async fn get_order(&self, user_id: Uuid, order_id: Uuid) -> Result<Order, AppError> {
        sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 AND user_id = $2")
            .bind(order_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?
            .ok_or_else(|| AppError::NotFound(format!("Order {}", order_id)))
    }

    /// Case-insensitive lookup by human-facing number (`ORD-00012`).
    pub async fn find_order_by_number(
        &self,
        user_id: Uuid,
        order_number: &str,
    ) -> Result<Order, AppError> {
        sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE user_id = $1 AND UPPER(order_number) = UPPER($2)",
        )
        .bind(user_id)
        .bind(order_number.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?
        .ok_or_else(|| AppError::NotFound(format!("Order {}", order_number)))
    }

    pub async fn get_order_detail(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderDetail, AppError> {
        let order = self.get_order(user_id, order_id).await?;
        let items = self.line_items(ItemTable::Order, order_id).await?;
        let payments = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE order_id = $1 ORDER BY created_at",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        let contact_name = self.contact_name(order.contact_id).await?;

        Ok(OrderDetail {
            balance_due: balance_due(&order.total, &order.amount_paid),
            order,
            contact_name,
            items,
            payments,
        })
    }

    pub async fn set_order_status(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        next: OrderStatus,
    ) -> Result<Order, AppError> {
        let mut tx = self.pool.begin().await.context("Begin transaction: set order status")?;
        let current = lock_order(&mut tx, user_id, order_id).await?;
        let status = billing::transition_order(
            OrderStatus::from_str(&current.status)?,
            next,
            &current.amount_paid,
        )?;

        let updated = sqlx::query_as::<_, Order>(
            "UPDATE orders SET status = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(order_id)
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        tx.commit().await.context("Commit transaction: set order status")?;
        tracing::info!(
            "Order {} moved {} -> {}",
            updated.order_number,
            current.status,
            updated.status
        );
        Ok(updated)
    }

    async fn line_items(&self, table: ItemTable, parent_id: Uuid) -> Result<Vec<LineItem>, AppError> {
        sqlx::query_as::<_, LineItem>(&format!(
            "SELECT id, product_id, name, quantity, unit_price, line_total, position \
             FROM {} WHERE {} = $1 ORDER BY position",
            table.table(),
            table.parent_column()
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    pub(crate) async fn contact_name(&self, contact_id: Uuid) -> Result<String, AppError> {
        sqlx::query_scalar::<_, String>("SELECT name FROM contacts WHERE id = $1")
            .bind(contact_id)
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }
}
