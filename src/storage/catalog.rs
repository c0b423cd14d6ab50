use uuid::Uuid;

use super::{search_term, Storage};
use crate::errors::AppError;
use crate::models::{
    page_window, CreateProductRequest, LineItemInput, Page, Product, ProductListParams,
    ResolvedLine, UpdateProductRequest,
};

impl Storage {
    pub async fn list_products(
        &self,
        user_id: Uuid,
        params: &ProductListParams,
    ) -> Result<Page<Product>, AppError> {
        let (page, per_page, offset) = page_window(params.page, params.per_page);
        let term = search_term(params.q.as_deref());
        let filter = r#"
            user_id = $1
            AND ($2::text IS NULL OR name ILIKE $2 OR sku ILIKE $2 OR description ILIKE $2)
            AND ($3::boolean IS NULL OR is_active = $3)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM products WHERE {}",
            filter
        ))
        .bind(user_id)
        .bind(&term)
        .bind(params.active)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        let items = sqlx::query_as::<_, Product>(&format!(
            "SELECT * FROM products WHERE {} ORDER BY name, id LIMIT $4 OFFSET $5",
            filter
        ))
        .bind(user_id)
        .bind(&term)
        .bind(params.active)
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

    pub async fn search_products(
        &self,
        user_id: Uuid,
        query: &str,
        limit: i64,
    ) -> Result<Vec<Product>, AppError> {
        let page = self
            .list_products(
                user_id,
                &ProductListParams {
                    q: Some(query.to_string()),
                    active: Some(true),
                    page: Some(1),
                    per_page: Some(limit),
                },
            )
            .await?;
        Ok(page.items)
    }

    pub async fn create_product(
        &self,
        user_id: Uuid,
        req: &CreateProductRequest,
    ) -> Result<Product, AppError> {
        sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (id, user_id, name, description, price, currency, sku, stock, image_url, is_active)
            VALUES ($1, $2, $3, $4, $5, COALESCE($6, 'INR'), $7, $8, $9, COALESCE($10, true))
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(req.name.trim())
        .bind(req.description.as_deref())
        .bind(&req.price)
        .bind(req.currency.as_deref())
        .bind(req.sku.as_deref())
        .bind(req.stock)
        .bind(req.image_url.as_deref())
        .bind(req.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    pub async fn get_product(&self, user_id: Uuid, product_id: Uuid) -> Result<Product, AppError> {
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1 AND user_id = $2")
            .bind(product_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?
            .ok_or_else(|| AppError::NotFound(format!("Product {}", product_id)))
    }

    pub async fn update_product(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        req: &UpdateProductRequest,
    ) -> Result<Product, AppError> {
        sqlx::query_as::<_, Product>(
            r#"
            UPDATE products
            SET name = COALESCE($3, name),
                description = COALESCE($4, description),
                price = COALESCE($5, price),
                currency = COALESCE($6, currency),
                sku = COALESCE($7, sku),
                stock = COALESCE($8, stock),
                image_url = COALESCE($9, image_url),
                is_active = COALESCE($10, is_active),
                updated_at = now()
            WHERE id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(product_id)
        .bind(user_id)
        .bind(req.name.as_deref().map(str::trim))
        .bind(req.description.as_deref())
        .bind(req.price.as_ref())
        .bind(req.currency.as_deref())
        .bind(req.sku.as_deref())
        .bind(req.stock)
        .bind(req.image_url.as_deref())
        .bind(req.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?
        .ok_or_else(|| AppError::NotFound(format!("Product {}", product_id)))
    }

    pub async fn set_product_image(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        image_url: &str,
    ) -> Result<Product, AppError> {
        self.update_product(
            user_id,
            product_id,
            &UpdateProductRequest {
                image_url: Some(image_url.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    /// Line items keep their own name and price, so deleting a product leaves
    /// past documents intact (`product_id` becomes NULL).
    pub async fn delete_product(&self, user_id: Uuid, product_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1 AND user_id = $2")
            .bind(product_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Product {}", product_id)));
        }
        Ok(())
    }

    /// Fill in names and prices from the catalog for lines that reference a
    /// product. Free-form lines must carry both.
    pub async fn resolve_lines(
        &self,
        user_id: Uuid,
        inputs: &[LineItemInput],
    ) -> Result<Vec<ResolvedLine>, AppError> {
        let mut lines = Vec::with_capacity(inputs.len());

        for (idx, input) in inputs.iter().enumerate() {
            let line = match input.product_id {
                Some(product_id) => {
                    let product = self.get_product(user_id, product_id).await?;
                    ResolvedLine {
                        product_id: Some(product.id),
                        name: input
                            .name
                            .clone()
                            .filter(|n| !n.trim().is_empty())
                            .unwrap_or(product.name),
                        quantity: input.quantity,
                        unit_price: input.unit_price.clone().unwrap_or(product.price),
                    }
                }
                None => {
                    let name = input
                        .name
                        .as_deref()
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .ok_or_else(|| {
                            AppError::BadRequest(format!(
                                "Item {} needs a product_id or a name",
                                idx + 1
                            ))
                        })?;
                    let unit_price = input.unit_price.clone().ok_or_else(|| {
                        AppError::BadRequest(format!("Item {} needs a unit_price", idx + 1))
                    })?;
                    ResolvedLine {
                        product_id: None,
                        name: name.to_string(),
                        quantity: input.quantity,
                        unit_price,
                    }
                }
            };
            lines.push(line);
        }

        Ok(lines)
    }
}
