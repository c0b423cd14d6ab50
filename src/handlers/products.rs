use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use bigdecimal::{BigDecimal, Zero};
use std::sync::Arc;
use uuid::Uuid;

use super::{require_text, AppState};
use crate::auth::AuthUser;
use crate::billing::round_money;
use crate::errors::AppError;
use crate::models::{
    CreateProductRequest, Page, Product, ProductListParams, UpdateProductRequest,
    UploadImageRequest,
};

fn check_price(price: &BigDecimal) -> Result<BigDecimal, AppError> {
    if *price < BigDecimal::zero() {
        return Err(AppError::BadRequest("Price cannot be negative".to_string()));
    }
    Ok(round_money(price))
}

fn check_stock(stock: Option<i32>) -> Result<(), AppError> {
    match stock {
        Some(s) if s < 0 => Err(AppError::BadRequest("Stock cannot be negative".to_string())),
        _ => Ok(()),
    }
}

/// GET /api/v1/products
#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(
        ("q" = Option<String>, Query, description = "Search name, SKU or description"),
        ("active" = Option<bool>, Query,),
        ("page" = Option<i64>, Query,),
        ("per_page" = Option<i64>, Query,)
    ),
    responses((status = 200, description = "Page of products")),
    tag = "products"
)]
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<ProductListParams>,
) -> Result<Json<Page<Product>>, AppError> {
    Ok(Json(state.storage.list_products(user.id(), &params).await?))
}

/// POST /api/v1/products
#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProductRequest,
    responses((status = 201, description = "Product created"), (status = 400, description = "Invalid name or price")),
    tag = "products"
)]
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(mut req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>), AppError> {
    require_text(&req.name, "name")?;
    req.price = check_price(&req.price)?;
    check_stock(req.stock)?;

    let product = state.storage.create_product(user.id(), &req).await?;
    tracing::info!("✓ Product created: {} ({})", product.name, product.id);
    Ok((StatusCode::CREATED, Json(product)))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses((status = 200, description = "Product"), (status = 404, description = "Not found")),
    tag = "products"
)]
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Product>, AppError> {
    Ok(Json(state.storage.get_product(user.id(), id).await?))
}

#[utoipa::path(
    patch,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = UpdateProductRequest,
    responses((status = 200, description = "Updated product")),
    tag = "products"
)]
pub async fn update_product(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(mut req): Json<UpdateProductRequest>,
) -> Result<Json<Product>, AppError> {
    if let Some(name) = &req.name {
        require_text(name, "name")?;
    }
    if let Some(price) = &req.price {
        req.price = Some(check_price(price)?);
    }
    check_stock(req.stock)?;

    Ok(Json(state.storage.update_product(user.id(), id, &req).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses((status = 204, description = "Deleted")),
    tag = "products"
)]
pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.storage.delete_product(user.id(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/products/:id/image
///
/// Forwards the image to the host and stores the hosted URL as `image_url`.
/// 503 when image hosting is not configured.
#[utoipa::path(
    post,
    path = "/api/v1/products/{id}/image",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = UploadImageRequest,
    responses(
        (status = 200, description = "Product with new image_url"),
        (status = 503, description = "Image hosting not configured")
    ),
    tag = "products"
)]
pub async fn upload_product_image(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UploadImageRequest>,
) -> Result<Json<Product>, AppError> {
    let media = state.media()?;
    // 404 before spending an upload on a product that does not exist
    state.storage.get_product(user.id(), id).await?;

    let url = media.upload_image(req.data.trim()).await?;
    let product = state.storage.set_product_image(user.id(), id, &url).await?;
    Ok(Json(product))
}
