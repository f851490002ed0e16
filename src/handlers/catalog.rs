use crate::handlers::common::{map_service_error, success_response};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ProductFilter {
    /// Only products in this category
    pub category: Option<i32>,
}

/// Public catalog browsing
pub fn catalog_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/products", get(list_products))
        .route("/products/:id", get(get_product))
        .route("/products/:id/availability", get(product_availability))
        .route("/categories", get(list_categories))
}

#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(ProductFilter),
    responses((status = 200, description = "Products, newest first")),
    tag = "catalog"
)]
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ProductFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let products = state
        .services
        .catalog
        .list_products(filter.category)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(products))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = i32, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product with its category"),
        (status = 404, description = "Unknown product")
    ),
    tag = "catalog"
)]
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .catalog
        .get_product(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(product))
}

/// Stock held for a product in each active warehouse
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}/availability",
    params(("id" = i32, Path, description = "Product id")),
    responses(
        (status = 200, description = "Per-warehouse quantities"),
        (status = 404, description = "Unknown product")
    ),
    tag = "warehouses"
)]
pub async fn product_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let availability = state
        .services
        .warehouses
        .product_availability(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(availability))
}

#[utoipa::path(
    get,
    path = "/api/v1/categories",
    responses((status = 200, description = "Categories by name")),
    tag = "catalog"
)]
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let categories = state
        .services
        .catalog
        .list_categories()
        .await
        .map_err(map_service_error)?;

    Ok(success_response(categories))
}
