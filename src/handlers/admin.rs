//! Staff-only mutations. Every handler requires a logged-in staff account, and
//! ledger operations record that account as the movement's author.

use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
};
use crate::{
    auth::RequireStaff,
    entities::OrderStatus,
    errors::ApiError,
    services::{
        catalog::{CreateCategoryInput, CreateProductInput},
        warehouse::{CreateWarehouseInput, RecordMovementInput, StockCountInput, TransferInput},
    },
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignWarehouseRequest {
    pub warehouse_id: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MovementRecorded {
    pub warehouse_id: i32,
    pub product_id: i32,
    pub quantity: i32,
}

pub fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/categories", post(create_category))
        .route("/admin/categories/:id", delete(delete_category))
        .route("/admin/products", post(create_product))
        .route("/admin/warehouses", post(create_warehouse))
        .route("/admin/warehouses/:id/active", put(set_warehouse_active))
        .route("/admin/stock-movements", post(record_movement))
        .route("/admin/stock-transfers", post(transfer_stock))
        .route("/admin/stock-counts", post(record_count))
        .route("/admin/orders/:id/status", put(update_order_status))
        .route("/admin/orders/:id/warehouse", put(assign_order_warehouse))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/categories",
    request_body = CreateCategoryInput,
    responses((status = 201, description = "Category created")),
    tag = "admin"
)]
pub async fn create_category(
    State(state): State<Arc<AppState>>,
    _staff: RequireStaff,
    Json(payload): Json<CreateCategoryInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let category = state
        .services
        .catalog
        .create_category(payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(category))
}

/// Deleting a category cascades to its products
#[utoipa::path(
    delete,
    path = "/api/v1/admin/categories/{id}",
    params(("id" = i32, Path, description = "Category id")),
    responses(
        (status = 204, description = "Category and its products deleted"),
        (status = 404, description = "Unknown category")
    ),
    tag = "admin"
)]
pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    _staff: RequireStaff,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .catalog
        .delete_category(id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/products",
    request_body = CreateProductInput,
    responses(
        (status = 201, description = "Product created"),
        (status = 409, description = "SKU already in use")
    ),
    tag = "admin"
)]
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    _staff: RequireStaff,
    Json(payload): Json<CreateProductInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let product = state
        .services
        .catalog
        .create_product(payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(product))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/warehouses",
    request_body = CreateWarehouseInput,
    responses(
        (status = 201, description = "Warehouse created"),
        (status = 409, description = "Name already in use")
    ),
    tag = "admin"
)]
pub async fn create_warehouse(
    State(state): State<Arc<AppState>>,
    _staff: RequireStaff,
    Json(payload): Json<CreateWarehouseInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let warehouse = state
        .services
        .warehouses
        .create_warehouse(payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(warehouse))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/warehouses/{id}/active",
    params(("id" = i32, Path, description = "Warehouse id")),
    request_body = SetActiveRequest,
    responses((status = 200, description = "Warehouse updated")),
    tag = "admin"
)]
pub async fn set_warehouse_active(
    State(state): State<Arc<AppState>>,
    _staff: RequireStaff,
    Path(id): Path<i32>,
    Json(payload): Json<SetActiveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let warehouse = state
        .services
        .warehouses
        .set_active(id, payload.is_active)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(warehouse))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/stock-movements",
    request_body = RecordMovementInput,
    responses(
        (status = 201, description = "Movement recorded"),
        (status = 404, description = "Unknown warehouse or product")
    ),
    tag = "admin"
)]
pub async fn record_movement(
    State(state): State<Arc<AppState>>,
    RequireStaff(staff): RequireStaff,
    Json(payload): Json<RecordMovementInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let (warehouse_id, product_id) = (payload.warehouse_id, payload.product_id);
    let quantity = state
        .services
        .warehouses
        .record_movement(payload, Some(staff.id))
        .await
        .map_err(map_service_error)?;

    Ok(created_response(MovementRecorded {
        warehouse_id,
        product_id,
        quantity,
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/stock-transfers",
    request_body = TransferInput,
    responses(
        (status = 201, description = "Stock moved between warehouses"),
        (status = 400, description = "Same warehouse on both sides or bad quantity")
    ),
    tag = "admin"
)]
pub async fn transfer_stock(
    State(state): State<Arc<AppState>>,
    RequireStaff(staff): RequireStaff,
    Json(payload): Json<TransferInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let outcome = state
        .services
        .warehouses
        .transfer(payload, Some(staff.id))
        .await
        .map_err(map_service_error)?;

    Ok(created_response(outcome))
}

/// Stocktake: the counted quantity replaces the recorded one through an adjust movement
#[utoipa::path(
    post,
    path = "/api/v1/admin/stock-counts",
    request_body = StockCountInput,
    responses((status = 201, description = "Count recorded")),
    tag = "admin"
)]
pub async fn record_count(
    State(state): State<Arc<AppState>>,
    RequireStaff(staff): RequireStaff,
    Json(payload): Json<StockCountInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let row = state
        .services
        .warehouses
        .record_count(payload, Some(staff.id))
        .await
        .map_err(map_service_error)?;

    Ok(created_response(row))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/orders/{id}/status",
    params(("id" = i32, Path, description = "Order id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status changed"),
        (status = 404, description = "Unknown order")
    ),
    tag = "admin"
)]
pub async fn update_order_status(
    State(state): State<Arc<AppState>>,
    _staff: RequireStaff,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .update_status(id, payload.status)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/orders/{id}/warehouse",
    params(("id" = i32, Path, description = "Order id")),
    request_body = AssignWarehouseRequest,
    responses(
        (status = 200, description = "Warehouse assigned"),
        (status = 404, description = "Unknown order or warehouse")
    ),
    tag = "admin"
)]
pub async fn assign_order_warehouse(
    State(state): State<Arc<AppState>>,
    _staff: RequireStaff,
    Path(id): Path<i32>,
    Json(payload): Json<AssignWarehouseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .assign_warehouse(id, payload.warehouse_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}
