use crate::handlers::common::{map_service_error, success_response};
use crate::{errors::ApiError, services::warehouse::MovementLogFilter, AppState};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::sync::Arc;

/// Read side of the warehouse ledger
pub fn warehouse_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/warehouses", get(list_warehouses))
        .route("/warehouses/statistics", get(warehouse_statistics))
        .route("/warehouses/:id", get(get_warehouse))
        .route("/stock-movements", get(list_movements))
}

#[utoipa::path(
    get,
    path = "/api/v1/warehouses",
    responses((status = 200, description = "Active warehouses with fill status")),
    tag = "warehouses"
)]
pub async fn list_warehouses(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let warehouses = state
        .services
        .warehouses
        .list_active()
        .await
        .map_err(map_service_error)?;

    Ok(success_response(warehouses))
}

#[utoipa::path(
    get,
    path = "/api/v1/warehouses/{id}",
    params(("id" = i32, Path, description = "Warehouse id")),
    responses(
        (status = 200, description = "Warehouse with its stock lines"),
        (status = 404, description = "Unknown or inactive warehouse")
    ),
    tag = "warehouses"
)]
pub async fn get_warehouse(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state
        .services
        .warehouses
        .detail(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(detail))
}

#[utoipa::path(
    get,
    path = "/api/v1/warehouses/statistics",
    responses((status = 200, description = "Totals across active warehouses")),
    tag = "warehouses"
)]
pub async fn warehouse_statistics(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .services
        .warehouses
        .statistics()
        .await
        .map_err(map_service_error)?;

    Ok(success_response(stats))
}

/// Most recent movements, optionally filtered by `type` and `warehouse`
#[utoipa::path(
    get,
    path = "/api/v1/stock-movements",
    params(
        ("type" = Option<String>, Query, description = "import, export, transfer, adjust or sale"),
        ("warehouse" = Option<i32>, Query, description = "Warehouse id")
    ),
    responses((status = 200, description = "At most 100 movements, newest first")),
    tag = "warehouses"
)]
pub async fn list_movements(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<MovementLogFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let movements = state
        .services
        .warehouses
        .movement_log(filter)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(movements))
}
