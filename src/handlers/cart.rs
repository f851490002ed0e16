use crate::handlers::common::{map_service_error, session_response, success_response};
use crate::{
    errors::{ApiError, FieldError, ServiceError},
    middleware_helpers::session::SessionContext,
    models::{ProductId, QuantityInput},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetQuantityRequest {
    /// Whole number; zero or below removes the line
    #[schema(value_type = Object)]
    pub quantity: Option<QuantityInput>,
}

/// Session cart endpoints
pub fn cart_routes() -> Router<Arc<AppState>> {
    Router::new().route("/cart", get(get_cart)).route(
        "/cart/items/:product_id",
        post(add_item).put(set_quantity).delete(remove_item),
    )
}

fn parse_product_id(raw: &str) -> Result<ProductId, ApiError> {
    raw.parse::<ProductId>().map_err(map_service_error)
}

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses((status = 200, description = "Priced cart; lines for deleted products are dropped and listed")),
    tag = "cart"
)]
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .services
        .cart
        .view(&session)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(view))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/items/{product_id}",
    params(("product_id" = String, Path, description = "Product id")),
    responses(
        (status = 200, description = "One unit added"),
        (status = 400, description = "Malformed product id")
    ),
    tag = "cart"
)]
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
    Path(product_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let product_id = parse_product_id(&product_id)?;
    let update = state
        .services
        .cart
        .add(&session, product_id)
        .await
        .map_err(map_service_error)?;

    Ok(session_response(
        StatusCode::OK,
        session.key,
        update,
        success_response,
    ))
}

#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{product_id}",
    params(("product_id" = String, Path, description = "Product id")),
    request_body = SetQuantityRequest,
    responses(
        (status = 200, description = "Quantity replaced, or line removed when not positive"),
        (status = 400, description = "Quantity is not a whole number")
    ),
    tag = "cart"
)]
pub async fn set_quantity(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
    Path(product_id): Path<String>,
    Json(payload): Json<SetQuantityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let product_id = parse_product_id(&product_id)?;
    let quantity = payload.quantity.ok_or_else(|| {
        ApiError::ServiceError(ServiceError::InvalidFields(vec![FieldError::required(
            "quantity",
        )]))
    })?;
    let update = state
        .services
        .cart
        .set_quantity(&session, product_id, &quantity)
        .await
        .map_err(map_service_error)?;

    Ok(session_response(
        StatusCode::OK,
        session.key,
        update,
        success_response,
    ))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{product_id}",
    params(("product_id" = String, Path, description = "Product id")),
    responses((status = 200, description = "Line removed; absent lines are ignored")),
    tag = "cart"
)]
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
    Path(product_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let product_id = parse_product_id(&product_id)?;
    let update = state
        .services
        .cart
        .remove(&session, product_id)
        .await
        .map_err(map_service_error)?;

    Ok(session_response(
        StatusCode::OK,
        session.key,
        update,
        success_response,
    ))
}
