use crate::handlers::common::{created_response, map_service_error, session_response, success_response};
use crate::{
    auth::CurrentAccount,
    errors::ApiError,
    middleware_helpers::session::SessionContext,
    services::checkout::CheckoutInput,
    AppState,
};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::info;

pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new().route("/checkout", get(preview_checkout).post(place_order))
}

/// Priced cart shown before the shipping form is submitted
#[utoipa::path(
    get,
    path = "/api/v1/checkout",
    responses(
        (status = 200, description = "Cart snapshot"),
        (status = 400, description = "Cart is empty")
    ),
    tag = "checkout"
)]
pub async fn preview_checkout(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .services
        .checkout
        .preview(&session)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(snapshot))
}

/// Place an order from the session cart
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutInput,
    responses(
        (status = 201, description = "Order placed and cart emptied"),
        (status = 400, description = "Empty cart or invalid shipping details"),
        (status = 404, description = "A product in the cart no longer exists")
    ),
    tag = "checkout"
)]
pub async fn place_order(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
    CurrentAccount(account): CurrentAccount,
    Json(payload): Json<CheckoutInput>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = account.map(|a| a.id);
    let placed = state
        .services
        .checkout
        .submit_order(&session, &payload, actor)
        .await
        .map_err(map_service_error)?;

    info!(order_id = placed.value.order.id, "Checkout completed");
    Ok(session_response(
        StatusCode::CREATED,
        session.key,
        placed,
        created_response,
    ))
}
