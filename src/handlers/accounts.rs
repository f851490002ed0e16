use crate::handlers::common::{
    created_response, map_service_error, no_content_response, session_response, success_response,
};
use crate::{
    auth::RequireAccount,
    errors::ApiError,
    middleware_helpers::session::{with_session_cookie, SessionContext, SessionCookie},
    services::accounts::{LoginInput, RegisterInput, UpdateProfileInput},
    services::cart::SessionWrite,
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Registration, login and the logged-in customer's own data
pub fn account_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/accounts/register", post(register))
        .route("/accounts/login", post(login))
        .route("/accounts/logout", post(logout))
        .route("/accounts/profile", get(get_profile).put(update_profile))
        .route("/accounts/orders", get(order_history))
        .route("/accounts/orders/:id", get(order_detail))
}

#[utoipa::path(
    post,
    path = "/api/v1/accounts/register",
    request_body = RegisterInput,
    responses(
        (status = 201, description = "Account created"),
        (status = 400, description = "Invalid fields, all reported at once"),
        (status = 409, description = "Username or email already taken")
    ),
    tag = "accounts"
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterInput>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state
        .services
        .accounts
        .register(payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(account))
}

/// Log in by username or email. The session key is rotated and the cart kept.
#[utoipa::path(
    post,
    path = "/api/v1/accounts/login",
    request_body = LoginInput,
    responses(
        (status = 200, description = "Logged in"),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "accounts"
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
    Json(payload): Json<LoginInput>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .services
        .accounts
        .login(&session, &payload)
        .await
        .map_err(map_service_error)?;

    let key = outcome.value.session_key.clone();
    let write = SessionWrite {
        value: outcome.value.account,
        expire_at_browser_close: outcome.expire_at_browser_close,
    };
    Ok(session_response(StatusCode::OK, key, write, success_response))
}

#[utoipa::path(
    post,
    path = "/api/v1/accounts/logout",
    responses((status = 204, description = "Session flushed")),
    tag = "accounts"
)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .accounts
        .logout(&session)
        .await
        .map_err(map_service_error)?;

    Ok(with_session_cookie(
        no_content_response(),
        SessionCookie::Clear,
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/accounts/profile",
    responses(
        (status = 200, description = "Account and profile"),
        (status = 401, description = "Not logged in")
    ),
    tag = "accounts"
)]
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    RequireAccount(account): RequireAccount,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .services
        .accounts
        .profile(account)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(profile))
}

#[utoipa::path(
    put,
    path = "/api/v1/accounts/profile",
    request_body = UpdateProfileInput,
    responses(
        (status = 200, description = "Profile updated"),
        (status = 401, description = "Not logged in"),
        (status = 409, description = "Email belongs to another account")
    ),
    tag = "accounts"
)]
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    RequireAccount(account): RequireAccount,
    Json(payload): Json<UpdateProfileInput>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .services
        .accounts
        .update_profile(account, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(profile))
}

#[utoipa::path(
    get,
    path = "/api/v1/accounts/orders",
    responses(
        (status = 200, description = "Own orders, newest first"),
        (status = 401, description = "Not logged in")
    ),
    tag = "accounts"
)]
pub async fn order_history(
    State(state): State<Arc<AppState>>,
    RequireAccount(account): RequireAccount,
) -> Result<impl IntoResponse, ApiError> {
    let orders = state
        .services
        .orders
        .history(account.id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(orders))
}

#[utoipa::path(
    get,
    path = "/api/v1/accounts/orders/{id}",
    params(("id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with its items"),
        (status = 404, description = "No such order for this account")
    ),
    tag = "accounts"
)]
pub async fn order_detail(
    State(state): State<Arc<AppState>>,
    RequireAccount(account): RequireAccount,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .detail_for_account(account.id, id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}
