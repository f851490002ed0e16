//! Storefront API Library
//!
//! Catalog, session cart, checkout, customer accounts and the warehouse stock ledger
//! behind one axum router.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod services;
pub mod session;
pub mod tracing;

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer};
use utoipa::ToSchema;

use crate::{events::EventSender, session::SessionManager};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<EventSender>,
    pub sessions: SessionManager,
    pub services: handlers::AppServices,
}

impl AppState {
    /// Wires the session store named in `config` and every service.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: EventSender,
    ) -> Result<Self, errors::ServiceError> {
        let sessions = SessionManager::from_config(&config)?;
        Ok(Self::with_sessions(db, config, event_sender, sessions))
    }

    pub fn with_sessions(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: EventSender,
        sessions: SessionManager,
    ) -> Self {
        let event_sender = Arc::new(event_sender);
        let services =
            handlers::AppServices::new(db.clone(), event_sender.clone(), sessions.clone(), &config);
        Self {
            db,
            config,
            event_sender,
            sessions,
            services,
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(api_status))
        .merge(handlers::catalog::catalog_routes())
        .merge(handlers::cart::cart_routes())
        .merge(handlers::checkout::checkout_routes())
        .merge(handlers::accounts::account_routes())
        .merge(handlers::warehouses::warehouse_routes())
        .merge(handlers::admin::admin_routes())
}

/// Full application router with the middleware stack applied.
pub fn build_router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        .route("/", get(|| async { "storefront-api up" }))
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware_helpers::session::session_middleware,
        ))
        .layer(TimeoutLayer::new(timeout))
        .layer(CompressionLayer::new())
        .layer(cors)
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}

async fn api_status(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    let version = env!("CARGO_PKG_VERSION");
    let git = option_env!("GIT_HASH").unwrap_or("unknown");
    let build_time = option_env!("BUILD_TIME").unwrap_or("unknown");
    let status_data = json!({
        "status": "ok",
        "version": version,
        "git": git,
        "build_time": build_time,
        "service": "storefront-api",
        "environment": state.config.environment,
        "session_backend": state.sessions.backend_name(),
        "checkout_inventory_policy": state.config.checkout_inventory_policy.to_string(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            "unhealthy"
        }
    };

    let session_status = match state.sessions.health().await {
        Ok(()) => "healthy",
        Err(e) => {
            tracing::error!(error = %e, "Session store health check failed");
            "unhealthy"
        }
    };

    let health_data = json!({
        "status": if db_status == "healthy" && session_status == "healthy" { "healthy" } else { "unhealthy" },
        "checks": {
            "database": db_status,
            "sessions": session_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}
