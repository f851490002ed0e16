#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::{
    body::{self, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use storefront_api::{
    config::{AppConfig, CheckoutInventoryPolicy},
    db,
    entities::{account, Account, CategoryModel, ProductModel, WarehouseModel},
    events::{self, EventSender},
    services::{
        accounts::RegisterInput,
        catalog::{CreateCategoryInput, CreateProductInput},
        warehouse::CreateWarehouseInput,
    },
    session::{SessionManager, SessionStore},
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;

pub const PASSWORD: &str = "Ink&Paper42";

/// Helper harness for spinning up an application backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Same as [`TestApp::new`] but lets the test adjust configuration first.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(adjust, None).await
    }

    /// Uses `store` for sessions instead of the configured backend.
    pub async fn with_session_store(store: Arc<dyn SessionStore>) -> Self {
        Self::build(|_| {}, Some(store)).await
    }

    async fn build(
        adjust: impl FnOnce(&mut AppConfig),
        store: Option<Arc<dyn SessionStore>>,
    ) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // A single connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));
        let sender = EventSender::new(event_tx);
        let state = Arc::new(match store {
            Some(store) => {
                let sessions = SessionManager::new(store, cfg.session_ttl());
                AppState::with_sessions(Arc::new(pool), cfg, sender, sessions)
            }
            None => AppState::new(Arc::new(pool), cfg, sender).expect("in-memory session store"),
        });
        let router = storefront_api::build_router(state.clone(), CorsLayer::permissive());

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    pub async fn with_inventory_decrement(warehouse: bool) -> (Self, Option<WarehouseModel>) {
        // The first warehouse inserted into a fresh database gets id 1.
        let app = Self::with_config(|cfg| {
            cfg.checkout_inventory_policy = CheckoutInventoryPolicy::Decrement;
            cfg.checkout_warehouse_id = if warehouse { Some(1) } else { None };
        })
        .await;
        let seeded = if warehouse {
            Some(app.seed_warehouse("Main", 1_000).await)
        } else {
            None
        };
        (app, seeded)
    }

    /// A client with its own cookie jar.
    pub fn browser(&self) -> Browser {
        Browser {
            router: self.router.clone(),
            cookie: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn seed_category(&self, name: &str) -> CategoryModel {
        self.state
            .services
            .catalog
            .create_category(CreateCategoryInput { name: name.into() })
            .await
            .expect("seed category")
    }

    pub async fn seed_product(&self, category_id: i32, name: &str, price: Decimal) -> ProductModel {
        self.state
            .services
            .catalog
            .create_product(CreateProductInput {
                category_id,
                name: name.into(),
                price,
                description: format!("{name} for tests"),
                image: None,
                stock: 10,
                sku: None,
            })
            .await
            .expect("seed product")
    }

    pub async fn seed_warehouse(&self, name: &str, capacity: i32) -> WarehouseModel {
        self.state
            .services
            .warehouses
            .create_warehouse(CreateWarehouseInput {
                name: name.into(),
                location: "District 1".into(),
                phone: String::new(),
                manager_name: String::new(),
                capacity,
                is_active: true,
            })
            .await
            .expect("seed warehouse")
    }

    pub async fn register(&self, username: &str, email: &str) -> account::Model {
        self.state
            .services
            .accounts
            .register(RegisterInput {
                username: username.into(),
                email: email.into(),
                password: PASSWORD.into(),
                password_confirm: PASSWORD.into(),
                first_name: "Test".into(),
                last_name: "Customer".into(),
            })
            .await
            .expect("register account")
    }

    /// Registers an account and promotes it to staff.
    pub async fn seed_staff(&self, username: &str) -> account::Model {
        let created = self
            .register(username, &format!("{username}@staff.example"))
            .await;
        let mut active: account::ActiveModel = Account::find_by_id(created.id)
            .one(&*self.state.db)
            .await
            .expect("load staff")
            .expect("staff exists")
            .into();
        active.is_staff = Set(true);
        active.update(&*self.state.db).await.expect("promote staff")
    }

    /// A browser already logged in as a new staff account.
    pub async fn staff_browser(&self) -> Browser {
        let staff = self.seed_staff("keeper").await;
        let browser = self.browser();
        let response = browser.login(&staff.username, PASSWORD, true).await;
        assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
        browser
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Decoded response
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    pub fn set_cookie(&self) -> Option<&str> {
        self.headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
    }

    /// Field names reported in a validation failure, in order.
    pub fn error_fields(&self) -> Vec<String> {
        self.body["errors"]
            .as_array()
            .map(|errors| {
                errors
                    .iter()
                    .filter_map(|e| e["field"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Cookie-aware client. Clones share the jar, so concurrent requests carry the same session.
#[derive(Clone)]
pub struct Browser {
    router: Router,
    cookie: Arc<Mutex<Option<String>>>,
}

impl Browser {
    pub fn session_key(&self) -> Option<String> {
        self.cookie.lock().expect("cookie jar").clone()
    }

    pub fn set_session_key(&self, key: Option<String>) {
        *self.cookie.lock().expect("cookie jar") = key;
    }

    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = self.session_key() {
            builder = builder.header(header::COOKIE, format!("sessionid={key}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error during test request");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body bytes");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };

        let response = TestResponse {
            status,
            headers,
            body,
        };
        self.remember_cookie(&response);
        response
    }

    fn remember_cookie(&self, response: &TestResponse) {
        let Some(raw) = response.set_cookie() else {
            return;
        };
        let Some(value) = raw
            .split(';')
            .next()
            .and_then(|pair| pair.trim().strip_prefix("sessionid="))
        else {
            return;
        };
        if raw.contains("Max-Age=0") || value.is_empty() {
            self.set_session_key(None);
        } else {
            self.set_session_key(Some(value.to_string()));
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.send(Method::POST, uri, Some(body)).await
    }

    pub async fn put(&self, uri: &str, body: Value) -> TestResponse {
        self.send(Method::PUT, uri, Some(body)).await
    }

    pub async fn delete(&self, uri: &str) -> TestResponse {
        self.send(Method::DELETE, uri, None).await
    }

    pub async fn add_to_cart(&self, product_id: i32) -> TestResponse {
        self.send(
            Method::POST,
            &format!("/api/v1/cart/items/{product_id}"),
            None,
        )
        .await
    }

    pub async fn set_quantity(&self, product_id: i32, quantity: Value) -> TestResponse {
        self.put(
            &format!("/api/v1/cart/items/{product_id}"),
            json!({ "quantity": quantity }),
        )
        .await
    }

    pub async fn checkout(&self, name: &str, phone: &str, address: &str) -> TestResponse {
        self.post(
            "/api/v1/checkout",
            json!({ "customer_name": name, "phone": phone, "address": address }),
        )
        .await
    }

    pub async fn login(&self, identifier: &str, password: &str, remember: bool) -> TestResponse {
        self.post(
            "/api/v1/accounts/login",
            json!({ "identifier": identifier, "password": password, "remember": remember }),
        )
        .await
    }
}

/// Reads a money amount, which serializes as a decimal string.
pub fn money(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a money value: {other:?}"),
    }
}
