//! Checkout: order creation, validation, emptiness checks, concurrency and inventory policy.

mod common;

use async_trait::async_trait;
use axum::http::StatusCode;
use common::{money, TestApp, PASSWORD};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use storefront_api::{
    entities::{
        stock_movement, warehouse_stock, MovementType, Order, OrderItem, Product, StockMovement,
        WarehouseStock,
    },
    session::{InMemorySessionStore, SessionData, SessionError, SessionStore},
};

/// Session store that refuses to persist an emptied cart.
#[derive(Default)]
struct RefuseEmptyCartStore {
    inner: InMemorySessionStore,
}

#[async_trait]
impl SessionStore for RefuseEmptyCartStore {
    async fn load(&self, key: &str) -> Result<Option<SessionData>, SessionError> {
        self.inner.load(key).await
    }

    async fn save(&self, key: &str, data: &SessionData, ttl: Duration) -> Result<(), SessionError> {
        if data.cart.is_empty() {
            return Err(SessionError::OperationFailed("store unavailable".into()));
        }
        self.inner.save(key, data, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        self.inner.delete(key).await
    }

    async fn health(&self) -> Result<(), SessionError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "refuse-empty"
    }
}

async fn order_count(app: &TestApp) -> u64 {
    Order::find().count(&*app.state.db).await.expect("count orders")
}

#[tokio::test]
async fn checkout_creates_one_order_and_empties_cart() {
    let app = TestApp::new().await;
    let category = app.seed_category("Stationery").await;
    let notebook = app.seed_product(category.id, "Notebook", dec!(50)).await;
    let ruler = app.seed_product(category.id, "Ruler", dec!(30)).await;
    let browser = app.browser();
    browser.add_to_cart(notebook.id).await;
    browser.add_to_cart(notebook.id).await;
    browser.add_to_cart(ruler.id).await;

    let response = browser
        .checkout(" Nguyen An ", "0901234567", "12 Le Loi, District 1")
        .await;

    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    let order = response.data();
    assert_eq!(order["customer_name"], "Nguyen An");
    assert_eq!(order["status"], "pending");
    assert_eq!(money(&order["total_price"]), dec!(130));
    assert!(order["account_id"].is_null());
    let items = order["items"].as_array().expect("items");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["product_name"], "Notebook");
    assert_eq!(items[0]["quantity"], 2);
    assert_eq!(money(&items[0]["line_total"]), dec!(100));

    assert_eq!(order_count(&app).await, 1);
    assert_eq!(
        OrderItem::find().count(&*app.state.db).await.expect("count items"),
        2
    );
    let cart = browser.get("/api/v1/cart").await;
    assert_eq!(cart.data()["item_count"], 0);
}

#[tokio::test]
async fn preview_returns_snapshot_or_empty_cart() {
    let app = TestApp::new().await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(15)).await;
    let browser = app.browser();

    let empty = browser.get("/api/v1/checkout").await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);
    assert_eq!(empty.body["message"], "Cart is empty");

    browser.add_to_cart(pen.id).await;
    let preview = browser.get("/api/v1/checkout").await;
    assert_eq!(preview.status, StatusCode::OK);
    assert_eq!(money(&preview.data()["total_price"]), dec!(15));
}

#[tokio::test]
async fn empty_cart_fails_before_validation() {
    let app = TestApp::new().await;
    let browser = app.browser();

    let response = browser.checkout("", "", "").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["message"], "Cart is empty");
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn blank_fields_are_all_reported_and_no_order_is_created() {
    let app = TestApp::new().await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(15)).await;
    let browser = app.browser();
    browser.add_to_cart(pen.id).await;

    let response = browser.checkout("   ", "", "\n").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.error_fields(),
        vec!["customer_name", "phone", "address"]
    );
    assert_eq!(order_count(&app).await, 0);
    let cart = browser.get("/api/v1/cart").await;
    assert_eq!(cart.data()["item_count"], 1);
}

#[tokio::test]
async fn missing_product_aborts_checkout() {
    let app = TestApp::new().await;
    let category = app.seed_category("Seasonal").await;
    let card = app.seed_product(category.id, "Card", dec!(20)).await;
    let browser = app.browser();
    browser.add_to_cart(card.id).await;
    app.state
        .services
        .catalog
        .delete_category(category.id)
        .await
        .expect("delete category");

    let response = browser.checkout("An", "0901", "1 Le Loi").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn concurrent_checkouts_of_one_cart_create_one_order() {
    let app = TestApp::new().await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(15)).await;
    let browser = app.browser();
    browser.add_to_cart(pen.id).await;

    let (a, b) = tokio::join!(
        browser.checkout("An", "0901", "1 Le Loi"),
        browser.checkout("An", "0901", "1 Le Loi"),
    );

    let mut statuses = vec![a.status, b.status];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::BAD_REQUEST]);
    assert_eq!(order_count(&app).await, 1);
}

#[tokio::test]
async fn logged_in_checkout_records_account_and_appears_in_history() {
    let app = TestApp::new().await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(15)).await;
    let account = app.register("mai", "mai@example.com").await;
    let browser = app.browser();
    browser.add_to_cart(pen.id).await;
    let login = browser.login("mai", PASSWORD, false).await;
    assert_eq!(login.status, StatusCode::OK);

    let placed = browser.checkout("Mai", "0902", "3 Hai Ba Trung").await;
    assert_eq!(placed.status, StatusCode::CREATED);
    assert_eq!(placed.data()["account_id"], account.id);
    let order_id = placed.data()["id"].as_i64().expect("order id");

    let history = browser.get("/api/v1/accounts/orders").await;
    assert_eq!(history.status, StatusCode::OK);
    assert_eq!(history.data().as_array().expect("orders").len(), 1);

    let detail = browser
        .get(&format!("/api/v1/accounts/orders/{order_id}"))
        .await;
    assert_eq!(detail.status, StatusCode::OK);
    assert_eq!(detail.data()["items"].as_array().expect("items").len(), 1);

    let stranger = app.register("lan", "lan@example.com").await;
    let other = app.browser();
    other.login(&stranger.username, PASSWORD, false).await;
    let hidden = other
        .get(&format!("/api/v1/accounts/orders/{order_id}"))
        .await;
    assert_eq!(hidden.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn default_policy_leaves_stock_untouched() {
    let app = TestApp::new().await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(15)).await;
    let browser = app.browser();
    browser.add_to_cart(pen.id).await;

    browser.checkout("An", "0901", "1 Le Loi").await;

    let product = Product::find_by_id(pen.id)
        .one(&*app.state.db)
        .await
        .expect("load product")
        .expect("product exists");
    assert_eq!(product.stock, 10);
    assert_eq!(
        StockMovement::find().count(&*app.state.db).await.expect("count"),
        0
    );
}

#[tokio::test]
async fn decrement_policy_updates_counter_and_records_sale() {
    let (app, warehouse) = TestApp::with_inventory_decrement(true).await;
    let warehouse = warehouse.expect("fulfilment warehouse");
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(15)).await;
    let browser = app.browser();
    browser.add_to_cart(pen.id).await;
    browser.add_to_cart(pen.id).await;

    let placed = browser.checkout("An", "0901", "1 Le Loi").await;
    assert_eq!(placed.status, StatusCode::CREATED, "{:?}", placed.body);
    let order_id = placed.data()["id"].as_i64().expect("order id");
    assert_eq!(placed.data()["warehouse_id"], warehouse.id);

    let product = Product::find_by_id(pen.id)
        .one(&*app.state.db)
        .await
        .expect("load product")
        .expect("product exists");
    assert_eq!(product.stock, 8);

    let row = WarehouseStock::find()
        .filter(warehouse_stock::Column::WarehouseId.eq(warehouse.id))
        .filter(warehouse_stock::Column::ProductId.eq(pen.id))
        .one(&*app.state.db)
        .await
        .expect("load stock row")
        .expect("stock row created");
    assert_eq!(row.quantity, -2);

    let sale = StockMovement::find()
        .filter(stock_movement::Column::WarehouseStockId.eq(row.id))
        .one(&*app.state.db)
        .await
        .expect("load movement")
        .expect("sale recorded");
    assert_eq!(sale.movement_type, MovementType::Sale);
    assert_eq!(sale.quantity, -2);
    assert_eq!(sale.reference, format!("ORDER-{order_id}"));
}

#[tokio::test]
async fn over_long_phone_is_rejected() {
    let app = TestApp::new().await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(15)).await;
    let browser = app.browser();
    browser.add_to_cart(pen.id).await;

    let response = browser
        .post(
            "/api/v1/checkout",
            json!({ "customer_name": "An", "phone": "0".repeat(16), "address": "1 Le Loi" }),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error_fields(), vec!["phone"]);
}

#[tokio::test]
async fn decrement_policy_refuses_to_oversell_general_stock() {
    let (app, _) = TestApp::with_inventory_decrement(false).await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(15)).await;
    let browser = app.browser();
    browser.set_quantity(pen.id, json!(25)).await;

    let response = browser.checkout("An", "0901", "1 Le Loi").await;

    assert_eq!(response.status, StatusCode::CONFLICT, "{:?}", response.body);
    assert_eq!(order_count(&app).await, 0);
    let product = Product::find_by_id(pen.id)
        .one(&*app.state.db)
        .await
        .expect("load product")
        .expect("product exists");
    assert_eq!(product.stock, 10);
    let cart = browser.get("/api/v1/cart").await;
    assert_eq!(cart.data()["item_count"], 25);
}

#[tokio::test]
async fn decrement_policy_allows_selling_the_last_unit() {
    let (app, _) = TestApp::with_inventory_decrement(false).await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(15)).await;
    let browser = app.browser();
    browser.set_quantity(pen.id, json!(10)).await;

    let response = browser.checkout("An", "0901", "1 Le Loi").await;

    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    let product = Product::find_by_id(pen.id)
        .one(&*app.state.db)
        .await
        .expect("load product")
        .expect("product exists");
    assert_eq!(product.stock, 0);
}

#[tokio::test]
async fn session_store_failure_leaves_no_order_and_keeps_cart() {
    let app = TestApp::with_session_store(Arc::new(RefuseEmptyCartStore::default())).await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(15)).await;
    let browser = app.browser();
    browser.add_to_cart(pen.id).await;

    let response = browser.checkout("An", "0901", "1 Le Loi").await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(order_count(&app).await, 0);
    assert_eq!(
        OrderItem::find().count(&*app.state.db).await.expect("count items"),
        0
    );
    let cart = browser.get("/api/v1/cart").await;
    assert_eq!(cart.data()["item_count"], 1);
}
