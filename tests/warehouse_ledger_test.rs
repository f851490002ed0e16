//! Warehouse ledger: movements, transfers, stocktakes, listings and the movement log.

mod common;

use axum::http::StatusCode;
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use storefront_api::{
    entities::{stock_movement, warehouse_stock, StockMovement, WarehouseStock},
    errors::ServiceError,
    models::StockChange,
    services::warehouse::{
        MovementLogFilter, RecordMovementInput, StockCountInput, MOVEMENT_LOG_LIMIT,
    },
};

async fn movement_sum(app: &TestApp, warehouse_id: i32, product_id: i32) -> (i32, i32) {
    let row = WarehouseStock::find()
        .filter(warehouse_stock::Column::WarehouseId.eq(warehouse_id))
        .filter(warehouse_stock::Column::ProductId.eq(product_id))
        .one(&*app.state.db)
        .await
        .expect("load stock row")
        .expect("stock row exists");
    let sum = StockMovement::find()
        .filter(stock_movement::Column::WarehouseStockId.eq(row.id))
        .all(&*app.state.db)
        .await
        .expect("load movements")
        .iter()
        .map(|m| m.quantity)
        .sum();
    (row.quantity, sum)
}

#[tokio::test]
async fn movements_keep_quantity_equal_to_ledger_sum() {
    let app = TestApp::new().await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(10)).await;
    let warehouse = app.seed_warehouse("Central", 500).await;
    let staff = app.staff_browser().await;

    for change in [
        json!({ "type": "import", "quantity": 40 }),
        json!({ "type": "export", "quantity": 15 }),
        json!({ "type": "adjust", "quantity": -3 }),
        json!({ "type": "sale", "quantity": 2 }),
    ] {
        let response = staff
            .post(
                "/api/v1/admin/stock-movements",
                json!({
                    "warehouse_id": warehouse.id,
                    "product_id": pen.id,
                    "change": change,
                    "reference": "PO-1",
                }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    }

    let (quantity, sum) = movement_sum(&app, warehouse.id, pen.id).await;
    assert_eq!(quantity, 20);
    assert_eq!(quantity, sum);
}

#[tokio::test]
async fn zero_quantity_import_is_rejected() {
    let app = TestApp::new().await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(10)).await;
    let warehouse = app.seed_warehouse("Central", 500).await;
    let staff = app.staff_browser().await;

    let response = staff
        .post(
            "/api/v1/admin/stock-movements",
            json!({
                "warehouse_id": warehouse.id,
                "product_id": pen.id,
                "change": { "type": "import", "quantity": 0 },
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn movement_for_unknown_warehouse_is_not_found() {
    let app = TestApp::new().await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(10)).await;

    let result = app
        .state
        .services
        .warehouses
        .record_movement(
            RecordMovementInput {
                warehouse_id: 999,
                product_id: pen.id,
                change: StockChange::Import(5),
                reference: String::new(),
                notes: String::new(),
            },
            None,
        )
        .await;

    assert!(matches!(result, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn transfer_conserves_total_stock() {
    let app = TestApp::new().await;
    let category = app.seed_category("Paper").await;
    let ream = app.seed_product(category.id, "Ream", dec!(70)).await;
    let north = app.seed_warehouse("North", 100).await;
    let south = app.seed_warehouse("South", 100).await;
    let staff = app.staff_browser().await;
    staff
        .post(
            "/api/v1/admin/stock-movements",
            json!({
                "warehouse_id": north.id,
                "product_id": ream.id,
                "change": { "type": "import", "quantity": 30 },
            }),
        )
        .await;
    let before = app
        .state
        .services
        .warehouses
        .total_stock(ream.id)
        .await
        .expect("total before");

    let response = staff
        .post(
            "/api/v1/admin/stock-transfers",
            json!({
                "from_warehouse_id": north.id,
                "to_warehouse_id": south.id,
                "product_id": ream.id,
                "quantity": 12,
                "reference": "TR-1",
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    assert_eq!(response.data()["from_quantity"], 18);
    assert_eq!(response.data()["to_quantity"], 12);
    let after = app
        .state
        .services
        .warehouses
        .total_stock(ream.id)
        .await
        .expect("total after");
    assert_eq!(before, after);
    assert_eq!(movement_sum(&app, south.id, ream.id).await, (12, 12));
}

#[tokio::test]
async fn transfer_to_same_warehouse_is_rejected() {
    let app = TestApp::new().await;
    let category = app.seed_category("Paper").await;
    let ream = app.seed_product(category.id, "Ream", dec!(70)).await;
    let north = app.seed_warehouse("North", 100).await;
    let staff = app.staff_browser().await;

    let response = staff
        .post(
            "/api/v1/admin/stock-transfers",
            json!({
                "from_warehouse_id": north.id,
                "to_warehouse_id": north.id,
                "product_id": ream.id,
                "quantity": 1,
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stock_count_adjusts_to_counted_quantity() {
    let app = TestApp::new().await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(10)).await;
    let warehouse = app.seed_warehouse("Central", 500).await;
    let staff = app.staff_browser().await;
    staff
        .post(
            "/api/v1/admin/stock-movements",
            json!({
                "warehouse_id": warehouse.id,
                "product_id": pen.id,
                "change": { "type": "import", "quantity": 25 },
            }),
        )
        .await;

    let response = staff
        .post(
            "/api/v1/admin/stock-counts",
            json!({ "warehouse_id": warehouse.id, "product_id": pen.id, "counted": 21 }),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    assert_eq!(response.data()["quantity"], 21);
    assert!(!response.data()["last_counted"].is_null());
    assert_eq!(movement_sum(&app, warehouse.id, pen.id).await, (21, 21));

    let log = staff
        .get(&format!(
            "/api/v1/stock-movements?type=adjust&warehouse={}",
            warehouse.id
        ))
        .await;
    let entries = log.data().as_array().expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["reference"], "STOCKTAKE");
    assert_eq!(entries[0]["quantity"], -4);
}

#[tokio::test]
async fn empty_warehouse_reports_zero_items_and_over_capacity_goes_negative() {
    let app = TestApp::new().await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(10)).await;
    let tiny = app.seed_warehouse("Tiny", 10).await;
    let service = &app.state.services.warehouses;

    assert_eq!(service.total_items(tiny.id).await.expect("total"), 0);
    assert_eq!(service.available_capacity(tiny.id).await.expect("avail"), 10);

    service
        .record_movement(
            RecordMovementInput {
                warehouse_id: tiny.id,
                product_id: pen.id,
                change: StockChange::Import(14),
                reference: String::new(),
                notes: String::new(),
            },
            None,
        )
        .await
        .expect("import");

    assert_eq!(service.available_capacity(tiny.id).await.expect("avail"), -4);
}

#[tokio::test]
async fn fill_status_follows_thresholds() {
    let app = TestApp::new().await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(10)).await;
    let service = &app.state.services.warehouses;

    for (name, items, expected) in [
        ("Ninety-five", 95, "critical"),
        ("Ninety-one", 91, "critical"),
        ("Seventy-five", 75, "warning"),
        ("Ten", 10, "normal"),
    ] {
        let warehouse = app.seed_warehouse(name, 100).await;
        service
            .record_movement(
                RecordMovementInput {
                    warehouse_id: warehouse.id,
                    product_id: pen.id,
                    change: StockChange::Import(items),
                    reference: String::new(),
                    notes: String::new(),
                },
                None,
            )
            .await
            .expect("import");
        let detail = service.detail(warehouse.id).await.expect("detail");
        assert_eq!(detail.summary.status.to_string(), expected, "{name}");
    }

    let stats = app.browser().get("/api/v1/warehouses/statistics").await;
    assert_eq!(stats.status, StatusCode::OK);
    assert_eq!(stats.data()["total_warehouses"], 4);
    assert_eq!(stats.data()["total_items"], 271);
    assert_eq!(stats.data()["total_capacity"], 400);
}

#[tokio::test]
async fn inactive_warehouses_are_hidden() {
    let app = TestApp::new().await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(10)).await;
    let open = app.seed_warehouse("Open", 100).await;
    let closed = app.seed_warehouse("Closed", 100).await;
    let staff = app.staff_browser().await;
    for warehouse_id in [open.id, closed.id] {
        staff
            .post(
                "/api/v1/admin/stock-movements",
                json!({
                    "warehouse_id": warehouse_id,
                    "product_id": pen.id,
                    "change": { "type": "import", "quantity": 5 },
                }),
            )
            .await;
    }

    let deactivate = staff
        .put(
            &format!("/api/v1/admin/warehouses/{}/active", closed.id),
            json!({ "is_active": false }),
        )
        .await;
    assert_eq!(deactivate.status, StatusCode::OK);

    let visitor = app.browser();
    let listing = visitor.get("/api/v1/warehouses").await;
    let names: Vec<_> = listing
        .data()
        .as_array()
        .expect("warehouses")
        .iter()
        .map(|w| w["name"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(names, vec!["Open"]);

    let detail = visitor
        .get(&format!("/api/v1/warehouses/{}", closed.id))
        .await;
    assert_eq!(detail.status, StatusCode::NOT_FOUND);

    let availability = visitor
        .get(&format!("/api/v1/products/{}/availability", pen.id))
        .await;
    assert_eq!(availability.status, StatusCode::OK);
    assert_eq!(availability.data()["warehouse_total"], 5);
    assert_eq!(availability.data()["total_stock"], 15);
    assert_eq!(
        availability.data()["warehouses"]
            .as_array()
            .expect("warehouses")
            .len(),
        1
    );
}

#[tokio::test]
async fn movement_log_is_capped_and_newest_first() {
    let app = TestApp::new().await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(10)).await;
    let warehouse = app.seed_warehouse("Busy", 10_000).await;
    let service = &app.state.services.warehouses;

    for i in 1..=105 {
        service
            .record_movement(
                RecordMovementInput {
                    warehouse_id: warehouse.id,
                    product_id: pen.id,
                    change: StockChange::Import(1),
                    reference: format!("R-{i}"),
                    notes: String::new(),
                },
                None,
            )
            .await
            .expect("import");
    }

    let log = service
        .movement_log(MovementLogFilter::default())
        .await
        .expect("log");
    assert_eq!(log.len() as u64, MOVEMENT_LOG_LIMIT);
    assert_eq!(log[0].movement.reference, "R-105");
    assert_eq!(log[0].warehouse_name, "Busy");
    assert_eq!(log[0].product_name, "Pen");
}

#[tokio::test]
async fn staff_movements_record_their_author() {
    let app = TestApp::new().await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(10)).await;
    let warehouse = app.seed_warehouse("Central", 100).await;
    let staff = app.staff_browser().await;

    staff
        .post(
            "/api/v1/admin/stock-movements",
            json!({
                "warehouse_id": warehouse.id,
                "product_id": pen.id,
                "change": { "type": "import", "quantity": 3 },
            }),
        )
        .await;

    let movement = StockMovement::find()
        .one(&*app.state.db)
        .await
        .expect("load movement")
        .expect("movement recorded");
    assert!(movement.created_by.is_some());
}

#[tokio::test]
async fn count_against_extreme_negative_quantity_is_rejected() {
    let app = TestApp::new().await;
    let category = app.seed_category("Pens").await;
    let pen = app.seed_product(category.id, "Pen", dec!(10)).await;
    let warehouse = app.seed_warehouse("Central", 100).await;
    let service = &app.state.services.warehouses;
    service
        .record_movement(
            RecordMovementInput {
                warehouse_id: warehouse.id,
                product_id: pen.id,
                change: StockChange::Adjust(i32::MIN + 1),
                reference: String::new(),
                notes: String::new(),
            },
            None,
        )
        .await
        .expect("adjust");

    let result = service
        .record_count(
            StockCountInput {
                warehouse_id: warehouse.id,
                product_id: pen.id,
                counted: 10,
                notes: String::new(),
            },
            None,
        )
        .await;

    match result {
        Err(ServiceError::InvalidFields(fields)) => assert_eq!(fields[0].field, "quantity"),
        other => panic!("expected a quantity error, got {other:?}"),
    }
    assert_eq!(
        movement_sum(&app, warehouse.id, pen.id).await,
        (i32::MIN + 1, i32::MIN + 1)
    );
}
