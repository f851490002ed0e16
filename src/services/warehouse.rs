//! Multi-warehouse stock ledger.
//!
//! Every change to `warehouse_stocks.quantity` goes through [`apply_movement`], which
//! applies the delta with a single `quantity = quantity + ?` update and appends the
//! matching `stock_movements` row on the same connection.

use crate::{
    db::map_unique_violation,
    entities::{
        product, stock_movement, warehouse, warehouse_stock, MovementType, Product,
        ProductModel, StockMovement, StockMovementModel, Warehouse, WarehouseModel,
        WarehouseStock, WarehouseStockModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::{stock::fill_percent, StockChange, StockStatus},
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

/// Movement log entries returned per query
pub const MOVEMENT_LOG_LIMIT: u64 = 100;

/// Outcome of one applied movement
#[derive(Debug, Clone, Serialize)]
pub struct MovementOutcome {
    pub movement_id: i32,
    pub warehouse_id: i32,
    pub product_id: i32,
    pub movement_type: MovementType,
    pub delta: i32,
    pub new_quantity: i32,
}

impl MovementOutcome {
    fn event(&self) -> Event {
        Event::StockMovementRecorded {
            warehouse_id: self.warehouse_id,
            product_id: self.product_id,
            movement_type: self.movement_type,
            delta: self.delta,
            new_quantity: self.new_quantity,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RecordMovementInput {
    pub warehouse_id: i32,
    pub product_id: i32,
    pub change: StockChange,
    #[serde(default)]
    #[validate(length(max = 100, message = "Reference must be at most 100 characters"))]
    pub reference: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct TransferInput {
    pub from_warehouse_id: i32,
    pub to_warehouse_id: i32,
    pub product_id: i32,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
    #[serde(default)]
    #[validate(length(max = 100, message = "Reference must be at most 100 characters"))]
    pub reference: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct StockCountInput {
    pub warehouse_id: i32,
    pub product_id: i32,
    #[validate(range(min = 0, message = "Counted quantity cannot be negative"))]
    pub counted: i32,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateWarehouseInput {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,
    #[validate(length(min = 1, message = "Location is required"))]
    pub location: String,
    #[serde(default)]
    #[validate(length(max = 15, message = "Phone must be at most 15 characters"))]
    pub phone: String,
    #[serde(default)]
    #[validate(length(max = 100, message = "Manager name must be at most 100 characters"))]
    pub manager_name: String,
    #[serde(default)]
    #[validate(range(min = 0, message = "Capacity cannot be negative"))]
    pub capacity: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub from_quantity: i32,
    pub to_quantity: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarehouseSummary {
    #[serde(flatten)]
    pub warehouse: WarehouseModel,
    pub total_items: i64,
    /// Capacity minus items held; negative when over capacity
    pub available_capacity: i64,
    pub status: StockStatus,
}

impl WarehouseSummary {
    fn new(warehouse: WarehouseModel, total_items: i64) -> Self {
        let available_capacity = i64::from(warehouse.capacity) - total_items;
        let status = StockStatus::classify(total_items, warehouse.capacity);
        Self {
            warehouse,
            total_items,
            available_capacity,
            status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StockLine {
    #[serde(flatten)]
    pub stock: WarehouseStockModel,
    pub product_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarehouseDetail {
    #[serde(flatten)]
    pub summary: WarehouseSummary,
    pub stocks: Vec<StockLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarehouseQuantity {
    pub warehouse_id: i32,
    pub warehouse_name: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductAvailability {
    pub product_id: i32,
    pub product_name: String,
    /// General counter kept on the product itself
    pub general_stock: i32,
    pub warehouses: Vec<WarehouseQuantity>,
    pub warehouse_total: i64,
    pub total_stock: i64,
    pub is_in_stock: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MovementLogEntry {
    #[serde(flatten)]
    pub movement: StockMovementModel,
    pub warehouse_id: i32,
    pub warehouse_name: String,
    pub product_id: i32,
    pub product_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MovementLogFilter {
    #[serde(rename = "type")]
    pub movement_type: Option<MovementType>,
    pub warehouse: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarehouseStat {
    pub id: i32,
    pub name: String,
    pub total_items: i64,
    pub capacity: i32,
    pub available: i64,
    /// Fill percentage, two decimal places; zero when capacity is zero
    pub percent: Decimal,
    pub status: StockStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarehouseStatistics {
    pub warehouses: Vec<WarehouseStat>,
    pub total_warehouses: usize,
    pub total_capacity: i64,
    pub total_items: i64,
    pub total_products: u64,
}

/// Applies one stock change on `conn` and appends its movement row.
///
/// Callers own the transaction; nothing here commits.
pub(crate) async fn apply_movement<C: ConnectionTrait>(
    conn: &C,
    warehouse_id: i32,
    product_id: i32,
    change: StockChange,
    reference: &str,
    notes: &str,
    actor: Option<i32>,
) -> Result<MovementOutcome, ServiceError> {
    let delta = change.delta()?;

    if Warehouse::find_by_id(warehouse_id).one(conn).await?.is_none() {
        return Err(ServiceError::NotFound(format!(
            "Warehouse {} not found",
            warehouse_id
        )));
    }
    if Product::find_by_id(product_id).one(conn).await?.is_none() {
        return Err(ServiceError::NotFound(format!(
            "Product {} not found",
            product_id
        )));
    }

    let stock = ensure_stock_row(conn, warehouse_id, product_id).await?;
    let now = Utc::now();

    WarehouseStock::update_many()
        .col_expr(
            warehouse_stock::Column::Quantity,
            Expr::col(warehouse_stock::Column::Quantity).add(delta),
        )
        .col_expr(warehouse_stock::Column::UpdatedAt, Expr::value(now))
        .filter(warehouse_stock::Column::Id.eq(stock.id))
        .exec(conn)
        .await?;

    let new_quantity = WarehouseStock::find_by_id(stock.id)
        .one(conn)
        .await?
        .map(|s| s.quantity)
        .ok_or_else(|| ServiceError::InternalError("stock row vanished mid-update".into()))?;

    let movement = stock_movement::ActiveModel {
        warehouse_stock_id: Set(stock.id),
        movement_type: Set(change.movement_type()),
        quantity: Set(delta),
        reference: Set(reference.to_string()),
        notes: Set(notes.to_string()),
        created_by: Set(actor),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    if new_quantity < 0 {
        warn!(
            warehouse_id,
            product_id, new_quantity, "Stock quantity went negative"
        );
    }

    Ok(MovementOutcome {
        movement_id: movement.id,
        warehouse_id,
        product_id,
        movement_type: change.movement_type(),
        delta,
        new_quantity,
    })
}

/// Returns the (warehouse, product) row, creating it at zero if absent.
async fn ensure_stock_row<C: ConnectionTrait>(
    conn: &C,
    warehouse_id: i32,
    product_id: i32,
) -> Result<WarehouseStockModel, ServiceError> {
    if let Some(row) = find_stock_row(conn, warehouse_id, product_id).await? {
        return Ok(row);
    }

    let now = Utc::now();
    let row = warehouse_stock::ActiveModel {
        warehouse_id: Set(warehouse_id),
        product_id: Set(product_id),
        quantity: Set(0),
        last_counted: Set(None),
        notes: Set(String::new()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    WarehouseStock::insert(row)
        .on_conflict(
            OnConflict::columns([
                warehouse_stock::Column::WarehouseId,
                warehouse_stock::Column::ProductId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    find_stock_row(conn, warehouse_id, product_id)
        .await?
        .ok_or_else(|| ServiceError::InternalError("stock row missing after insert".into()))
}

async fn find_stock_row<C: ConnectionTrait>(
    conn: &C,
    warehouse_id: i32,
    product_id: i32,
) -> Result<Option<WarehouseStockModel>, ServiceError> {
    Ok(WarehouseStock::find()
        .filter(warehouse_stock::Column::WarehouseId.eq(warehouse_id))
        .filter(warehouse_stock::Column::ProductId.eq(product_id))
        .one(conn)
        .await?)
}

#[derive(Clone)]
pub struct WarehouseService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl WarehouseService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Publishes events and counters for movements whose transaction has committed.
    pub async fn publish(&self, outcomes: &[MovementOutcome]) {
        for outcome in outcomes {
            counter!(
                "storefront.stock.movements",
                1,
                "type" => outcome.movement_type.to_string()
            );
            self.event_sender.send_or_log(outcome.event()).await;
        }
    }

    /// Records one movement in its own transaction and returns the resulting quantity.
    #[instrument(skip(self))]
    pub async fn record_movement(
        &self,
        input: RecordMovementInput,
        actor: Option<i32>,
    ) -> Result<i32, ServiceError> {
        let txn = self.db.begin().await?;
        let outcome = apply_movement(
            &txn,
            input.warehouse_id,
            input.product_id,
            input.change,
            &input.reference,
            &input.notes,
            actor,
        )
        .await?;
        txn.commit().await?;

        info!(
            warehouse_id = outcome.warehouse_id,
            product_id = outcome.product_id,
            delta = outcome.delta,
            new_quantity = outcome.new_quantity,
            "Stock movement recorded"
        );
        self.publish(std::slice::from_ref(&outcome)).await;
        Ok(outcome.new_quantity)
    }

    /// Moves `quantity` units between two warehouses as a pair of `transfer` movements.
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        input: TransferInput,
        actor: Option<i32>,
    ) -> Result<TransferOutcome, ServiceError> {
        if input.from_warehouse_id == input.to_warehouse_id {
            return Err(ServiceError::ValidationError(
                "Source and destination warehouses must differ".into(),
            ));
        }

        let txn = self.db.begin().await?;
        let out = apply_movement(
            &txn,
            input.from_warehouse_id,
            input.product_id,
            StockChange::Transfer(-input.quantity),
            &input.reference,
            &input.notes,
            actor,
        )
        .await?;
        let inbound = apply_movement(
            &txn,
            input.to_warehouse_id,
            input.product_id,
            StockChange::Transfer(input.quantity),
            &input.reference,
            &input.notes,
            actor,
        )
        .await?;
        txn.commit().await?;

        self.publish(&[out.clone(), inbound.clone()]).await;
        Ok(TransferOutcome {
            from_quantity: out.new_quantity,
            to_quantity: inbound.new_quantity,
        })
    }

    /// Stocktake: records the difference as an `adjust` movement and stamps `last_counted`.
    #[instrument(skip(self))]
    pub async fn record_count(
        &self,
        input: StockCountInput,
        actor: Option<i32>,
    ) -> Result<WarehouseStockModel, ServiceError> {
        let txn = self.db.begin().await?;
        let current = find_stock_row(&txn, input.warehouse_id, input.product_id)
            .await?
            .map(|s| s.quantity)
            .unwrap_or(0);
        let Some(delta) = input.counted.checked_sub(current) else {
            return Err(ServiceError::field(
                "quantity",
                "Recorded quantity is out of range for a count",
            ));
        };
        let outcome = apply_movement(
            &txn,
            input.warehouse_id,
            input.product_id,
            StockChange::Adjust(delta),
            "STOCKTAKE",
            &input.notes,
            actor,
        )
        .await?;

        WarehouseStock::update_many()
            .col_expr(
                warehouse_stock::Column::LastCounted,
                Expr::value(Some(Utc::now())),
            )
            .filter(warehouse_stock::Column::WarehouseId.eq(input.warehouse_id))
            .filter(warehouse_stock::Column::ProductId.eq(input.product_id))
            .exec(&txn)
            .await?;
        let row = find_stock_row(&txn, input.warehouse_id, input.product_id)
            .await?
            .ok_or_else(|| ServiceError::InternalError("stock row missing after count".into()))?;
        txn.commit().await?;

        self.publish(std::slice::from_ref(&outcome)).await;
        Ok(row)
    }

    /// Sum of quantities held; zero when the warehouse has no rows.
    pub async fn total_items(&self, warehouse_id: i32) -> Result<i64, ServiceError> {
        let total: Option<Option<i64>> = WarehouseStock::find()
            .select_only()
            .column_as(warehouse_stock::Column::Quantity.sum(), "total")
            .filter(warehouse_stock::Column::WarehouseId.eq(warehouse_id))
            .into_tuple()
            .one(&*self.db)
            .await?;
        Ok(total.flatten().unwrap_or(0))
    }

    /// Capacity minus total items, not clamped at zero.
    pub async fn available_capacity(&self, warehouse_id: i32) -> Result<i64, ServiceError> {
        let warehouse = self.find_warehouse(warehouse_id).await?;
        let total = self.total_items(warehouse_id).await?;
        Ok(i64::from(warehouse.capacity) - total)
    }

    /// Sum over every warehouse holding the product, active or not.
    pub async fn total_stock(&self, product_id: i32) -> Result<i64, ServiceError> {
        let total: Option<Option<i64>> = WarehouseStock::find()
            .select_only()
            .column_as(warehouse_stock::Column::Quantity.sum(), "total")
            .filter(warehouse_stock::Column::ProductId.eq(product_id))
            .into_tuple()
            .one(&*self.db)
            .await?;
        Ok(total.flatten().unwrap_or(0))
    }

    async fn totals_by_warehouse(&self) -> Result<HashMap<i32, i64>, ServiceError> {
        let rows: Vec<(i32, Option<i64>)> = WarehouseStock::find()
            .select_only()
            .column(warehouse_stock::Column::WarehouseId)
            .column_as(warehouse_stock::Column::Quantity.sum(), "total")
            .group_by(warehouse_stock::Column::WarehouseId)
            .into_tuple()
            .all(&*self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, total)| (id, total.unwrap_or(0)))
            .collect())
    }

    async fn find_warehouse(&self, id: i32) -> Result<WarehouseModel, ServiceError> {
        Warehouse::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Warehouse {} not found", id)))
    }

    async fn find_active_warehouse(&self, id: i32) -> Result<WarehouseModel, ServiceError> {
        match self.find_warehouse(id).await? {
            w if w.is_active => Ok(w),
            _ => Err(ServiceError::NotFound(format!("Warehouse {} not found", id))),
        }
    }

    async fn active_warehouses(&self) -> Result<Vec<WarehouseModel>, ServiceError> {
        Ok(Warehouse::find()
            .filter(warehouse::Column::IsActive.eq(true))
            .order_by_asc(warehouse::Column::Name)
            .all(&*self.db)
            .await?)
    }

    /// Active warehouses by name with their fill level.
    #[instrument(skip(self))]
    pub async fn list_active(&self) -> Result<Vec<WarehouseSummary>, ServiceError> {
        let totals = self.totals_by_warehouse().await?;
        Ok(self
            .active_warehouses()
            .await?
            .into_iter()
            .map(|w| {
                let total = totals.get(&w.id).copied().unwrap_or(0);
                WarehouseSummary::new(w, total)
            })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn detail(&self, id: i32) -> Result<WarehouseDetail, ServiceError> {
        let warehouse = self.find_active_warehouse(id).await?;
        let rows = WarehouseStock::find()
            .filter(warehouse_stock::Column::WarehouseId.eq(id))
            .find_also_related(Product)
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await?;

        let total: i64 = rows.iter().map(|(s, _)| i64::from(s.quantity)).sum();
        let stocks = rows
            .into_iter()
            .map(|(stock, product)| StockLine {
                stock,
                product_name: product.map(|p| p.name).unwrap_or_default(),
            })
            .collect();

        Ok(WarehouseDetail {
            summary: WarehouseSummary::new(warehouse, total),
            stocks,
        })
    }

    /// Per-warehouse quantities of one product across active warehouses.
    #[instrument(skip(self))]
    pub async fn product_availability(
        &self,
        product_id: i32,
    ) -> Result<ProductAvailability, ServiceError> {
        let product: ProductModel = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let rows = WarehouseStock::find()
            .filter(warehouse_stock::Column::ProductId.eq(product_id))
            .find_also_related(Warehouse)
            .filter(warehouse::Column::IsActive.eq(true))
            .order_by_asc(warehouse::Column::Name)
            .all(&*self.db)
            .await?;

        let warehouses: Vec<WarehouseQuantity> = rows
            .into_iter()
            .filter_map(|(stock, warehouse)| {
                warehouse.map(|w| WarehouseQuantity {
                    warehouse_id: w.id,
                    warehouse_name: w.name,
                    quantity: stock.quantity,
                })
            })
            .collect();
        let warehouse_total: i64 = warehouses.iter().map(|w| i64::from(w.quantity)).sum();

        Ok(ProductAvailability {
            product_id,
            product_name: product.name,
            general_stock: product.stock,
            total_stock: i64::from(product.stock) + warehouse_total,
            is_in_stock: product.stock > 0 || warehouse_total > 0,
            warehouses,
            warehouse_total,
        })
    }

    /// Most recent movements first, at most [`MOVEMENT_LOG_LIMIT`].
    #[instrument(skip(self))]
    pub async fn movement_log(
        &self,
        filter: MovementLogFilter,
    ) -> Result<Vec<MovementLogEntry>, ServiceError> {
        let mut query = StockMovement::find().find_also_related(WarehouseStock);
        if let Some(movement_type) = filter.movement_type {
            query = query.filter(stock_movement::Column::MovementType.eq(movement_type));
        }
        if let Some(warehouse_id) = filter.warehouse {
            query = query.filter(warehouse_stock::Column::WarehouseId.eq(warehouse_id));
        }
        let rows = query
            .order_by_desc(stock_movement::Column::CreatedAt)
            .order_by_desc(stock_movement::Column::Id)
            .limit(MOVEMENT_LOG_LIMIT)
            .all(&*self.db)
            .await?;

        let mut warehouse_ids: Vec<i32> = Vec::new();
        let mut product_ids: Vec<i32> = Vec::new();
        for (_, stock) in &rows {
            if let Some(s) = stock {
                warehouse_ids.push(s.warehouse_id);
                product_ids.push(s.product_id);
            }
        }
        let warehouse_names: HashMap<i32, String> = Warehouse::find()
            .filter(warehouse::Column::Id.is_in(warehouse_ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|w| (w.id, w.name))
            .collect();
        let product_names: HashMap<i32, String> = Product::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|p| (p.id, p.name))
            .collect();

        Ok(rows
            .into_iter()
            .filter_map(|(movement, stock)| {
                let stock = stock?;
                Some(MovementLogEntry {
                    movement,
                    warehouse_id: stock.warehouse_id,
                    warehouse_name: warehouse_names
                        .get(&stock.warehouse_id)
                        .cloned()
                        .unwrap_or_default(),
                    product_id: stock.product_id,
                    product_name: product_names
                        .get(&stock.product_id)
                        .cloned()
                        .unwrap_or_default(),
                })
            })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn statistics(&self) -> Result<WarehouseStatistics, ServiceError> {
        let summaries = self.list_active().await?;
        let total_products = Product::find().count(&*self.db).await?;

        let warehouses: Vec<WarehouseStat> = summaries
            .into_iter()
            .map(|s| WarehouseStat {
                id: s.warehouse.id,
                name: s.warehouse.name,
                total_items: s.total_items,
                capacity: s.warehouse.capacity,
                available: s.available_capacity,
                percent: fill_percent(s.total_items, s.warehouse.capacity)
                    .map(|p| p.round_dp(2))
                    .unwrap_or(Decimal::ZERO),
                status: s.status,
            })
            .collect();

        Ok(WarehouseStatistics {
            total_warehouses: warehouses.len(),
            total_capacity: warehouses.iter().map(|w| i64::from(w.capacity)).sum(),
            total_items: warehouses.iter().map(|w| w.total_items).sum(),
            total_products,
            warehouses,
        })
    }

    #[instrument(skip(self))]
    pub async fn create_warehouse(
        &self,
        input: CreateWarehouseInput,
    ) -> Result<WarehouseModel, ServiceError> {
        let name = input.name.trim().to_string();
        let now = Utc::now();
        let warehouse = warehouse::ActiveModel {
            name: Set(name.clone()),
            location: Set(input.location.trim().to_string()),
            phone: Set(input.phone.trim().to_string()),
            manager_name: Set(input.manager_name.trim().to_string()),
            capacity: Set(input.capacity),
            is_active: Set(input.is_active),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            map_unique_violation(e, || {
                ServiceError::Conflict(format!("Warehouse {} already exists", name))
            })
        })?;
        info!(warehouse_id = warehouse.id, "Warehouse created");
        Ok(warehouse)
    }

    #[instrument(skip(self))]
    pub async fn set_active(&self, id: i32, is_active: bool) -> Result<WarehouseModel, ServiceError> {
        let warehouse = self.find_warehouse(id).await?;
        let mut active: warehouse::ActiveModel = warehouse.into();
        active.is_active = Set(is_active);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;
        info!(warehouse_id = id, is_active, "Warehouse activity changed");
        Ok(updated)
    }
}
