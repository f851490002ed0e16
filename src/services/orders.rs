use crate::{
    entities::{
        order, Order, OrderItem, OrderItemModel, OrderModel, OrderStatus, Warehouse,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Order with its frozen line items
#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

/// Order reads for customers and the admin-only status/warehouse mutations.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Orders placed by `account_id`, newest first.
    #[instrument(skip(self))]
    pub async fn history(&self, account_id: i32) -> Result<Vec<OrderWithItems>, ServiceError> {
        let rows = Order::find()
            .filter(order::Column::AccountId.eq(account_id))
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .find_with_related(OrderItem)
            .all(&*self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(order, items)| OrderWithItems { order, items })
            .collect())
    }

    /// One order, only if it belongs to `account_id`.
    #[instrument(skip(self))]
    pub async fn detail_for_account(
        &self,
        account_id: i32,
        order_id: i32,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = Order::find_by_id(order_id)
            .filter(order::Column::AccountId.eq(account_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let items = order.find_related(OrderItem).all(&*self.db).await?;
        Ok(OrderWithItems { order, items })
    }

    async fn find(&self, order_id: i32) -> Result<OrderModel, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Any status may follow any other.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: i32,
        status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let current = self.find(order_id).await?;
        let old_status = current.status;
        let mut active: order::ActiveModel = current.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        info!(order_id, %old_status, new_status = %status, "Order status updated");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: status,
            })
            .await;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn assign_warehouse(
        &self,
        order_id: i32,
        warehouse_id: i32,
    ) -> Result<OrderModel, ServiceError> {
        if Warehouse::find_by_id(warehouse_id)
            .one(&*self.db)
            .await?
            .is_none()
        {
            return Err(ServiceError::NotFound(format!(
                "Warehouse {} not found",
                warehouse_id
            )));
        }
        let current = self.find(order_id).await?;
        let mut active: order::ActiveModel = current.into();
        active.warehouse_id = Set(Some(warehouse_id));
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderWarehouseAssigned {
                order_id,
                warehouse_id,
            })
            .await;
        Ok(updated)
    }
}
