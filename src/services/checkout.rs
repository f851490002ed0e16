use crate::{
    config::CheckoutInventoryPolicy,
    entities::{order, order_item, product, OrderStatus, Product},
    errors::{FieldError, ServiceError},
    events::{Event, EventSender},
    middleware_helpers::session::SessionContext,
    models::{CartSnapshot, StockChange},
    services::{
        cart::{CartService, SessionWrite},
        orders::OrderWithItems,
        warehouse::{apply_movement, MovementOutcome, WarehouseService},
    },
    session::SessionManager,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

const CUSTOMER_NAME_MAX: usize = 100;
const PHONE_MAX: usize = 15;

/// Shipping details submitted with the order
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CheckoutInput {
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
}

impl CheckoutInput {
    /// Trims every field and collects all problems at once.
    fn cleaned(&self) -> Result<CheckoutInput, ServiceError> {
        let cleaned = CheckoutInput {
            customer_name: self.customer_name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            address: self.address.trim().to_string(),
        };

        let mut errors = Vec::new();
        for (field, value) in [
            ("customer_name", &cleaned.customer_name),
            ("phone", &cleaned.phone),
            ("address", &cleaned.address),
        ] {
            if value.is_empty() {
                errors.push(FieldError::required(field));
            }
        }
        if cleaned.customer_name.chars().count() > CUSTOMER_NAME_MAX {
            errors.push(FieldError::new(
                "customer_name",
                format!("Ensure this field has no more than {} characters", CUSTOMER_NAME_MAX),
            ));
        }
        if cleaned.phone.chars().count() > PHONE_MAX {
            errors.push(FieldError::new(
                "phone",
                format!("Ensure this field has no more than {} characters", PHONE_MAX),
            ));
        }

        if errors.is_empty() {
            Ok(cleaned)
        } else {
            Err(ServiceError::InvalidFields(errors))
        }
    }
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    sessions: SessionManager,
    cart: CartService,
    warehouses: WarehouseService,
    inventory_policy: CheckoutInventoryPolicy,
    fulfilment_warehouse: Option<i32>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        sessions: SessionManager,
        cart: CartService,
        warehouses: WarehouseService,
        inventory_policy: CheckoutInventoryPolicy,
        fulfilment_warehouse: Option<i32>,
    ) -> Self {
        Self {
            db,
            event_sender,
            sessions,
            cart,
            warehouses,
            inventory_policy,
            fulfilment_warehouse,
        }
    }

    /// Priced cart for the checkout page.
    #[instrument(skip(self, session))]
    pub async fn preview(&self, session: &SessionContext) -> Result<CartSnapshot, ServiceError> {
        if session.is_new {
            return Err(ServiceError::EmptyCart);
        }
        let data = self.sessions.load(&session.key).await?;
        if data.cart.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        self.cart.snapshot_with_totals(&data.cart).await
    }

    /// Turns the session cart into a pending order and empties the cart.
    ///
    /// The order rows commit only after the emptied cart has been stored. If the commit
    /// itself fails, the original cart is written back.
    #[instrument(skip(self, session, input))]
    pub async fn submit_order(
        &self,
        session: &SessionContext,
        input: &CheckoutInput,
        actor: Option<i32>,
    ) -> Result<SessionWrite<OrderWithItems>, ServiceError> {
        let result = self.submit_locked(session, input, actor).await;
        if let Err(e) = &result {
            counter!("storefront.checkout.failed", 1);
            if e.status_code().is_server_error() {
                error!(error = %e, "Checkout failed");
            } else {
                info!(error = %e, "Checkout rejected");
            }
        }
        result
    }

    async fn submit_locked(
        &self,
        session: &SessionContext,
        input: &CheckoutInput,
        actor: Option<i32>,
    ) -> Result<SessionWrite<OrderWithItems>, ServiceError> {
        let _guard = self.sessions.lock(&session.key).await;

        let original = self.sessions.load(&session.key).await?;
        if original.cart.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        let shipping = input.cleaned()?;
        let snapshot = self.cart.snapshot_with_totals(&original.cart).await?;

        let txn = self.db.begin().await?;
        let (placed, movements) = match self.write_order(&txn, &shipping, &snapshot, actor).await {
            Ok(written) => written,
            Err(e) => {
                rollback(txn).await;
                return Err(e);
            }
        };

        let mut cleared = original.clone();
        cleared.cart.clear();
        if let Err(e) = self.sessions.save(&session.key, &cleared).await {
            rollback(txn).await;
            return Err(e);
        }

        if let Err(e) = txn.commit().await {
            if let Err(restore) = self.sessions.save(&session.key, &original).await {
                error!(error = %restore, "Failed to restore cart after aborted checkout");
            }
            return Err(e.into());
        }

        counter!("storefront.orders.placed", 1);
        info!(
            order_id = placed.order.id,
            total = %placed.order.total_price,
            "Order placed"
        );
        self.warehouses.publish(&movements).await;
        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id: placed.order.id,
                account_id: placed.order.account_id,
                total_price: placed.order.total_price,
                line_count: placed.items.len(),
            })
            .await;

        Ok(SessionWrite {
            value: placed,
            expire_at_browser_close: cleared.expire_at_browser_close,
        })
    }

    async fn write_order(
        &self,
        txn: &DatabaseTransaction,
        shipping: &CheckoutInput,
        snapshot: &CartSnapshot,
        actor: Option<i32>,
    ) -> Result<(OrderWithItems, Vec<MovementOutcome>), ServiceError> {
        let now = Utc::now();
        let ships_from = match self.inventory_policy {
            CheckoutInventoryPolicy::Decrement => self.fulfilment_warehouse,
            CheckoutInventoryPolicy::None => None,
        };

        let order = order::ActiveModel {
            account_id: Set(actor),
            customer_name: Set(shipping.customer_name.clone()),
            phone: Set(shipping.phone.clone()),
            address: Set(shipping.address.clone()),
            total_price: Set(snapshot.total_price),
            status: Set(OrderStatus::Pending),
            warehouse_id: Set(ships_from),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(txn)
        .await?;

        let mut items = Vec::with_capacity(snapshot.lines.len());
        for line in &snapshot.lines {
            let quantity = i32::try_from(line.quantity)
                .map_err(|_| ServiceError::field("quantity", "Quantity is too large"))?;
            let item = order_item::ActiveModel {
                order_id: Set(order.id),
                product_id: Set(Some(line.product.id)),
                product_name: Set(line.product.name.clone()),
                unit_price: Set(line.product.price),
                quantity: Set(quantity),
                line_total: Set(line.subtotal),
                ..Default::default()
            }
            .insert(txn)
            .await?;
            items.push(item);
        }

        let mut movements = Vec::new();
        if self.inventory_policy == CheckoutInventoryPolicy::Decrement {
            let reference = format!("ORDER-{}", order.id);
            for item in &items {
                let Some(product_id) = item.product_id else {
                    continue;
                };
                let updated = Product::update_many()
                    .col_expr(
                        product::Column::Stock,
                        Expr::col(product::Column::Stock).sub(item.quantity),
                    )
                    .col_expr(product::Column::UpdatedAt, Expr::value(now))
                    .filter(product::Column::Id.eq(product_id))
                    .filter(product::Column::Stock.gte(item.quantity))
                    .exec(txn)
                    .await?;
                if updated.rows_affected != 1 {
                    return Err(ServiceError::Conflict(format!(
                        "Insufficient stock for {}",
                        item.product_name
                    )));
                }

                if let Some(warehouse_id) = ships_from {
                    let outcome = apply_movement(
                        txn,
                        warehouse_id,
                        product_id,
                        StockChange::Sale(item.quantity.unsigned_abs()),
                        &reference,
                        "",
                        actor,
                    )
                    .await?;
                    movements.push(outcome);
                }
            }
        }

        Ok((OrderWithItems { order, items }, movements))
    }
}

async fn rollback(txn: DatabaseTransaction) {
    if let Err(e) = txn.rollback().await {
        warn!(error = %e, "Checkout rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, phone: &str, address: &str) -> CheckoutInput {
        CheckoutInput {
            customer_name: name.into(),
            phone: phone.into(),
            address: address.into(),
        }
    }

    #[test]
    fn reports_every_blank_field() {
        let err = input("  ", "", "\t").cleaned().unwrap_err();
        let fields: Vec<_> = err
            .field_errors()
            .unwrap()
            .iter()
            .map(|f| f.field.as_str())
            .collect();
        assert_eq!(fields, vec!["customer_name", "phone", "address"]);
    }

    #[test]
    fn trims_valid_input() {
        let cleaned = input(" An ", " 0901 ", " 1 Le Loi ").cleaned().unwrap();
        assert_eq!(cleaned.customer_name, "An");
        assert_eq!(cleaned.phone, "0901");
        assert_eq!(cleaned.address, "1 Le Loi");
    }

    #[test]
    fn enforces_length_caps() {
        let err = input(&"n".repeat(101), &"9".repeat(16), "addr")
            .cleaned()
            .unwrap_err();
        assert_eq!(err.field_errors().unwrap().len(), 2);
    }
}
