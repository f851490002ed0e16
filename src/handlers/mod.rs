pub mod accounts;
pub mod admin;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod common;
pub mod warehouses;

use crate::{
    config::AppConfig,
    events::EventSender,
    services::{
        AccountService, CartService, CatalogService, CheckoutService, OrderService,
        WarehouseService,
    },
    session::SessionManager,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub accounts: Arc<AccountService>,
    pub orders: Arc<OrderService>,
    pub warehouses: Arc<WarehouseService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        sessions: SessionManager,
        config: &AppConfig,
    ) -> Self {
        let catalog = CatalogService::new(db.clone());
        let cart = CartService::new(sessions.clone(), catalog.clone());
        let warehouses = WarehouseService::new(db.clone(), event_sender.clone());
        let checkout = CheckoutService::new(
            db.clone(),
            event_sender.clone(),
            sessions.clone(),
            cart.clone(),
            warehouses.clone(),
            config.checkout_inventory_policy,
            config.checkout_warehouse_id,
        );
        let accounts = AccountService::new(db.clone(), event_sender.clone(), sessions);
        let orders = OrderService::new(db, event_sender);

        Self {
            catalog: Arc::new(catalog),
            cart: Arc::new(cart),
            checkout: Arc::new(checkout),
            accounts: Arc::new(accounts),
            orders: Arc::new(orders),
            warehouses: Arc::new(warehouses),
        }
    }
}
