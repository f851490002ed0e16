//! sea-orm entities for the storefront schema

pub mod account;
pub mod category;
pub mod order;
pub mod order_item;
pub mod product;
pub mod stock_movement;
pub mod user_profile;
pub mod warehouse;
pub mod warehouse_stock;

pub use account::{Entity as Account, Model as AccountModel};
pub use category::{Entity as Category, Model as CategoryModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use stock_movement::{Entity as StockMovement, Model as StockMovementModel, MovementType};
pub use user_profile::{Entity as UserProfile, Model as UserProfileModel};
pub use warehouse::{Entity as Warehouse, Model as WarehouseModel};
pub use warehouse_stock::{Entity as WarehouseStock, Model as WarehouseStockModel};
