//! Business logic behind the HTTP handlers. Services own their database handles and
//! never touch HTTP types.

pub mod accounts;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod orders;
pub mod warehouse;

pub use accounts::AccountService;
pub use cart::CartService;
pub use catalog::CatalogService;
pub use checkout::CheckoutService;
pub use orders::OrderService;
pub use warehouse::WarehouseService;
