//! Value types that live outside the database: the session cart and ledger stock changes.

pub mod cart;
pub mod stock;

pub use cart::{Cart, CartLine, CartSnapshot, ProductId, QuantityInput};
pub use stock::{StockChange, StockStatus};
