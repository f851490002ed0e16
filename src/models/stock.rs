use crate::{entities::MovementType, errors::ServiceError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const CRITICAL_PERCENT: Decimal = dec!(90);
const WARNING_PERCENT: Decimal = dec!(70);

/// A quantity change submitted to the warehouse ledger.
///
/// Import, export and sale carry an unsigned amount whose sign is implied by the type.
/// Adjust and transfer carry the signed delta directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", content = "quantity", rename_all = "lowercase")]
pub enum StockChange {
    Import(u32),
    Export(u32),
    Sale(u32),
    Adjust(i32),
    Transfer(i32),
}

impl StockChange {
    pub fn movement_type(&self) -> MovementType {
        match self {
            StockChange::Import(_) => MovementType::Import,
            StockChange::Export(_) => MovementType::Export,
            StockChange::Sale(_) => MovementType::Sale,
            StockChange::Adjust(_) => MovementType::Adjust,
            StockChange::Transfer(_) => MovementType::Transfer,
        }
    }

    /// Signed delta to apply to the stock row.
    pub fn delta(&self) -> Result<i32, ServiceError> {
        let unsigned = |q: u32| -> Result<i32, ServiceError> {
            if q == 0 {
                return Err(ServiceError::field("quantity", "Quantity must be positive"));
            }
            i32::try_from(q).map_err(|_| ServiceError::field("quantity", "Quantity is too large"))
        };
        match *self {
            StockChange::Import(q) => unsigned(q),
            StockChange::Export(q) | StockChange::Sale(q) => unsigned(q).map(|d| -d),
            StockChange::Transfer(0) => {
                Err(ServiceError::field("quantity", "Quantity must not be zero"))
            }
            StockChange::Adjust(d) | StockChange::Transfer(d) => Ok(d),
        }
    }
}

/// Fill level of a warehouse, for display only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StockStatus {
    Critical,
    Warning,
    Normal,
    NoCapacity,
}

impl StockStatus {
    pub fn classify(total_items: i64, capacity: i32) -> Self {
        match fill_percent(total_items, capacity) {
            None => StockStatus::NoCapacity,
            Some(p) if p >= CRITICAL_PERCENT => StockStatus::Critical,
            Some(p) if p >= WARNING_PERCENT => StockStatus::Warning,
            Some(_) => StockStatus::Normal,
        }
    }
}

/// `total_items / capacity * 100`; `None` when capacity is zero or negative.
pub fn fill_percent(total_items: i64, capacity: i32) -> Option<Decimal> {
    if capacity <= 0 {
        return None;
    }
    Some(Decimal::from(total_items) / Decimal::from(capacity) * dec!(100))
}
