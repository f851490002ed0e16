use crate::{entities::ProductModel, errors::ServiceError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    str::FromStr,
};

/// Canonical product identifier used as a cart key.
///
/// `"01"`, `" 1"` and `1` all parse to the same id, so a product can never
/// occupy two cart lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProductId(i32);

impl ProductId {
    pub fn new(id: i32) -> Result<Self, ServiceError> {
        if id <= 0 {
            return Err(ServiceError::field(
                "product_id",
                "Product id must be a positive integer",
            ));
        }
        Ok(Self(id))
    }

    pub fn value(self) -> i32 {
        self.0
    }
}

impl FromStr for ProductId {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let id = raw.trim().parse::<i32>().map_err(|_| {
            ServiceError::field("product_id", "Product id must be a positive integer")
        })?;
        Self::new(id)
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw quantity as submitted by a client: `3` or `"3"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QuantityInput {
    Number(serde_json::Number),
    Text(String),
}

impl QuantityInput {
    /// Parses into a signed integer. Anything that is not a whole number is rejected.
    pub fn parse(&self) -> Result<i64, ServiceError> {
        let invalid = || ServiceError::field("quantity", "Enter a whole number");
        match self {
            QuantityInput::Number(n) => n.as_i64().ok_or_else(invalid),
            QuantityInput::Text(s) => s.trim().parse::<i64>().map_err(|_| invalid()),
        }
    }
}

/// Session cart: canonical product id to a strictly positive quantity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart(BTreeMap<String, u32>);

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the line by one, creating it if absent.
    pub fn add(&mut self, product_id: ProductId) -> u32 {
        let qty = self.0.entry(product_id.to_string()).or_insert(0);
        *qty = qty.saturating_add(1);
        *qty
    }

    /// Returns true when a line was actually removed.
    pub fn remove(&mut self, product_id: ProductId) -> bool {
        self.0.remove(&product_id.to_string()).is_some()
    }

    /// Sets the line to `quantity`; zero or less deletes it.
    pub fn set_quantity(&mut self, product_id: ProductId, quantity: i64) {
        let key = product_id.to_string();
        if quantity <= 0 {
            self.0.remove(&key);
        } else {
            let qty = u32::try_from(quantity).unwrap_or(u32::MAX);
            self.0.insert(key, qty);
        }
    }

    pub fn quantity(&self, product_id: ProductId) -> Option<u32> {
        self.0.get(&product_id.to_string()).copied()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Sum of all quantities
    pub fn item_count(&self) -> u64 {
        self.0.values().map(|q| u64::from(*q)).sum()
    }

    /// Lines in ascending numeric product id order. Keys that fail to parse are skipped.
    pub fn lines(&self) -> Vec<(ProductId, u32)> {
        let mut lines: Vec<(ProductId, u32)> = self
            .0
            .iter()
            .filter_map(|(k, q)| k.parse::<ProductId>().ok().map(|id| (id, *q)))
            .collect();
        lines.sort_by_key(|(id, _)| *id);
        lines
    }

    pub fn product_ids(&self) -> Vec<i32> {
        self.lines().into_iter().map(|(id, _)| id.value()).collect()
    }

    /// Drops lines whose product is not in `existing` and returns their ids.
    pub fn prune_missing(&mut self, existing: &HashSet<i32>) -> Vec<i32> {
        let removed: Vec<i32> = self
            .lines()
            .into_iter()
            .map(|(id, _)| id.value())
            .filter(|id| !existing.contains(id))
            .collect();
        for id in &removed {
            self.0.remove(&id.to_string());
        }
        removed
    }

    /// Prices every line against `products`.
    ///
    /// Fails with `NotFound` if any line refers to a product that is absent from the map.
    pub fn price(&self, products: &HashMap<i32, ProductModel>) -> Result<CartSnapshot, ServiceError> {
        let mut lines = Vec::with_capacity(self.len());
        let mut total_price = Decimal::ZERO;
        let mut item_count = 0u64;

        for (id, quantity) in self.lines() {
            let product = products
                .get(&id.value())
                .cloned()
                .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;
            let subtotal = product.price * Decimal::from(quantity);
            total_price += subtotal;
            item_count += u64::from(quantity);
            lines.push(CartLine {
                product,
                quantity,
                subtotal,
            });
        }

        Ok(CartSnapshot {
            lines,
            total_price,
            item_count,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub product: ProductModel,
    pub quantity: u32,
    pub subtotal: Decimal,
}

/// Priced view of a cart at one instant
#[derive(Debug, Clone, Serialize)]
pub struct CartSnapshot {
    pub lines: Vec<CartLine>,
    pub total_price: Decimal,
    pub item_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn pid(raw: &str) -> ProductId {
        raw.parse().unwrap()
    }

    fn product(id: i32, price: Decimal) -> ProductModel {
        ProductModel {
            id,
            category_id: 1,
            name: format!("Product {}", id),
            sku: None,
            description: String::new(),
            price,
            image: None,
            stock: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn product_ids_are_canonicalised() {
        assert_eq!(pid("01"), pid("1"));
        assert_eq!(pid(" 1 "), ProductId::new(1).unwrap());
        assert_matches!("abc".parse::<ProductId>(), Err(ServiceError::InvalidFields(_)));
        assert_matches!("0".parse::<ProductId>(), Err(ServiceError::InvalidFields(_)));
        assert_matches!("-4".parse::<ProductId>(), Err(ServiceError::InvalidFields(_)));
    }

    #[test]
    fn add_twice_through_different_spellings_hits_one_line() {
        let mut cart = Cart::new();
        cart.add(pid("01"));
        cart.add(pid("1"));
        assert_eq!(cart.len(), 1);
        assert_eq!(cart.quantity(pid("1")), Some(2));
    }

    #[test]
    fn set_quantity_non_positive_deletes() {
        let mut cart = Cart::new();
        cart.add(pid("3"));
        cart.set_quantity(pid("3"), 0);
        assert!(cart.is_empty());

        cart.set_quantity(pid("3"), 4);
        cart.set_quantity(pid("3"), -2);
        assert!(cart.is_empty());
    }

    #[test]
    fn remove_missing_key_is_noop() {
        let mut cart = Cart::new();
        assert!(!cart.remove(pid("9")));
    }

    #[test]
    fn quantity_input_accepts_numbers_and_numeric_strings() {
        let n: QuantityInput = serde_json::from_str("3").unwrap();
        let s: QuantityInput = serde_json::from_str("\" 7 \"").unwrap();
        assert_eq!(n.parse().unwrap(), 3);
        assert_eq!(s.parse().unwrap(), 7);

        let bad: QuantityInput = serde_json::from_str("\"lots\"").unwrap();
        assert_matches!(bad.parse(), Err(ServiceError::InvalidFields(f)) if f[0].field == "quantity");
        let frac: QuantityInput = serde_json::from_str("2.5").unwrap();
        assert!(frac.parse().is_err());
    }

    #[test]
    fn price_sums_exactly() {
        let mut cart = Cart::new();
        cart.set_quantity(pid("1"), 2);
        cart.add(pid("2"));
        let products = HashMap::from([(1, product(1, dec!(50))), (2, product(2, dec!(30)))]);

        let snapshot = cart.price(&products).unwrap();
        assert_eq!(snapshot.total_price, dec!(130));
        assert_eq!(snapshot.item_count, 3);
        assert_eq!(snapshot.lines[0].subtotal, dec!(100));
    }

    #[test]
    fn lines_are_ordered_numerically() {
        let mut cart = Cart::new();
        cart.add(pid("10"));
        cart.add(pid("2"));
        assert_eq!(cart.product_ids(), vec![2, 10]);
    }

    #[test]
    fn price_fails_on_missing_product() {
        let mut cart = Cart::new();
        cart.add(pid("5"));
        assert_matches!(cart.price(&HashMap::new()), Err(ServiceError::NotFound(_)));
    }

    #[test]
    fn prune_missing_reports_removed_ids() {
        let mut cart = Cart::new();
        cart.add(pid("1"));
        cart.add(pid("2"));
        let removed = cart.prune_missing(&HashSet::from([1]));
        assert_eq!(removed, vec![2]);
        assert_eq!(cart.product_ids(), vec![1]);
    }

    #[test]
    fn serializes_as_plain_map() {
        let mut cart = Cart::new();
        cart.set_quantity(pid("4"), 2);
        assert_eq!(serde_json::to_string(&cart).unwrap(), r#"{"4":2}"#);
    }
}
