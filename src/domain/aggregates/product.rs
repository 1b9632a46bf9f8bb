//! Product and per-size stock

use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{Money, Quantity, Size};
use crate::{Entity, OrderError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    /// Current catalog unit price.
    pub price: Money,
}

/// Stock for one (product, size) pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub product_id: i64,
    pub size: Size,
    pub quantity: Quantity,
}

impl StockRecord {
    pub fn new(product_id: i64, size: Size, quantity: u32) -> Self {
        Self { product_id, size, quantity: Quantity::new(quantity) }
    }

    pub fn key(&self) -> String { stock_key(self.product_id, self.size) }

    pub fn ensure_available(&self, requested: Quantity) -> Result<Quantity> {
        if requested > self.quantity {
            return Err(self.insufficient(requested));
        }
        Ok(self.quantity)
    }

    /// Never clamps: an overdraft leaves the record untouched and fails.
    pub fn remove(&mut self, qty: Quantity) -> Result<()> {
        self.quantity = self.quantity.subtract(qty).ok_or_else(|| self.insufficient(qty))?;
        Ok(())
    }

    pub fn restore(&mut self, qty: Quantity) -> Result<()> {
        self.quantity = self
            .quantity
            .add(qty)
            .ok_or_else(|| OrderError::validation(format!("restoring {qty} overflows stock {}", self.key())))?;
        Ok(())
    }

    fn insufficient(&self, requested: Quantity) -> OrderError {
        OrderError::InsufficientStock {
            product_id: self.product_id,
            size: self.size.to_string(),
            requested: requested.value(),
            available: self.quantity.value(),
        }
    }
}

pub fn stock_key(product_id: i64, size: Size) -> String { format!("{product_id}/{size}") }

pub fn stock_not_found(product_id: i64, size: Size) -> OrderError {
    OrderError::not_found(Entity::Stock, stock_key(product_id, size))
}
