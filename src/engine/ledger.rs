//! Inventory ledger: per-(product, size) stock checks, decrements and restores.

use async_trait::async_trait;
use tracing::debug;

use crate::domain::aggregates::product::stock_not_found;
use crate::domain::value_objects::{Quantity, Size};
use crate::store::Transaction;
use crate::{OrderError, Result};

#[async_trait]
pub trait InventoryLedger: Transaction {
    /// Current quantity, provided it covers `requested`.
    async fn check_available(&mut self, product_id: i64, size: Size, requested: Quantity) -> Result<Quantity> {
        let record = self.lock_stock(product_id, size).await?.ok_or_else(|| stock_not_found(product_id, size))?;
        record.ensure_available(requested)
    }

    /// Takes `qty` out of stock. The write itself is conditional, so a quantity
    /// that changed since it was checked is rejected, never clamped.
    async fn decrement(&mut self, product_id: i64, size: Size, qty: Quantity) -> Result<Quantity> {
        if let Some(left) = self.decrement_stock(product_id, size, qty).await? {
            debug!(product_id, %size, taken = qty.value(), left = left.value(), "stock decremented");
            return Ok(left);
        }
        let record = self.lock_stock(product_id, size).await?.ok_or_else(|| stock_not_found(product_id, size))?;
        match record.ensure_available(qty) {
            Err(err) => Err(err),
            Ok(_) => Err(OrderError::Contention(format!("decrement of {} rejected", record.key()))),
        }
    }

    /// Puts back `qty` taken by an earlier decrement.
    async fn restore(&mut self, product_id: i64, size: Size, qty: Quantity) -> Result<Quantity> {
        let now = self
            .increment_stock(product_id, size, qty)
            .await?
            .ok_or_else(|| stock_not_found(product_id, size))?;
        debug!(product_id, %size, restored = qty.value(), now = now.value(), "stock restored");
        Ok(now)
    }
}

impl<T: Transaction> InventoryLedger for T {}
