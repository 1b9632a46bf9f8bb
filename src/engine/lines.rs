//! Line processor: validates requested lines, prices them, writes them and
//! takes their stock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

use crate::domain::aggregates::{LineItem, NewLineItem};
use crate::domain::value_objects::{BookingId, Money, Quantity, Size};
use crate::engine::ledger::InventoryLedger;
use crate::store::Transaction;
use crate::{Entity, OrderError, Result};

/// Requested lines as parallel arrays: index `i` of each array describes line `i`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LineRequest {
    #[validate(length(min = 1, message = "at least one line is required"))]
    pub product_ids: Vec<i64>,
    pub sizes: Vec<String>,
    pub quantities: Vec<i64>,
}

/// One validated line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestedLine {
    pub product_id: i64,
    pub size: Size,
    pub quantity: Quantity,
}

impl LineRequest {
    pub fn len(&self) -> usize { self.product_ids.len() }
    pub fn is_empty(&self) -> bool { self.product_ids.is_empty() }

    /// Checks the whole request without touching any store.
    pub fn parse(&self) -> Result<Vec<RequestedLine>> {
        let (ids, sizes, qtys) = (self.product_ids.len(), self.sizes.len(), self.quantities.len());
        if ids != sizes || ids != qtys {
            return Err(OrderError::validation(format!(
                "line arrays differ in length: {ids} product ids, {sizes} sizes, {qtys} quantities"
            )));
        }
        self.validate().map_err(|e| OrderError::validation(e.to_string()))?;

        self.product_ids
            .iter()
            .zip(&self.sizes)
            .zip(&self.quantities)
            .enumerate()
            .map(|(i, ((&product_id, size), &quantity))| {
                let size: Size = size.parse().map_err(|e| OrderError::validation(format!("line {i}: {e}")))?;
                let quantity = u32::try_from(quantity)
                    .ok()
                    .filter(|q| *q > 0 && i32::try_from(*q).is_ok())
                    .ok_or_else(|| OrderError::validation(format!("line {i}: quantity {quantity} must be positive")))?;
                Ok(RequestedLine { product_id, size, quantity: Quantity::new(quantity) })
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProcessedLines {
    pub items: Vec<LineItem>,
    pub subtotal: Money,
}

#[async_trait]
pub trait LineProcessor: InventoryLedger {
    /// Prices and writes every line in order, taking stock as it goes. Stops
    /// at the first failing line; the caller's unit of work then discards
    /// whatever the earlier lines did.
    async fn process_lines(&mut self, booking_id: &BookingId, lines: &[RequestedLine]) -> Result<ProcessedLines> {
        let mut items = Vec::with_capacity(lines.len());
        let mut subtotal = Money::zero();

        for line in lines {
            let product = self
                .fetch_product(line.product_id)
                .await?
                .ok_or_else(|| OrderError::not_found(Entity::Product, line.product_id))?;
            self.check_available(line.product_id, line.size, line.quantity).await?;

            let price = product.price.multiply(line.quantity);
            let item = self
                .insert_line(&NewLineItem {
                    booking_id: booking_id.clone(),
                    product_id: line.product_id,
                    size: line.size,
                    quantity: line.quantity,
                    price,
                })
                .await?;
            self.decrement(line.product_id, line.size, line.quantity).await?;

            debug!(%booking_id, product_id = line.product_id, size = %line.size, quantity = line.quantity.value(), %price, "line processed");
            subtotal = subtotal.add(price);
            items.push(item);
        }

        Ok(ProcessedLines { items, subtotal })
    }
}

impl<T: Transaction> LineProcessor for T {}
