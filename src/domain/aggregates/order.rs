//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::value_objects::{BookingId, Money, Quantity, Size, TaxRate};
use crate::{OrderError, Result};

/// Order header. `amount` is only ever written by the coordinator from the
/// line subtotal, tax and discount.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub booking_id: BookingId,
    pub username: String,
    pub promotion_code: Option<String>,
    pub status: OrderStatus,
    pub address: String,
    pub province_id: i64,
    pub tax: TaxRate,
    pub amount: Money,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: i64,
    pub booking_id: BookingId,
    pub product_id: i64,
    pub size: Size,
    pub quantity: Quantity,
    /// Unit price at order time times quantity.
    pub price: Money,
}

/// Header fields for an order about to be inserted.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub booking_id: BookingId,
    pub username: String,
    pub promotion_code: Option<String>,
    pub address: String,
    pub province_id: i64,
    pub tax: TaxRate,
    pub payment_method: String,
}

#[derive(Clone, Debug)]
pub struct NewLineItem {
    pub booking_id: BookingId,
    pub product_id: i64,
    pub size: Size,
    pub quantity: Quantity,
    pub price: Money,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Created, Confirmed, Cancelled }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Created => "created", Self::Confirmed => "confirmed", Self::Cancelled => "cancelled" }
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(OrderError::Persistence(format!("unknown order status {other:?}"))),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl Order {
    pub fn is_owned_by(&self, username: &str) -> bool { self.username == username }

    pub fn ensure_owned_by(&self, caller: &str) -> Result<()> {
        if !self.is_owned_by(caller) {
            return Err(OrderError::Unauthorized { booking_id: self.booking_id.to_string(), caller: caller.to_string() });
        }
        Ok(())
    }

    /// `created -> confirmed`. Returns false when the order was already confirmed.
    pub fn confirm(&mut self) -> Result<bool> {
        match self.status {
            OrderStatus::Created => { self.status = OrderStatus::Confirmed; Ok(true) }
            OrderStatus::Confirmed => Ok(false),
            OrderStatus::Cancelled => Err(OrderError::validation(format!("order {} is cancelled", self.booking_id))),
        }
    }

    /// `created | confirmed -> cancelled`.
    pub fn cancel(&mut self) -> Result<()> {
        if self.status == OrderStatus::Cancelled {
            return Err(OrderError::validation(format!("order {} is already cancelled", self.booking_id)));
        }
        self.status = OrderStatus::Cancelled;
        Ok(())
    }
}
