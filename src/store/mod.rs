//! Unit-of-work seam between the engine and the backing store.
//!
//! A [`Store`] hands out [`Transaction`]s. Everything a workflow reads or
//! writes goes through one transaction, and nothing it wrote is visible to
//! anyone else until [`Transaction::commit`]. Dropping a transaction without
//! committing discards it, so an aborted or timed-out workflow leaves no trace.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::aggregates::{
    LineItem, NewLineItem, NewOrder, Order, OrderStatus, Product, Promotion, Province, StockRecord, User,
};
use crate::domain::value_objects::{BookingId, Money, Quantity, Size};
use crate::Result;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: Transaction;

    async fn begin(&self) -> Result<Self::Tx>;
}

#[async_trait]
pub trait Transaction: Send {
    async fn fetch_user(&mut self, username: &str) -> Result<Option<User>>;
    async fn fetch_province(&mut self, name: &str) -> Result<Option<Province>>;
    async fn fetch_promotion(&mut self, code: &str) -> Result<Option<Promotion>>;
    async fn fetch_product(&mut self, product_id: i64) -> Result<Option<Product>>;

    /// Reads a stock record and holds it against concurrent writers until the
    /// transaction ends.
    async fn lock_stock(&mut self, product_id: i64, size: Size) -> Result<Option<StockRecord>>;

    /// Subtracts `qty` only if at least `qty` is on hand. Returns the new
    /// quantity, or `None` when the record is missing or would go negative.
    async fn decrement_stock(&mut self, product_id: i64, size: Size, qty: Quantity) -> Result<Option<Quantity>>;

    /// Adds `qty` back. Returns the new quantity, or `None` when the record is missing.
    async fn increment_stock(&mut self, product_id: i64, size: Size, qty: Quantity) -> Result<Option<Quantity>>;

    async fn booking_id_exists(&mut self, booking_id: &BookingId) -> Result<bool>;
    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order>;

    async fn fetch_order(&mut self, booking_id: &BookingId) -> Result<Option<Order>>;

    /// Reads an order header and holds it until the transaction ends.
    async fn lock_order(&mut self, booking_id: &BookingId) -> Result<Option<Order>>;
    async fn update_order_shipping(&mut self, booking_id: &BookingId, address: &str, province_id: i64) -> Result<Order>;
    async fn update_order_amount(&mut self, booking_id: &BookingId, amount: Money) -> Result<Order>;
    async fn update_order_status(&mut self, booking_id: &BookingId, status: OrderStatus) -> Result<Order>;
    async fn delete_order(&mut self, booking_id: &BookingId) -> Result<()>;
    async fn list_orders_by_user(&mut self, username: &str) -> Result<Vec<Order>>;

    /// Sum of `amount` over orders in `status` created within `[from, to]`.
    async fn total_amount(&mut self, status: OrderStatus, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Money>;

    async fn insert_line(&mut self, line: &NewLineItem) -> Result<LineItem>;
    /// Lines of an order in insertion order.
    async fn list_lines(&mut self, booking_id: &BookingId) -> Result<Vec<LineItem>>;
    async fn delete_lines(&mut self, booking_id: &BookingId) -> Result<u64>;

    async fn commit(self) -> Result<()>;
    async fn rollback(self) -> Result<()>;
}
