//! Shared fixtures: a seeded in-memory store, request builders and test
//! doubles for the publisher and the store.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use order_engine::domain::aggregates::{
    LineItem, NewLineItem, NewOrder, Order, OrderStatus, Product, Promotion, Province, StockRecord, User,
};
use order_engine::domain::events::EventEnvelope;
use order_engine::domain::value_objects::{BookingId, Money, Quantity, Size};
use order_engine::engine::retry::RetryConfig;
use order_engine::publisher::{EventPublisher, PublishError};
use order_engine::store::memory::MemoryTx;
use order_engine::store::{MemoryStore, Store, Transaction};
use order_engine::{CreateOrderParams, EngineConfig, LineRequest, OrderCoordinator, Result, UpdateOrderParams};

pub const TEE: i64 = 1;
pub const HOODIE: i64 = 2;

pub fn user(username: &str) -> User {
    User {
        username: username.to_string(),
        full_name: format!("{username} tester"),
        email: format!("{username}@example.com"),
        phone: "0900000000".into(),
        created_at: Utc::now(),
    }
}

pub fn promotion(title: &str, percent: i64, ends_in: Duration) -> Promotion {
    let now = Utc::now();
    Promotion {
        title: title.to_string(),
        description: String::new(),
        discount_percent: Decimal::new(percent, 0),
        start_date: now - Duration::days(30),
        end_date: now + ends_in,
    }
}

/// alice and bob; Hanoi and Saigon; a 100.00 tee and a 250.00 hoodie.
/// Stock: tee M 10, tee L 5, hoodie XL 3.
pub async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.add_user(user("alice")).await;
    store.add_user(user("bob")).await;
    store.add_province(Province { id: 1, name: "Hanoi".into() }).await;
    store.add_province(Province { id: 2, name: "Saigon".into() }).await;
    store.add_product(Product { id: TEE, name: "Tee".into(), price: Money::new(Decimal::new(100, 0)) }).await;
    store.add_product(Product { id: HOODIE, name: "Hoodie".into(), price: Money::new(Decimal::new(250, 0)) }).await;
    store.set_stock(TEE, Size::M, 10).await;
    store.set_stock(TEE, Size::L, 5).await;
    store.set_stock(HOODIE, Size::Xl, 3).await;
    store.add_promotion(promotion("SALE10", 10, Duration::days(7))).await;
    store.add_promotion(promotion("OLD20", 20, -Duration::days(1))).await;
    store
}

pub fn fast_config() -> EngineConfig {
    EngineConfig {
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: StdDuration::from_millis(1),
            max_delay: StdDuration::from_millis(5),
            multiplier: 2.0,
        },
        unit_timeout: StdDuration::from_secs(2),
        ..EngineConfig::default()
    }
}

pub fn coordinator(store: &MemoryStore, publisher: Arc<dyn EventPublisher>) -> OrderCoordinator<MemoryStore> {
    OrderCoordinator::new(store.clone(), publisher, fast_config())
}

pub fn lines(items: &[(i64, &str, i64)]) -> LineRequest {
    LineRequest {
        product_ids: items.iter().map(|(p, _, _)| *p).collect(),
        sizes: items.iter().map(|(_, s, _)| s.to_string()).collect(),
        quantities: items.iter().map(|(_, _, q)| *q).collect(),
    }
}

pub fn create(username: &str, promotion_code: Option<&str>, items: &[(i64, &str, i64)]) -> CreateOrderParams {
    CreateOrderParams {
        username: username.to_string(),
        promotion_code: promotion_code.map(str::to_string),
        address: "12 Trang Tien".into(),
        province: "Hanoi".into(),
        payment_method: "cod".into(),
        lines: lines(items),
    }
}

pub fn amend(username: &str, booking_id: &BookingId, province: &str, items: &[(i64, &str, i64)]) -> UpdateOrderParams {
    UpdateOrderParams {
        username: username.to_string(),
        booking_id: booking_id.clone(),
        address: "99 Nguyen Hue".into(),
        province: province.to_string(),
        lines: lines(items),
    }
}

// -----------------------------------------------------------------------------
// Publisher double
// -----------------------------------------------------------------------------

/// Keeps every envelope in memory. Can be told to fail instead.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<EventEnvelope>>,
    failing: bool,
}

impl RecordingPublisher {
    pub fn new() -> Self { Self::default() }

    pub fn failing() -> Self { Self { failing: true, ..Self::default() } }

    pub fn published(&self) -> Vec<EventEnvelope> { self.published.lock().unwrap().clone() }

    pub fn subjects(&self) -> Vec<&'static str> {
        self.published().iter().map(|e| e.event.subject()).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> std::result::Result<(), PublishError> {
        if self.failing {
            return Err(PublishError::Transport("publisher unavailable".into()));
        }
        self.published.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Store double
// -----------------------------------------------------------------------------

/// A [`MemoryStore`] whose commits are acknowledged late and whose
/// conditional decrements can be made to lose, as they would to a concurrent
/// writer on a real database.
#[derive(Clone)]
pub struct LaggingStore {
    pub inner: MemoryStore,
    commit_lag: StdDuration,
    rejected_decrements: Arc<AtomicU32>,
}

impl LaggingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self { inner, commit_lag: StdDuration::ZERO, rejected_decrements: Arc::default() }
    }

    /// Commits apply at once but return only after `lag`.
    pub fn with_commit_lag(mut self, lag: StdDuration) -> Self {
        self.commit_lag = lag;
        self
    }

    /// The next `n` stock decrements report a lost update.
    pub fn reject_decrements(&self, n: u32) { self.rejected_decrements.store(n, Ordering::SeqCst); }
}

#[async_trait]
impl Store for LaggingStore {
    type Tx = LaggingTx;

    async fn begin(&self) -> Result<LaggingTx> {
        Ok(LaggingTx {
            inner: self.inner.begin().await?,
            commit_lag: self.commit_lag,
            rejected_decrements: self.rejected_decrements.clone(),
        })
    }
}

pub struct LaggingTx {
    inner: MemoryTx,
    commit_lag: StdDuration,
    rejected_decrements: Arc<AtomicU32>,
}

#[async_trait]
impl Transaction for LaggingTx {
    async fn fetch_user(&mut self, username: &str) -> Result<Option<User>> { self.inner.fetch_user(username).await }

    async fn fetch_province(&mut self, name: &str) -> Result<Option<Province>> { self.inner.fetch_province(name).await }

    async fn fetch_promotion(&mut self, code: &str) -> Result<Option<Promotion>> { self.inner.fetch_promotion(code).await }

    async fn fetch_product(&mut self, product_id: i64) -> Result<Option<Product>> {
        self.inner.fetch_product(product_id).await
    }

    async fn lock_stock(&mut self, product_id: i64, size: Size) -> Result<Option<StockRecord>> {
        self.inner.lock_stock(product_id, size).await
    }

    async fn decrement_stock(&mut self, product_id: i64, size: Size, qty: Quantity) -> Result<Option<Quantity>> {
        let rejected = self
            .rejected_decrements
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Ok(None);
        }
        self.inner.decrement_stock(product_id, size, qty).await
    }

    async fn increment_stock(&mut self, product_id: i64, size: Size, qty: Quantity) -> Result<Option<Quantity>> {
        self.inner.increment_stock(product_id, size, qty).await
    }

    async fn booking_id_exists(&mut self, booking_id: &BookingId) -> Result<bool> {
        self.inner.booking_id_exists(booking_id).await
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order> { self.inner.insert_order(order).await }

    async fn fetch_order(&mut self, booking_id: &BookingId) -> Result<Option<Order>> {
        self.inner.fetch_order(booking_id).await
    }

    async fn lock_order(&mut self, booking_id: &BookingId) -> Result<Option<Order>> {
        self.inner.lock_order(booking_id).await
    }

    async fn update_order_shipping(&mut self, booking_id: &BookingId, address: &str, province_id: i64) -> Result<Order> {
        self.inner.update_order_shipping(booking_id, address, province_id).await
    }

    async fn update_order_amount(&mut self, booking_id: &BookingId, amount: Money) -> Result<Order> {
        self.inner.update_order_amount(booking_id, amount).await
    }

    async fn update_order_status(&mut self, booking_id: &BookingId, status: OrderStatus) -> Result<Order> {
        self.inner.update_order_status(booking_id, status).await
    }

    async fn delete_order(&mut self, booking_id: &BookingId) -> Result<()> { self.inner.delete_order(booking_id).await }

    async fn list_orders_by_user(&mut self, username: &str) -> Result<Vec<Order>> {
        self.inner.list_orders_by_user(username).await
    }

    async fn total_amount(&mut self, status: OrderStatus, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Money> {
        self.inner.total_amount(status, from, to).await
    }

    async fn insert_line(&mut self, line: &NewLineItem) -> Result<LineItem> { self.inner.insert_line(line).await }

    async fn list_lines(&mut self, booking_id: &BookingId) -> Result<Vec<LineItem>> {
        self.inner.list_lines(booking_id).await
    }

    async fn delete_lines(&mut self, booking_id: &BookingId) -> Result<u64> { self.inner.delete_lines(booking_id).await }

    async fn commit(self) -> Result<()> {
        self.inner.commit().await?;
        tokio::time::sleep(self.commit_lag).await;
        Ok(())
    }

    async fn rollback(self) -> Result<()> { self.inner.rollback().await }
}
