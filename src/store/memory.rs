//! In-memory store.
//!
//! One `tokio::sync::Mutex` guards the whole state, so transactions are fully
//! serialized. A transaction works on a private copy of the state and swaps it
//! in on commit; dropping it simply throws the copy away.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Store, Transaction};
use crate::domain::aggregates::{
    LineItem, NewLineItem, NewOrder, Order, OrderStatus, Product, Promotion, Province, StockRecord, User,
};
use crate::domain::value_objects::{BookingId, Money, Quantity, Size};
use crate::{Entity, OrderError, Result};

#[derive(Clone, Debug, Default)]
struct MemoryState {
    users: HashMap<String, User>,
    provinces: HashMap<String, Province>,
    promotions: HashMap<String, Promotion>,
    products: HashMap<i64, Product>,
    stock: HashMap<(i64, Size), StockRecord>,
    orders: HashMap<BookingId, Order>,
    lines: BTreeMap<i64, LineItem>,
    next_line_id: i64,
}

impl MemoryState {
    fn order_mut(&mut self, booking_id: &BookingId) -> Result<&mut Order> {
        self.orders.get_mut(booking_id).ok_or_else(|| OrderError::not_found(Entity::Order, booking_id))
    }
}

/// Commit faults for exercising failure paths.
#[derive(Debug, Default)]
struct Faults {
    failing_commits: AtomicU32,
    contended_commits: AtomicU32,
}

impl Faults {
    fn take(counter: &AtomicU32) -> bool {
        counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn add_user(&self, user: User) {
        self.state.lock().await.users.insert(user.username.clone(), user);
    }

    pub async fn add_province(&self, province: Province) {
        self.state.lock().await.provinces.insert(province.name.clone(), province);
    }

    pub async fn add_promotion(&self, promotion: Promotion) {
        self.state.lock().await.promotions.insert(promotion.title.clone(), promotion);
    }

    pub async fn add_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    pub async fn set_stock(&self, product_id: i64, size: Size, quantity: u32) {
        self.state.lock().await.stock.insert((product_id, size), StockRecord::new(product_id, size, quantity));
    }

    pub async fn stock(&self, product_id: i64, size: Size) -> Option<u32> {
        self.state.lock().await.stock.get(&(product_id, size)).map(|s| s.quantity.value())
    }

    pub async fn order(&self, booking_id: &BookingId) -> Option<Order> {
        self.state.lock().await.orders.get(booking_id).cloned()
    }

    pub async fn order_count(&self) -> usize { self.state.lock().await.orders.len() }

    pub async fn lines(&self, booking_id: &BookingId) -> Vec<LineItem> {
        self.state.lock().await.lines.values().filter(|l| &l.booking_id == booking_id).cloned().collect()
    }

    pub async fn line_count(&self) -> usize { self.state.lock().await.lines.len() }

    /// The next `n` commits fail with a storage error.
    pub fn fail_commits(&self, n: u32) { self.faults.failing_commits.store(n, Ordering::SeqCst); }

    /// The next `n` commits report contention, as a serialization failure would.
    pub fn contend_commits(&self, n: u32) { self.faults.contended_commits.store(n, Ordering::SeqCst); }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTx { guard, working, faults: self.faults.clone() })
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    faults: Arc<Faults>,
}

#[async_trait]
impl Transaction for MemoryTx {
    async fn fetch_user(&mut self, username: &str) -> Result<Option<User>> {
        Ok(self.working.users.get(username).cloned())
    }

    async fn fetch_province(&mut self, name: &str) -> Result<Option<Province>> {
        Ok(self.working.provinces.get(name).cloned())
    }

    async fn fetch_promotion(&mut self, code: &str) -> Result<Option<Promotion>> {
        Ok(self.working.promotions.get(code).cloned())
    }

    async fn fetch_product(&mut self, product_id: i64) -> Result<Option<Product>> {
        Ok(self.working.products.get(&product_id).cloned())
    }

    async fn lock_stock(&mut self, product_id: i64, size: Size) -> Result<Option<StockRecord>> {
        Ok(self.working.stock.get(&(product_id, size)).cloned())
    }

    async fn decrement_stock(&mut self, product_id: i64, size: Size, qty: Quantity) -> Result<Option<Quantity>> {
        let Some(record) = self.working.stock.get_mut(&(product_id, size)) else { return Ok(None) };
        match record.remove(qty) {
            Ok(()) => Ok(Some(record.quantity)),
            Err(OrderError::InsufficientStock { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn increment_stock(&mut self, product_id: i64, size: Size, qty: Quantity) -> Result<Option<Quantity>> {
        let Some(record) = self.working.stock.get_mut(&(product_id, size)) else { return Ok(None) };
        record.restore(qty)?;
        Ok(Some(record.quantity))
    }

    async fn booking_id_exists(&mut self, booking_id: &BookingId) -> Result<bool> {
        Ok(self.working.orders.contains_key(booking_id))
    }

    async fn insert_order(&mut self, new: &NewOrder) -> Result<Order> {
        if self.working.orders.contains_key(&new.booking_id) {
            return Err(OrderError::Contention(format!("duplicate booking id {}", new.booking_id)));
        }
        let order = Order {
            booking_id: new.booking_id.clone(),
            username: new.username.clone(),
            promotion_code: new.promotion_code.clone(),
            status: OrderStatus::Created,
            address: new.address.clone(),
            province_id: new.province_id,
            tax: new.tax,
            amount: Money::zero(),
            payment_method: new.payment_method.clone(),
            created_at: Utc::now(),
        };
        self.working.orders.insert(order.booking_id.clone(), order.clone());
        Ok(order)
    }

    async fn fetch_order(&mut self, booking_id: &BookingId) -> Result<Option<Order>> {
        Ok(self.working.orders.get(booking_id).cloned())
    }

    async fn lock_order(&mut self, booking_id: &BookingId) -> Result<Option<Order>> {
        self.fetch_order(booking_id).await
    }

    async fn update_order_shipping(&mut self, booking_id: &BookingId, address: &str, province_id: i64) -> Result<Order> {
        let order = self.working.order_mut(booking_id)?;
        order.address = address.to_string();
        order.province_id = province_id;
        Ok(order.clone())
    }

    async fn update_order_amount(&mut self, booking_id: &BookingId, amount: Money) -> Result<Order> {
        let order = self.working.order_mut(booking_id)?;
        order.amount = amount;
        Ok(order.clone())
    }

    async fn update_order_status(&mut self, booking_id: &BookingId, status: OrderStatus) -> Result<Order> {
        let order = self.working.order_mut(booking_id)?;
        order.status = status;
        Ok(order.clone())
    }

    async fn delete_order(&mut self, booking_id: &BookingId) -> Result<()> {
        self.working.orders.remove(booking_id).map(|_| ()).ok_or_else(|| OrderError::not_found(Entity::Order, booking_id))
    }

    async fn list_orders_by_user(&mut self, username: &str) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self.working.orders.values().filter(|o| o.username == username).cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn total_amount(&mut self, status: OrderStatus, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Money> {
        Ok(self
            .working
            .orders
            .values()
            .filter(|o| o.status == status && o.created_at >= from && o.created_at <= to)
            .map(|o| o.amount)
            .sum())
    }

    async fn insert_line(&mut self, new: &NewLineItem) -> Result<LineItem> {
        if !self.working.orders.contains_key(&new.booking_id) {
            return Err(OrderError::Persistence(format!("line references missing order {}", new.booking_id)));
        }
        self.working.next_line_id += 1;
        let line = LineItem {
            id: self.working.next_line_id,
            booking_id: new.booking_id.clone(),
            product_id: new.product_id,
            size: new.size,
            quantity: new.quantity,
            price: new.price,
        };
        self.working.lines.insert(line.id, line.clone());
        Ok(line)
    }

    async fn list_lines(&mut self, booking_id: &BookingId) -> Result<Vec<LineItem>> {
        Ok(self.working.lines.values().filter(|l| &l.booking_id == booking_id).cloned().collect())
    }

    async fn delete_lines(&mut self, booking_id: &BookingId) -> Result<u64> {
        let before = self.working.lines.len();
        self.working.lines.retain(|_, l| &l.booking_id != booking_id);
        Ok((before - self.working.lines.len()) as u64)
    }

    async fn commit(self) -> Result<()> {
        if Faults::take(&self.faults.failing_commits) {
            return Err(OrderError::Persistence("injected commit failure".into()));
        }
        if Faults::take(&self.faults.contended_commits) {
            return Err(OrderError::Contention("injected serialization failure".into()));
        }
        let MemoryTx { mut guard, working, .. } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<()> { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let store = MemoryStore::new();
        store.set_stock(1, Size::M, 5).await;
        {
            let mut tx = store.begin().await.unwrap();
            assert_eq!(tx.decrement_stock(1, Size::M, Quantity::new(2)).await.unwrap(), Some(Quantity::new(3)));
        }
        assert_eq!(store.stock(1, Size::M).await, Some(5));

        let mut tx = store.begin().await.unwrap();
        tx.decrement_stock(1, Size::M, Quantity::new(2)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.stock(1, Size::M).await, Some(3));
    }

    #[tokio::test]
    async fn test_conditional_decrement() {
        let store = MemoryStore::new();
        store.set_stock(1, Size::S, 1).await;
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.decrement_stock(1, Size::S, Quantity::new(2)).await.unwrap(), None);
        assert_eq!(tx.decrement_stock(9, Size::S, Quantity::new(1)).await.unwrap(), None);
        assert_eq!(tx.decrement_stock(1, Size::S, Quantity::new(1)).await.unwrap(), Some(Quantity::new(0)));
    }

    #[tokio::test]
    async fn test_injected_commit_failure() {
        let store = MemoryStore::new();
        store.set_stock(1, Size::L, 4).await;
        store.fail_commits(1);
        let mut tx = store.begin().await.unwrap();
        tx.increment_stock(1, Size::L, Quantity::new(1)).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(store.stock(1, Size::L).await, Some(4));

        let mut tx = store.begin().await.unwrap();
        tx.increment_stock(1, Size::L, Quantity::new(1)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.stock(1, Size::L).await, Some(5));
    }
}
