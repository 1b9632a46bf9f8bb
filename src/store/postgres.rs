//! Postgres-backed store.
//!
//! Each unit of work is one `sqlx` transaction at the default isolation level.
//! Stock and order rows are read `FOR UPDATE`, so two workers touching the same
//! (product, size) queue behind each other instead of both acting on a stale
//! quantity. Decrements are conditional on the quantity still covering the
//! request; the `quantity >= 0` check constraint backs this up.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres};
use tracing::instrument;

use super::{Store, Transaction};
use crate::domain::aggregates::{
    LineItem, NewLineItem, NewOrder, Order, OrderStatus, Product, Promotion, Province, StockRecord, User,
};
use crate::domain::value_objects::{BookingId, Money, Quantity, Size, TaxRate};
use crate::{Entity, OrderError, Result};

macro_rules! order_columns {
    () => {
        "booking_id, username, promotion_code, status, address, province_id, tax, amount, payment_method, created_at"
    };
}

macro_rules! line_columns {
    () => {
        "id, booking_id, product_id, size, quantity, price"
    };
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| OrderError::Persistence(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool { &self.pool }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<PgTx> {
        Ok(PgTx { tx: self.pool.begin().await? })
    }
}

pub struct PgTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

// =============================================================================
// Row mapping
// =============================================================================

#[derive(FromRow)]
struct UserRow { username: String, full_name: String, email: String, phone: String, created_at: DateTime<Utc> }

#[derive(FromRow)]
struct ProvinceRow { id: i64, name: String }

#[derive(FromRow)]
struct PromotionRow { title: String, description: String, discount_percent: Decimal, start_date: DateTime<Utc>, end_date: DateTime<Utc> }

#[derive(FromRow)]
struct ProductRow { id: i64, name: String, price: Decimal }

#[derive(FromRow)]
struct StockRow { product_id: i64, size: String, quantity: i32 }

#[derive(FromRow)]
struct OrderRow {
    booking_id: String,
    username: String,
    promotion_code: Option<String>,
    status: String,
    address: String,
    province_id: i64,
    tax: Decimal,
    amount: Decimal,
    payment_method: String,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct LineRow { id: i64, booking_id: String, product_id: i64, size: String, quantity: i32, price: Decimal }

fn parse_size(raw: &str) -> Result<Size> {
    raw.parse().map_err(|e| OrderError::Persistence(format!("corrupt size column: {e}")))
}

fn from_db_qty(raw: i32) -> Result<Quantity> {
    u32::try_from(raw)
        .map(Quantity::new)
        .map_err(|_| OrderError::Persistence(format!("negative quantity {raw} in store")))
}

fn to_db_qty(qty: Quantity) -> Result<i32> {
    i32::try_from(qty.value()).map_err(|_| OrderError::validation(format!("quantity {qty} too large")))
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        User { username: r.username, full_name: r.full_name, email: r.email, phone: r.phone, created_at: r.created_at }
    }
}

impl From<PromotionRow> for Promotion {
    fn from(r: PromotionRow) -> Self {
        Promotion { title: r.title, description: r.description, discount_percent: r.discount_percent, start_date: r.start_date, end_date: r.end_date }
    }
}

impl TryFrom<StockRow> for StockRecord {
    type Error = OrderError;
    fn try_from(r: StockRow) -> Result<Self> {
        Ok(StockRecord { product_id: r.product_id, size: parse_size(&r.size)?, quantity: from_db_qty(r.quantity)? })
    }
}

impl TryFrom<OrderRow> for Order {
    type Error = OrderError;
    fn try_from(r: OrderRow) -> Result<Self> {
        Ok(Order {
            booking_id: BookingId::from(r.booking_id),
            username: r.username,
            promotion_code: r.promotion_code,
            status: r.status.parse()?,
            address: r.address,
            province_id: r.province_id,
            tax: TaxRate::new(r.tax).map_err(|e| OrderError::Persistence(e.to_string()))?,
            amount: Money::new(r.amount),
            payment_method: r.payment_method,
            created_at: r.created_at,
        })
    }
}

impl TryFrom<LineRow> for LineItem {
    type Error = OrderError;
    fn try_from(r: LineRow) -> Result<Self> {
        Ok(LineItem {
            id: r.id,
            booking_id: BookingId::from(r.booking_id),
            product_id: r.product_id,
            size: parse_size(&r.size)?,
            quantity: from_db_qty(r.quantity)?,
            price: Money::new(r.price),
        })
    }
}

impl PgTx {
    async fn fetch_order_row(&mut self, sql: &'static str, booking_id: &BookingId) -> Result<Option<Order>> {
        sqlx::query_as::<_, OrderRow>(sql)
            .bind(booking_id.as_str())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Order::try_from)
            .transpose()
    }

    fn require_order(booking_id: &BookingId, row: Option<OrderRow>) -> Result<Order> {
        row.ok_or_else(|| OrderError::not_found(Entity::Order, booking_id))?.try_into()
    }
}

#[async_trait]
impl Transaction for PgTx {
    async fn fetch_user(&mut self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT username, full_name, email, phone, created_at FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(User::from))
    }

    async fn fetch_province(&mut self, name: &str) -> Result<Option<Province>> {
        let row = sqlx::query_as::<_, ProvinceRow>("SELECT id, name FROM provinces WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(|r| Province { id: r.id, name: r.name }))
    }

    async fn fetch_promotion(&mut self, code: &str) -> Result<Option<Promotion>> {
        let row = sqlx::query_as::<_, PromotionRow>(
            "SELECT title, description, discount_percent, start_date, end_date FROM promotions WHERE title = $1",
        )
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Promotion::from))
    }

    async fn fetch_product(&mut self, product_id: i64) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT id, name, price FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(|r| Product { id: r.id, name: r.name, price: Money::new(r.price) }))
    }

    async fn lock_stock(&mut self, product_id: i64, size: Size) -> Result<Option<StockRecord>> {
        sqlx::query_as::<_, StockRow>(
            "SELECT product_id, size, quantity FROM stock WHERE product_id = $1 AND size = $2 FOR UPDATE",
        )
        .bind(product_id)
        .bind(size.as_str())
        .fetch_optional(&mut *self.tx)
        .await?
        .map(StockRecord::try_from)
        .transpose()
    }

    async fn decrement_stock(&mut self, product_id: i64, size: Size, qty: Quantity) -> Result<Option<Quantity>> {
        let row: Option<(i32,)> = sqlx::query_as(
            "UPDATE stock SET quantity = quantity - $3 WHERE product_id = $1 AND size = $2 AND quantity >= $3 RETURNING quantity",
        )
        .bind(product_id)
        .bind(size.as_str())
        .bind(to_db_qty(qty)?)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(|(q,)| from_db_qty(q)).transpose()
    }

    async fn increment_stock(&mut self, product_id: i64, size: Size, qty: Quantity) -> Result<Option<Quantity>> {
        let row: Option<(i32,)> = sqlx::query_as(
            "UPDATE stock SET quantity = quantity + $3 WHERE product_id = $1 AND size = $2 RETURNING quantity",
        )
        .bind(product_id)
        .bind(size.as_str())
        .bind(to_db_qty(qty)?)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(|(q,)| from_db_qty(q)).transpose()
    }

    async fn booking_id_exists(&mut self, booking_id: &BookingId) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM orders WHERE booking_id = $1)")
            .bind(booking_id.as_str())
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(exists)
    }

    async fn insert_order(&mut self, new: &NewOrder) -> Result<Order> {
        let row = sqlx::query_as::<_, OrderRow>(concat!(
            "INSERT INTO orders (booking_id, username, promotion_code, status, address, province_id, tax, amount, payment_method) ",
            "VALUES ($1, $2, $3, 'created', $4, $5, $6, 0, $7) RETURNING ",
            order_columns!()
        ))
        .bind(new.booking_id.as_str())
        .bind(&new.username)
        .bind(&new.promotion_code)
        .bind(&new.address)
        .bind(new.province_id)
        .bind(new.tax.value())
        .bind(&new.payment_method)
        .fetch_one(&mut *self.tx)
        .await?;
        row.try_into()
    }

    async fn fetch_order(&mut self, booking_id: &BookingId) -> Result<Option<Order>> {
        self.fetch_order_row(concat!("SELECT ", order_columns!(), " FROM orders WHERE booking_id = $1"), booking_id).await
    }

    async fn lock_order(&mut self, booking_id: &BookingId) -> Result<Option<Order>> {
        self.fetch_order_row(concat!("SELECT ", order_columns!(), " FROM orders WHERE booking_id = $1 FOR UPDATE"), booking_id)
            .await
    }

    async fn update_order_shipping(&mut self, booking_id: &BookingId, address: &str, province_id: i64) -> Result<Order> {
        let row = sqlx::query_as::<_, OrderRow>(concat!(
            "UPDATE orders SET address = $2, province_id = $3 WHERE booking_id = $1 RETURNING ",
            order_columns!()
        ))
        .bind(booking_id.as_str())
        .bind(address)
        .bind(province_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Self::require_order(booking_id, row)
    }

    async fn update_order_amount(&mut self, booking_id: &BookingId, amount: Money) -> Result<Order> {
        let row = sqlx::query_as::<_, OrderRow>(concat!(
            "UPDATE orders SET amount = $2 WHERE booking_id = $1 RETURNING ",
            order_columns!()
        ))
        .bind(booking_id.as_str())
        .bind(amount.amount())
        .fetch_optional(&mut *self.tx)
        .await?;
        Self::require_order(booking_id, row)
    }

    async fn update_order_status(&mut self, booking_id: &BookingId, status: OrderStatus) -> Result<Order> {
        let row = sqlx::query_as::<_, OrderRow>(concat!(
            "UPDATE orders SET status = $2 WHERE booking_id = $1 RETURNING ",
            order_columns!()
        ))
        .bind(booking_id.as_str())
        .bind(status.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        Self::require_order(booking_id, row)
    }

    async fn delete_order(&mut self, booking_id: &BookingId) -> Result<()> {
        let done = sqlx::query("DELETE FROM orders WHERE booking_id = $1")
            .bind(booking_id.as_str())
            .execute(&mut *self.tx)
            .await?;
        if done.rows_affected() == 0 {
            return Err(OrderError::not_found(Entity::Order, booking_id));
        }
        Ok(())
    }

    async fn list_orders_by_user(&mut self, username: &str) -> Result<Vec<Order>> {
        sqlx::query_as::<_, OrderRow>(concat!(
            "SELECT ", order_columns!(), " FROM orders WHERE username = $1 ORDER BY created_at DESC"
        ))
        .bind(username)
        .fetch_all(&mut *self.tx)
        .await?
        .into_iter()
        .map(Order::try_from)
        .collect()
    }

    async fn total_amount(&mut self, status: OrderStatus, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Money> {
        let (total,): (Decimal,) = sqlx::query_as(
            "SELECT COALESCE(SUM(amount), 0) FROM orders WHERE status = $1 AND created_at BETWEEN $2 AND $3",
        )
        .bind(status.as_str())
        .bind(from)
        .bind(to)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(Money::new(total))
    }

    async fn insert_line(&mut self, new: &NewLineItem) -> Result<LineItem> {
        let row = sqlx::query_as::<_, LineRow>(concat!(
            "INSERT INTO order_lines (booking_id, product_id, size, quantity, price) VALUES ($1, $2, $3, $4, $5) RETURNING ",
            line_columns!()
        ))
        .bind(new.booking_id.as_str())
        .bind(new.product_id)
        .bind(new.size.as_str())
        .bind(to_db_qty(new.quantity)?)
        .bind(new.price.amount())
        .fetch_one(&mut *self.tx)
        .await?;
        row.try_into()
    }

    async fn list_lines(&mut self, booking_id: &BookingId) -> Result<Vec<LineItem>> {
        sqlx::query_as::<_, LineRow>(concat!("SELECT ", line_columns!(), " FROM order_lines WHERE booking_id = $1 ORDER BY id"))
            .bind(booking_id.as_str())
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(LineItem::try_from)
            .collect()
    }

    async fn delete_lines(&mut self, booking_id: &BookingId) -> Result<u64> {
        let done = sqlx::query("DELETE FROM order_lines WHERE booking_id = $1")
            .bind(booking_id.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(done.rows_affected())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
