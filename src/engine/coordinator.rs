//! Order transaction coordinator.
//!
//! Every public operation opens one unit of work on the [`Store`], runs the
//! workflow inside it and commits only if every step succeeded. A failing
//! step rolls the whole unit back. Units that lose a race on the store are
//! retried from scratch with backoff. The begin and work steps of each attempt
//! are bounded by the configured timeout; the commit is not. Events go out
//! only after a successful commit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::config::EngineConfig;
use crate::domain::aggregates::{LineItem, NewOrder, Order, OrderStatus, UserSummary};
use crate::domain::events::{EventEnvelope, OrderEvent};
use crate::domain::value_objects::{BookingId, DiscountFraction, Money, TaxRate};
use crate::engine::ledger::InventoryLedger;
use crate::engine::lines::{LineProcessor, LineRequest, RequestedLine};
use crate::engine::promotion::{normalize_code, PromotionResolver};
use crate::engine::retry::retry_transient;
use crate::publisher::{EventPublisher, NoopPublisher};
use crate::store::{Store, Transaction};
use crate::{Entity, OrderError, Result};

const BOOKING_ID_ATTEMPTS: usize = 5;

#[derive(Clone, Debug, Validate)]
pub struct CreateOrderParams {
    #[validate(length(min = 1, message = "username is required"))]
    pub username: String,
    pub promotion_code: Option<String>,
    #[validate(length(min = 1, message = "address is required"))]
    pub address: String,
    pub province: String,
    #[validate(length(min = 1, message = "payment method is required"))]
    pub payment_method: String,
    pub lines: LineRequest,
}

#[derive(Clone, Debug, Validate)]
pub struct UpdateOrderParams {
    pub username: String,
    pub booking_id: BookingId,
    #[validate(length(min = 1, message = "address is required"))]
    pub address: String,
    pub province: String,
    pub lines: LineRequest,
}

/// Order header, its owner and its lines.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrderResult {
    pub order: Order,
    pub user: UserSummary,
    pub lines: Vec<LineItem>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CancelConfirmation {
    pub booking_id: BookingId,
    pub status: OrderStatus,
    pub restored_units: u64,
}

/// `(subtotal × (1 + tax)) × (1 − discount)`, rounded to cents once.
pub fn order_amount(subtotal: Money, tax: TaxRate, discount: DiscountFraction) -> Money {
    subtotal.with_tax(tax).discounted(discount).rounded()
}

pub struct OrderCoordinator<S: Store> {
    store: S,
    publisher: Arc<dyn EventPublisher>,
    config: EngineConfig,
}

impl<S: Store> OrderCoordinator<S> {
    pub fn new(store: S, publisher: Arc<dyn EventPublisher>, config: EngineConfig) -> Self {
        Self { store, publisher, config }
    }

    /// Default engine settings, no event publishing.
    pub fn with_store(store: S) -> Self {
        Self::new(store, Arc::new(NoopPublisher), EngineConfig::default())
    }

    pub fn store(&self) -> &S { &self.store }
    pub fn config(&self) -> &EngineConfig { &self.config }

    // -------------------------------------------------------------------------
    // Exposed operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, params), fields(username = %params.username), err)]
    pub async fn create_order(&self, params: CreateOrderParams) -> Result<OrderResult> {
        let lines = params.lines.parse()?;
        params.validate().map_err(|e| OrderError::validation(e.to_string()))?;

        let result = self.run("create_order", || self.create_once(&params, &lines)).await?;
        info!(booking_id = %result.order.booking_id, amount = %result.order.amount, lines = result.lines.len(), "order created");
        self.publish(OrderEvent::Created {
            booking_id: result.order.booking_id.clone(),
            username: result.order.username.clone(),
            amount: result.order.amount,
            lines: result.lines.len(),
        })
        .await;
        Ok(result)
    }

    #[instrument(skip(self, params), fields(username = %params.username, booking_id = %params.booking_id), err)]
    pub async fn update_order(&self, params: UpdateOrderParams) -> Result<OrderResult> {
        let lines = params.lines.parse()?;
        params.validate().map_err(|e| OrderError::validation(e.to_string()))?;

        let result = self.run("update_order", || self.update_once(&params, &lines)).await?;
        info!(amount = %result.order.amount, lines = result.lines.len(), "order amended");
        self.publish(OrderEvent::Amended {
            booking_id: result.order.booking_id.clone(),
            amount: result.order.amount,
            lines: result.lines.len(),
        })
        .await;
        Ok(result)
    }

    #[instrument(skip(self, booking_id), fields(booking_id = %booking_id), err)]
    pub async fn cancel_order(&self, booking_id: &BookingId, caller: &str) -> Result<CancelConfirmation> {
        let confirmation = self.run("cancel_order", || self.cancel_once(booking_id, caller)).await?;
        info!(restored_units = confirmation.restored_units, "order cancelled");
        self.publish(OrderEvent::Cancelled {
            booking_id: confirmation.booking_id.clone(),
            restored_units: confirmation.restored_units,
        })
        .await;
        Ok(confirmation)
    }

    /// Administrative `created -> confirmed`. Confirming twice is a no-op.
    #[instrument(skip(self, booking_id), fields(booking_id = %booking_id), err)]
    pub async fn confirm_order(&self, booking_id: &BookingId) -> Result<Order> {
        let (order, changed) = self.run("confirm_order", || self.confirm_once(booking_id)).await?;
        if changed {
            info!("order confirmed");
            self.publish(OrderEvent::Confirmed { booking_id: order.booking_id.clone() }).await;
        }
        Ok(order)
    }

    #[instrument(skip(self, booking_id), fields(booking_id = %booking_id), err)]
    pub async fn order_detail(&self, booking_id: &BookingId, caller: &str) -> Result<OrderResult> {
        self.run("order_detail", || self.detail_once(booking_id, caller)).await
    }

    /// Newest first.
    #[instrument(skip(self), err)]
    pub async fn orders_for_user(&self, username: &str) -> Result<Vec<Order>> {
        self.run("orders_for_user", || self.list_once(username)).await
    }

    /// Sum of confirmed order amounts created within `[from, to]`.
    #[instrument(skip(self), err)]
    pub async fn total_income(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Money> {
        if from > to {
            return Err(OrderError::validation(format!("income window starts after it ends: {from} > {to}")));
        }
        self.run("total_income", || self.income_once(from, to)).await
    }

    // -------------------------------------------------------------------------
    // Units of work
    // -------------------------------------------------------------------------

    async fn run<T, F, Fut>(&self, op: &'static str, attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_transient(&self.config.retry, op, attempt).await
    }

    fn deadline(&self) -> Instant { Instant::now() + self.config.unit_timeout }

    /// Bounds the begin and work steps of one attempt. Commit is never
    /// bounded: once the store has been asked to commit, its answer is the
    /// answer the caller gets.
    async fn bounded<T>(&self, op: &'static str, deadline: Instant, work: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout_at(deadline, work).await {
            Ok(outcome) => outcome,
            Err(_) => Err(OrderError::Persistence(format!(
                "{op} timed out after {}ms",
                self.config.unit_timeout.as_millis()
            ))),
        }
    }

    async fn create_once(&self, params: &CreateOrderParams, lines: &[RequestedLine]) -> Result<OrderResult> {
        let deadline = self.deadline();
        let mut tx = self.bounded("create_order", deadline, self.store.begin()).await?;
        let outcome = self.bounded("create_order", deadline, self.create_in(&mut tx, params, lines)).await;
        finish(tx, outcome).await
    }

    async fn create_in(&self, tx: &mut S::Tx, params: &CreateOrderParams, lines: &[RequestedLine]) -> Result<OrderResult> {
        let user = tx
            .fetch_user(&params.username)
            .await?
            .ok_or_else(|| OrderError::not_found(Entity::User, &params.username))?;
        let province = tx
            .fetch_province(&params.province)
            .await?
            .ok_or_else(|| OrderError::not_found(Entity::Province, &params.province))?;
        let discount = tx.resolve_discount(params.promotion_code.as_deref(), Utc::now()).await?;

        let booking_id = allocate_booking_id(tx).await?;
        let order = tx
            .insert_order(&NewOrder {
                booking_id,
                username: user.username.clone(),
                promotion_code: normalize_code(params.promotion_code.as_deref()).map(str::to_string),
                address: params.address.clone(),
                province_id: province.id,
                tax: self.config.tax_rate,
                payment_method: params.payment_method.clone(),
            })
            .await?;

        let processed = tx.process_lines(&order.booking_id, lines).await?;
        let amount = order_amount(processed.subtotal, order.tax, discount);
        let order = tx.update_order_amount(&order.booking_id, amount).await?;

        Ok(OrderResult { order, user: UserSummary::from(&user), lines: processed.items })
    }

    async fn update_once(&self, params: &UpdateOrderParams, lines: &[RequestedLine]) -> Result<OrderResult> {
        let deadline = self.deadline();
        let mut tx = self.bounded("update_order", deadline, self.store.begin()).await?;
        let outcome = self.bounded("update_order", deadline, self.update_in(&mut tx, params, lines)).await;
        finish(tx, outcome).await
    }

    async fn update_in(&self, tx: &mut S::Tx, params: &UpdateOrderParams, lines: &[RequestedLine]) -> Result<OrderResult> {
        let booking_id = &params.booking_id;
        let order = tx
            .lock_order(booking_id)
            .await?
            .ok_or_else(|| OrderError::not_found(Entity::Order, booking_id))?;
        order.ensure_owned_by(&params.username)?;
        let user = tx
            .fetch_user(&order.username)
            .await?
            .ok_or_else(|| OrderError::not_found(Entity::User, &order.username))?;
        let province = tx
            .fetch_province(&params.province)
            .await?
            .ok_or_else(|| OrderError::not_found(Entity::Province, &params.province))?;

        tx.update_order_shipping(booking_id, &params.address, province.id).await?;
        let discount = tx.resolve_discount(order.promotion_code.as_deref(), Utc::now()).await?;

        let previous = tx.list_lines(booking_id).await?;
        for line in &previous {
            tx.restore(line.product_id, line.size, line.quantity).await?;
        }
        tx.delete_lines(booking_id).await?;

        let processed = tx.process_lines(booking_id, lines).await?;
        let amount = order_amount(processed.subtotal, order.tax, discount);
        let order = tx.update_order_amount(booking_id, amount).await?;

        Ok(OrderResult { order, user: UserSummary::from(&user), lines: processed.items })
    }

    async fn cancel_once(&self, booking_id: &BookingId, caller: &str) -> Result<CancelConfirmation> {
        let deadline = self.deadline();
        let mut tx = self.bounded("cancel_order", deadline, self.store.begin()).await?;
        let outcome = self.bounded("cancel_order", deadline, cancel_in(&mut tx, booking_id, caller)).await;
        finish(tx, outcome).await
    }

    async fn confirm_once(&self, booking_id: &BookingId) -> Result<(Order, bool)> {
        let deadline = self.deadline();
        let mut tx = self.bounded("confirm_order", deadline, self.store.begin()).await?;
        let outcome = self.bounded("confirm_order", deadline, confirm_in(&mut tx, booking_id)).await;
        finish(tx, outcome).await
    }

    async fn detail_once(&self, booking_id: &BookingId, caller: &str) -> Result<OrderResult> {
        let deadline = self.deadline();
        let mut tx = self.bounded("order_detail", deadline, self.store.begin()).await?;
        let outcome = self.bounded("order_detail", deadline, detail_in(&mut tx, booking_id, caller)).await;
        finish(tx, outcome).await
    }

    async fn list_once(&self, username: &str) -> Result<Vec<Order>> {
        let deadline = self.deadline();
        let mut tx = self.bounded("orders_for_user", deadline, self.store.begin()).await?;
        let outcome = self.bounded("orders_for_user", deadline, list_in(&mut tx, username)).await;
        finish(tx, outcome).await
    }

    async fn income_once(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Money> {
        let deadline = self.deadline();
        let mut tx = self.bounded("total_income", deadline, self.store.begin()).await?;
        let outcome = self.bounded("total_income", deadline, tx.total_amount(OrderStatus::Confirmed, from, to)).await;
        finish(tx, outcome).await
    }

    async fn publish(&self, event: OrderEvent) {
        let envelope = EventEnvelope::new(event);
        if let Err(err) = self.publisher.publish(&envelope).await {
            warn!(subject = envelope.event.subject(), booking_id = %envelope.event.booking_id(), error = %err, "event publish failed");
        }
    }
}

async fn cancel_in<T: Transaction>(tx: &mut T, booking_id: &BookingId, caller: &str) -> Result<CancelConfirmation> {
    let mut order = tx
        .lock_order(booking_id)
        .await?
        .ok_or_else(|| OrderError::not_found(Entity::Order, booking_id))?;
    order.ensure_owned_by(caller)?;
    order.cancel()?;

    let lines = tx.list_lines(booking_id).await?;
    let mut restored_units = 0u64;
    for line in &lines {
        tx.restore(line.product_id, line.size, line.quantity).await?;
        restored_units += u64::from(line.quantity.value());
    }
    tx.delete_lines(booking_id).await?;
    tx.delete_order(booking_id).await?;

    Ok(CancelConfirmation { booking_id: order.booking_id, status: order.status, restored_units })
}

async fn confirm_in<T: Transaction>(tx: &mut T, booking_id: &BookingId) -> Result<(Order, bool)> {
    let mut order = tx
        .lock_order(booking_id)
        .await?
        .ok_or_else(|| OrderError::not_found(Entity::Order, booking_id))?;
    if !order.confirm()? {
        return Ok((order, false));
    }
    let order = tx.update_order_status(booking_id, order.status).await?;
    Ok((order, true))
}

async fn detail_in<T: Transaction>(tx: &mut T, booking_id: &BookingId, caller: &str) -> Result<OrderResult> {
    let order = tx
        .fetch_order(booking_id)
        .await?
        .ok_or_else(|| OrderError::not_found(Entity::Order, booking_id))?;
    order.ensure_owned_by(caller)?;
    let user = tx
        .fetch_user(&order.username)
        .await?
        .ok_or_else(|| OrderError::not_found(Entity::User, &order.username))?;
    let lines = tx.list_lines(booking_id).await?;
    Ok(OrderResult { order, user: UserSummary::from(&user), lines })
}

async fn list_in<T: Transaction>(tx: &mut T, username: &str) -> Result<Vec<Order>> {
    tx.fetch_user(username).await?.ok_or_else(|| OrderError::not_found(Entity::User, username))?;
    tx.list_orders_by_user(username).await
}

async fn allocate_booking_id<T: Transaction>(tx: &mut T) -> Result<BookingId> {
    for _ in 0..BOOKING_ID_ATTEMPTS {
        let candidate = BookingId::generate();
        if !tx.booking_id_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Err(OrderError::Contention(format!("no free booking id after {BOOKING_ID_ATTEMPTS} draws")))
}

/// Commits on success. On failure, timeouts included, rolls back and returns
/// the step error.
async fn finish<T: Transaction, V>(tx: T, outcome: Result<V>) -> Result<V> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}
