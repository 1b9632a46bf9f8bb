//! Order Engine
//!
//! Turns requested (product, size, quantity) lines into committed orders
//! against a finite per-size inventory.
//!
//! ## Features
//! - Order placement with promotion-adjusted pricing
//! - Order amendment (full line-set replacement)
//! - Cancellation with exact stock restoration
//! - Administrative confirmation
//! - Every workflow runs as one unit of work: it commits whole or leaves no trace

pub mod config;
pub mod domain;
pub mod engine;
pub mod http;
pub mod publisher;
pub mod store;

pub use config::{Config, EngineConfig};
pub use engine::coordinator::{
    CancelConfirmation, CreateOrderParams, OrderCoordinator, OrderResult, UpdateOrderParams,
};
pub use engine::lines::LineRequest;

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Kind of record a lookup failed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entity {
    User,
    Province,
    Product,
    Promotion,
    Order,
    Stock,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::User => "user",
            Self::Province => "province",
            Self::Product => "product",
            Self::Promotion => "promotion",
            Self::Order => "order",
            Self::Stock => "stock record",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum OrderError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: Entity, key: String },

    #[error("insufficient stock for product {product_id} size {size}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i64,
        size: String,
        requested: u32,
        available: u32,
    },

    #[error("promotion {code} expired at {ended_at}")]
    ExpiredPromotion { code: String, ended_at: DateTime<Utc> },

    #[error("order {booking_id} does not belong to {caller}")]
    Unauthorized { booking_id: String, caller: String },

    #[error("storage error: {0}")]
    Persistence(String),

    /// Serialization failure, deadlock or key collision. Retried by the
    /// coordinator and never returned to callers.
    #[error("storage contention: {0}")]
    Contention(String),
}

/// Stable discriminant of [`OrderError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientStock,
    ExpiredPromotion,
    Unauthorized,
    Persistence,
}

impl OrderError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: Entity, key: impl ToString) -> Self {
        Self::NotFound { entity, key: key.to_string() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            Self::ExpiredPromotion { .. } => ErrorKind::ExpiredPromotion,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::Persistence(_) | Self::Contention(_) => ErrorKind::Persistence,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Contention(_))
    }
}

impl From<sqlx::Error> for OrderError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            // 40001 serialization_failure, 40P01 deadlock_detected, 23505 unique_violation
            if matches!(db.code().as_deref(), Some("40001" | "40P01" | "23505")) {
                return Self::Contention(db.message().to_string());
            }
        }
        Self::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_folds_contention_into_persistence() {
        let err = OrderError::Contention("deadlock".into());
        assert!(err.is_transient());
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(!OrderError::Persistence("down".into()).is_transient());
    }

    #[test]
    fn test_not_found_message() {
        let err = OrderError::not_found(Entity::Stock, "7/XL");
        assert_eq!(err.to_string(), "stock record not found: 7/XL");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_sqlx_row_not_found_is_persistence() {
        let err: OrderError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(!err.is_transient());
    }
}
