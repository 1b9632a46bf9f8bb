//! Aggregates module
pub mod customer;
pub mod order;
pub mod product;
pub mod promotion;

pub use customer::{Province, User, UserSummary};
pub use order::{LineItem, NewLineItem, NewOrder, Order, OrderStatus};
pub use product::{Product, StockRecord};
pub use promotion::Promotion;
