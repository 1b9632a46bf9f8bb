//! The order transaction engine.
//!
//! `ledger`, `promotion` and `lines` are extension traits over
//! [`Transaction`](crate::store::Transaction): they only ever act inside the
//! unit of work the [`coordinator`] opened.
pub mod coordinator;
pub mod ledger;
pub mod lines;
pub mod promotion;
pub mod retry;

pub use ledger::InventoryLedger;
pub use lines::{LineProcessor, LineRequest, ProcessedLines, RequestedLine};
pub use promotion::PromotionResolver;
