//! Promotion resolver: promotion code to discount fraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::value_objects::DiscountFraction;
use crate::store::Transaction;
use crate::{Entity, OrderError, Result};

/// Code meaning "no promotion applied".
pub const NO_PROMOTION: &str = "none";

/// `None` for an absent, blank or `"none"` code.
pub fn normalize_code(code: Option<&str>) -> Option<&str> {
    code.map(str::trim).filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case(NO_PROMOTION))
}

#[async_trait]
pub trait PromotionResolver: Transaction {
    async fn resolve_discount(&mut self, code: Option<&str>, now: DateTime<Utc>) -> Result<DiscountFraction> {
        let Some(code) = normalize_code(code) else { return Ok(DiscountFraction::NONE) };
        let promotion = self
            .fetch_promotion(code)
            .await?
            .ok_or_else(|| OrderError::not_found(Entity::Promotion, code))?;
        promotion.discount_at(now)
    }
}

impl<T: Transaction> PromotionResolver for T {}
