//! Promotion (read-only from the engine's side)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::DiscountFraction;
use crate::{OrderError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    /// Unique code customers type in.
    pub title: String,
    pub description: String,
    pub discount_percent: Decimal,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl Promotion {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool { now > self.end_date }

    /// Discount this promotion grants at `now`.
    pub fn discount_at(&self, now: DateTime<Utc>) -> Result<DiscountFraction> {
        if self.is_expired_at(now) {
            return Err(OrderError::ExpiredPromotion { code: self.title.clone(), ended_at: self.end_date });
        }
        DiscountFraction::from_percent(self.discount_percent)
            .map_err(|e| OrderError::validation(format!("promotion {}: {e}", self.title)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use chrono::Duration;

    fn promo(percent: i64, ends_in: Duration) -> Promotion {
        let now = Utc::now();
        Promotion {
            title: "SUMMER".into(), description: String::new(), discount_percent: Decimal::new(percent, 0),
            start_date: now - Duration::days(30), end_date: now + ends_in,
        }
    }

    #[test]
    fn test_discount_fraction() {
        let p = promo(15, Duration::days(1));
        assert_eq!(p.discount_at(Utc::now()).unwrap().value(), Decimal::new(15, 2));
    }

    #[test]
    fn test_expired() {
        let p = promo(15, Duration::days(-1));
        assert_eq!(p.discount_at(Utc::now()).unwrap_err().kind(), ErrorKind::ExpiredPromotion);
    }

    #[test]
    fn test_end_date_is_inclusive() {
        let p = promo(15, Duration::days(1));
        assert!(p.discount_at(p.end_date).is_ok());
    }

    #[test]
    fn test_full_discount_rejected() {
        let p = promo(100, Duration::days(1));
        assert_eq!(p.discount_at(Utc::now()).unwrap_err().kind(), ErrorKind::Validation);
    }
}
