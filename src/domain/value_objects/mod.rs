//! Value Objects for orders and inventory

use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

/// Garment size a stock record is kept for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Size { S, M, L, Xl, Xxl, Oversize }

impl Size {
    pub const ALL: [Size; 6] = [Size::S, Size::M, Size::L, Size::Xl, Size::Xxl, Size::Oversize];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S => "S",
            Self::M => "M",
            Self::L => "L",
            Self::Xl => "XL",
            Self::Xxl => "XXL",
            Self::Oversize => "OVERSIZE",
        }
    }
}

impl FromStr for Size {
    type Err = SizeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Size::ALL.into_iter().find(|size| size.as_str() == upper).ok_or_else(|| SizeError(s.to_string()))
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone)] pub struct SizeError(pub String);
impl std::error::Error for SizeError {}
impl fmt::Display for SizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "unsupported size {:?}", self.0) }
}

/// Booking identifier: opaque token naming one order end-to-end.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(String);

impl BookingId {
    pub const LEN: usize = 18;
    const ALPHABET: &'static [u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ123456789";

    pub fn generate() -> Self { Self::generate_with(&mut rand::thread_rng()) }

    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..Self::LEN)
            .map(|_| Self::ALPHABET[rng.gen_range(0..Self::ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<String> for BookingId { fn from(value: String) -> Self { Self(value) } }
impl From<&str> for BookingId { fn from(value: &str) -> Self { Self(value.to_string()) } }

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Money value object. Amounts carry no currency: the store prices everything
/// in a single one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub fn new(amount: Decimal) -> Self { Self(amount) }
    pub fn zero() -> Self { Self(Decimal::ZERO) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn add(&self, other: Money) -> Money { Money(self.0 + other.0) }
    pub fn multiply(&self, qty: Quantity) -> Money { Money(self.0 * Decimal::from(qty.value())) }
    pub fn with_tax(&self, rate: TaxRate) -> Money { Money(self.0 * (Decimal::ONE + rate.value())) }
    pub fn discounted(&self, discount: DiscountFraction) -> Money { Money(self.0 * (Decimal::ONE - discount.value())) }

    /// Exactly two decimal places, midpoint away from zero.
    pub fn rounded(&self) -> Money {
        let mut amount = self.0.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        amount.rescale(2);
        Money(amount)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self { iter.fold(Money::zero(), |acc, m| acc.add(m)) }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Quantity value object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> Self { Self(value) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: Quantity) -> Option<Self> { self.0.checked_add(other.0).map(Self) }
    pub fn subtract(&self, other: Quantity) -> Option<Self> {
        if other.0 > self.0 { None } else { Some(Self(self.0 - other.0)) }
    }
    pub fn is_zero(&self) -> bool { self.0 == 0 }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Tax rate as a fraction, e.g. 0.1 for 10%.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRate(Decimal);

impl TaxRate {
    /// Stored as `NUMERIC(6, 4)`: below 100, at most four decimal places.
    pub const MAX_SCALE: u32 = 4;

    pub fn new(value: Decimal) -> Result<Self, RateError> {
        if value.is_sign_negative() || value >= Decimal::ONE_HUNDRED || value.normalize().scale() > Self::MAX_SCALE {
            return Err(RateError::TaxOutOfRange(value));
        }
        Ok(Self(value))
    }
    pub fn value(&self) -> Decimal { self.0 }
}

impl Default for TaxRate { fn default() -> Self { Self(Decimal::new(1, 1)) } }

/// Promotion discount as a multiplier in [0, 1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscountFraction(Decimal);

impl DiscountFraction {
    pub const NONE: DiscountFraction = DiscountFraction(Decimal::ZERO);

    pub fn from_percent(percent: Decimal) -> Result<Self, RateError> {
        if percent.is_sign_negative() || percent >= Decimal::ONE_HUNDRED {
            return Err(RateError::DiscountOutOfRange(percent));
        }
        Ok(Self(percent / Decimal::ONE_HUNDRED))
    }
    pub fn value(&self) -> Decimal { self.0 }
}

#[derive(Debug, Clone)] pub enum RateError { TaxOutOfRange(Decimal), DiscountOutOfRange(Decimal) }
impl std::error::Error for RateError {}
impl fmt::Display for RateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaxOutOfRange(v) => write!(f, "tax rate {v} outside [0, 100) or finer than 4 decimal places"),
            Self::DiscountOutOfRange(v) => write!(f, "discount percent {v} outside [0, 100)"),
        }
    }
}
