use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// A Taka amount held at two decimal places. Serialized as a JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(#[serde(with = "rust_decimal::serde::float")] Decimal);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::from(cents) / Decimal::ONE_HUNDRED)
    }

    /// Saturates at `i64::MAX` for amounts no wallet can hold.
    pub fn to_cents(self) -> i64 {
        self.0
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|d| d.round().to_i64())
            .unwrap_or(i64::MAX)
    }

    pub fn from_decimal(decimal: Decimal) -> Self {
        Money(decimal.round_dp(2))
    }

    /// Shortest-representation conversion, so `1499.9` stays `1499.90`.
    pub fn from_f64(value: f64) -> Option<Self> {
        Decimal::from_f64(value).map(Self::from_decimal)
    }

    /// Like `from_f64`, but a non-zero input never rounds to zero: amounts
    /// smaller than one paisa keep their sign at `0.01`.
    pub fn from_f64_nonzero(value: f64) -> Option<Self> {
        let money = Self::from_f64(value)?;
        if !money.is_zero() || value == 0.0 {
            return Some(money);
        }
        Some(Money::from_cents(if value > 0.0 { 1 } else { -1 }))
    }

    /// Parses an amount as it appears in a message body: grouping commas are
    /// dropped and a sentence-ending period is ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let clean = raw.trim().replace(',', "");
        let clean = clean.trim_end_matches('.');
        if clean.is_empty() {
            return None;
        }
        Decimal::from_str(clean).ok().map(Self::from_decimal)
    }

    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    pub fn to_f64(self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

    pub fn abs_diff(self, other: Money) -> Money {
        Money((self.0 - other.0).abs())
    }

    /// Inclusive: a difference exactly equal to `tolerance` still matches.
    pub fn within(self, other: Money, tolerance: Money) -> bool {
        self.abs_diff(other) <= tolerance
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tk {:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Money(self.0 - rhs.0)
    }
}
