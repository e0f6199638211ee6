//! Exact monetary amounts
//!
//! Every price, revenue figure and balance in the store is a [`Money`]: a
//! `rust_decimal::Decimal` held to at most [`Money::SCALE`] fractional digits.
//! Sums are exact; the only rounding happens when dividing for a derived
//! figure (eCPM, CPC) or applying a revenue share.

use crate::{Error, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed-scale monetary amount (micro-units)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Fractional digits kept for every amount
    pub const SCALE: u32 = 6;

    /// Zero
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Build from a decimal, rejecting values finer than the scale
    pub fn from_decimal(value: Decimal) -> Result<Self> {
        let normalized = value.normalize();
        if normalized.scale() > Self::SCALE {
            return Err(Error::InvalidAmount(format!(
                "{} has more than {} decimal places",
                value,
                Self::SCALE
            )));
        }
        Ok(Self(normalized))
    }

    /// Build from integer micro-units (1 = 0.000001)
    pub fn from_micros(micros: i64) -> Self {
        Self(Decimal::new(micros, Self::SCALE).normalize())
    }

    /// Build from a whole number of currency units
    pub fn from_units(units: i64) -> Self {
        Self(Decimal::from(units))
    }

    /// Underlying decimal
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// True for strictly negative amounts
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// True for zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Exact addition; `None` when the sum cannot be held exactly
    pub fn checked_add(self, other: Money) -> Option<Money> {
        let sum = self.0.checked_add(other.0)?;
        // Decimal drops fractional digits instead of failing once the
        // mantissa is exhausted
        if sum.scale() < self.0.scale().max(other.0.scale()) {
            return None;
        }
        Some(Money(sum.normalize()))
    }

    /// Multiply by a ratio (e.g. a revenue share), truncating toward zero
    pub fn checked_mul_ratio(self, ratio: Decimal) -> Option<Money> {
        let product = self.0.checked_mul(ratio)?;
        if product.scale() < Self::SCALE.min(self.0.scale() + ratio.scale()) {
            return None;
        }
        Some(Money(
            product
                .round_dp_with_strategy(Self::SCALE, RoundingStrategy::ToZero)
                .normalize(),
        ))
    }

    /// Divide by a count, rounding to the scale; zero when `count` is zero
    pub fn div_count(self, count: u64) -> Money {
        if count == 0 {
            return Money::ZERO;
        }
        let quotient = self.0 / Decimal::from(count);
        Money(
            quotient
                .round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero)
                .normalize(),
        )
    }

    /// Revenue per thousand units of `count` (eCPM when `count` is impressions)
    ///
    /// `None` when scaling by a thousand overflows.
    pub fn per_mille(self, count: u64) -> Option<Money> {
        if count == 0 {
            return Some(Money::ZERO);
        }
        let value = self
            .0
            .checked_mul(Decimal::from(1000u32))?
            .checked_div(Decimal::from(count))?;
        Some(Money(
            value
                .round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero)
                .normalize(),
        ))
    }

    /// Render with exactly `dp` fractional digits
    pub fn to_string_fixed(&self, dp: u32) -> String {
        format!("{:.*}", dp as usize, self.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Money {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| Error::InvalidAmount(format!("{:?}: {}", s, e)))?;
        Self::from_decimal(value)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = Error;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::from_decimal(value)
    }
}
