//! Price readings and the per-pair buffer they are collected into.
//!
//! Values are arbitrary-precision integers. Floating point only appears at
//! the very end of a spread computation, when the result is compared against
//! a configured threshold.

pub mod buffer;

pub use buffer::PriceBuffer;

use compact_str::CompactString;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;

/// Fixed-point scale used when dividing big integers for a spread percentage.
const SPREAD_SCALE: u64 = 1_000_000_000_000_000_000;

/// Errors raised while collecting price readings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriceError {
    /// A zero value is the "no reading" sentinel and is never accepted.
    #[error("invalid price reading for {asset_pair}: value must be non-zero")]
    InvalidReading { asset_pair: CompactString },
}

/// A single price reading submitted by a feeder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricePoint {
    /// Asset pair identifier, e.g. `ETHUSD`.
    pub asset_pair: CompactString,
    /// Price value in the oracle's fixed-point units.
    pub value: BigInt,
    /// When the feeder observed this price.
    pub observed_at: OffsetDateTime,
}

impl PricePoint {
    pub fn new(
        asset_pair: impl Into<CompactString>,
        value: impl Into<BigInt>,
        observed_at: OffsetDateTime,
    ) -> Self {
        Self {
            asset_pair: asset_pair.into(),
            value: value.into(),
            observed_at,
        }
    }

    /// Reject the zero sentinel.
    pub fn validate(&self) -> Result<(), PriceError> {
        if self.value.is_zero() {
            return Err(PriceError::InvalidReading {
                asset_pair: self.asset_pair.clone(),
            });
        }
        Ok(())
    }
}

/// Exact median of a set of readings.
///
/// Twice the median is stored so that the mean of the two middle values of an
/// even-sized set stays exact: the median of `{1, 2, 3, 4}` is `2.5`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Median {
    doubled: BigInt,
}

impl Median {
    /// Median of an odd-sized set.
    pub fn single(value: &BigInt) -> Self {
        Self {
            doubled: value + value,
        }
    }

    /// Median of an even-sized set: the mean of the two middle values.
    pub fn between(lower: &BigInt, upper: &BigInt) -> Self {
        Self {
            doubled: lower + upper,
        }
    }

    /// Twice the median value.
    pub fn doubled(&self) -> &BigInt {
        &self.doubled
    }

    /// Whether the median has no fractional half.
    pub fn is_whole(&self) -> bool {
        let magnitude = self.doubled.magnitude();
        let half = magnitude.clone() >> 1u32;
        &(&half + &half) == magnitude
    }

    pub fn to_f64(&self) -> Option<f64> {
        self.doubled.to_f64().map(|value| value / 2.0)
    }

    /// Distance between `value` and the median, scaled by two.
    pub fn distance_doubled(&self, value: &BigInt) -> BigInt {
        (value + value - &self.doubled).abs()
    }

    /// Percentage change of the median relative to `reference`:
    /// `(median - reference) / reference * 100`.
    ///
    /// The division happens on big integers scaled by 10^18; only the final
    /// quotient is converted to `f64`. Returns `None` for a zero reference.
    pub fn percent_change_from(&self, reference: &BigInt) -> Option<f64> {
        if reference.is_zero() {
            return None;
        }
        let doubled_reference = reference + reference;
        let delta = &self.doubled - &doubled_reference;
        let scaled = delta * BigInt::from(100u32) * BigInt::from(SPREAD_SCALE);
        let quotient = scaled / doubled_reference;
        quotient
            .to_f64()
            .map(|value| value / SPREAD_SCALE as f64)
    }
}

impl fmt::Display for Median {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.doubled.is_negative() { "-" } else { "" };
        let magnitude = self.doubled.magnitude();
        let whole = magnitude.clone() >> 1u32;
        if self.is_whole() {
            write!(f, "{sign}{whole}")
        } else {
            write!(f, "{sign}{whole}.5")
        }
    }
}
