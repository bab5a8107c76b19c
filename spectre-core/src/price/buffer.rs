//! Per-pair collection of price readings.

use super::{Median, PriceError, PricePoint};
use compact_str::CompactString;
use itertools::Itertools;
use num_bigint::BigInt;
use time::OffsetDateTime;

/// Buffered readings for one asset pair.
///
/// Order of insertion does not matter for the median, but it is kept until a
/// [`truncate`](PriceBuffer::truncate) so that the oldest readings can be
/// discarded with [`discard_front`](PriceBuffer::discard_front).
#[derive(Debug, Clone)]
pub struct PriceBuffer {
    asset_pair: CompactString,
    expiration: time::Duration,
    readings: Vec<PricePoint>,
}

impl PriceBuffer {
    /// Create an empty buffer whose readings live for `expiration`.
    pub fn new(asset_pair: impl Into<CompactString>, expiration: time::Duration) -> Self {
        Self {
            asset_pair: asset_pair.into(),
            expiration,
            readings: Vec::new(),
        }
    }

    pub fn asset_pair(&self) -> &str {
        &self.asset_pair
    }

    /// Append a reading. Duplicates from the same source are not filtered.
    pub fn add(&mut self, point: PricePoint) -> Result<(), PriceError> {
        point.validate()?;
        self.readings.push(point);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Drop readings older than the buffer's expiration.
    pub fn clear_expired(&mut self, now: OffsetDateTime) {
        let expiration = self.expiration;
        self.readings
            .retain(|point| now - point.observed_at <= expiration);
    }

    /// Median of the buffered values, `None` when the buffer is empty.
    pub fn median(&self) -> Option<Median> {
        let values: Vec<&BigInt> = self
            .readings
            .iter()
            .map(|point| &point.value)
            .sorted_unstable()
            .collect();
        let mid = values.len() / 2;
        match values.len() {
            0 => None,
            n if n % 2 == 1 => Some(Median::single(values[mid])),
            _ => Some(Median::between(values[mid - 1], values[mid])),
        }
    }

    /// Keep the `n` readings closest to the median, ties going to the lower
    /// value. Does nothing if the buffer holds `n` readings or fewer.
    pub fn truncate(&mut self, n: usize) {
        if n >= self.readings.len() {
            return;
        }
        let Some(median) = self.median() else {
            return;
        };
        let kept: Vec<PricePoint> = self
            .readings
            .drain(..)
            .sorted_by_cached_key(|point| {
                (median.distance_doubled(&point.value), point.value.clone())
            })
            .take(n)
            .collect();
        self.readings = kept;
    }

    /// Readings to be submitted on-chain.
    pub fn readings(&self) -> &[PricePoint] {
        &self.readings
    }

    pub fn clear(&mut self) {
        self.readings.clear();
    }

    /// Remove the `n` oldest readings.
    pub fn discard_front(&mut self, n: usize) {
        let n = n.min(self.readings.len());
        self.readings.drain(..n);
    }
}
