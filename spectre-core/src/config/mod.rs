//! Runtime configuration types.
//!
//! These are the validated values the engines run with. Reading them from a
//! file is the agent's job.

use alloy_primitives::Address;
use compact_str::CompactString;
use std::time::Duration;

/// What happens to relayed readings when the submission transaction fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Drop the relayed readings whether or not the submission succeeded.
    #[default]
    ClearAlways,
    /// Keep the readings after a failed submission so the next tick can
    /// retry with them.
    RetainOnFailure,
}

/// Relay settings for one asset pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairConfig {
    /// Asset pair identifier, e.g. `ETHUSD`.
    pub asset_pair: CompactString,
    /// Minimum spread, in percent, between the on-chain price and the new
    /// median that justifies an update.
    pub oracle_spread: f64,
    /// Minimum age of the on-chain price before a new update is considered.
    pub oracle_expiration: time::Duration,
    /// Maximum age of a buffered reading.
    pub price_expiration: time::Duration,
}

/// Relay engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Interval between relay ticks, shared by all pairs.
    pub tick_interval: Duration,
    pub retention: RetentionPolicy,
}

/// Event scanner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerConfig {
    /// Contract addresses whose logs are scanned.
    pub addresses: Vec<Address>,
    /// Interval between live fetches, also used as the backfill retry delay.
    pub interval: Duration,
    /// How far back the backfill reaches at startup.
    pub prefetch_period: Duration,
    /// Maximum number of blocks per log query.
    pub block_limit: u64,
    /// Trailing blocks ignored to stay clear of reorganizations.
    pub block_confirmations: u64,
}
