//! Event type definitions.

use alloy_primitives::{B256, Bytes};
use serde::Serialize;

/// Cross-chain transfer identifier carried by a `TeleportInitialized` log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeleportGuid {
    pub source_domain: B256,
    pub target_domain: B256,
    pub receiver: B256,
    pub operator: B256,
    pub amount: u128,
    /// uint80 on-chain.
    pub nonce: u128,
    /// uint48 on-chain, unix seconds.
    pub timestamp: u64,
}

/// A decoded bridge event ready for the transport.
///
/// `hash` and `event` are the named fields downstream consumers key on; the
/// rest is provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedEvent {
    /// keccak256 of the GUID payload.
    pub hash: B256,
    /// Raw identifier payload exactly as logged.
    pub event: Bytes,
    pub guid: TeleportGuid,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}
