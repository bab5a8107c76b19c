//! Narrow capability interfaces onto the chain.
//!
//! The relay engine only needs a handful of reads and a submit call on the
//! median contract; the scanner only needs chain height, log filtering and
//! block timestamps. Both are injected as trait objects or generics so tests
//! can swap in in-memory doubles.

pub mod json_rpc;

pub use json_rpc::JsonRpcClient;

use crate::price::PricePoint;
use alloy_primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use num_bigint::BigInt;
use thiserror::Error;
use time::OffsetDateTime;

/// Transaction hash returned by a submission.
pub type TxHash = B256;

/// Errors returned by chain capabilities.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error object.
    #[error("node error {code}: {message}")]
    Node { code: i64, message: String },

    /// The response could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The requested block does not exist (yet).
    #[error("block {0} not found")]
    BlockNotFound(u64),
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        RpcError::Transport(e.to_string())
    }
}

/// A log entry as returned by the chain client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

/// The parts of a block header the scanner cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
}

/// Log query over an inclusive block interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub addresses: Vec<Address>,
    /// Accepted values for topic 0.
    pub topics: Vec<B256>,
    pub from_block: u64,
    pub to_block: u64,
}

/// Read access to the chain for event scanning.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain head.
    async fn height(&self) -> Result<u64, RpcError>;

    /// Logs matching `filter`, in chain order.
    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, RpcError>;

    async fn block_by_number(&self, number: u64) -> Result<BlockHeader, RpcError>;
}

/// The on-chain median oracle contract for one asset pair.
#[async_trait]
pub trait MedianOracle: Send + Sync {
    /// Time of the last accepted update.
    async fn age(&self) -> Result<OffsetDateTime, RpcError>;

    /// Number of readings the contract requires in a single update.
    async fn required_quorum(&self) -> Result<usize, RpcError>;

    /// Price currently recorded on-chain.
    async fn current_price(&self) -> Result<BigInt, RpcError>;

    /// Submit a new set of readings.
    async fn submit(&self, values: &[PricePoint]) -> Result<TxHash, RpcError>;
}
