//! [`ChainClient`] over Ethereum JSON-RPC.

use super::{BlockHeader, ChainClient, Log, LogFilter, RpcError};
use alloy_primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// HTTP JSON-RPC client for an Ethereum node.
pub struct JsonRpcClient {
    http: reqwest::Client,
    endpoint: Url,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    block_number: Option<String>,
    transaction_hash: Option<B256>,
    log_index: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    number: String,
    timestamp: String,
}

impl JsonRpcClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a client for the node at `endpoint`.
    pub fn new(endpoint: Url) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            endpoint,
            next_id: AtomicU64::new(1),
        })
    }

    /// Perform a single JSON-RPC call. A `null` result comes back as `None`.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!(method, id, "JSON-RPC request");

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let response: RpcResponse<T> = response.json().await?;

        if let Some(error) = response.error {
            return Err(RpcError::Node {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result)
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn height(&self) -> Result<u64, RpcError> {
        let height: String = self
            .call("eth_blockNumber", json!([]))
            .await?
            .ok_or_else(|| RpcError::Malformed("eth_blockNumber returned null".into()))?;
        parse_quantity(&height)
    }

    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, RpcError> {
        let params = json!([{
            "address": filter.addresses,
            "topics": [filter.topics],
            "fromBlock": format_quantity(filter.from_block),
            "toBlock": format_quantity(filter.to_block),
        }]);
        let logs: Vec<RpcLog> = self.call("eth_getLogs", params).await?.unwrap_or_default();
        logs.into_iter().map(Log::try_from).collect()
    }

    async fn block_by_number(&self, number: u64) -> Result<BlockHeader, RpcError> {
        let block: RpcBlock = self
            .call("eth_getBlockByNumber", json!([format_quantity(number), false]))
            .await?
            .ok_or(RpcError::BlockNotFound(number))?;
        Ok(BlockHeader {
            number: parse_quantity(&block.number)?,
            timestamp: parse_quantity(&block.timestamp)?,
        })
    }
}

impl TryFrom<RpcLog> for Log {
    type Error = RpcError;

    fn try_from(log: RpcLog) -> Result<Self, Self::Error> {
        let (Some(block_number), Some(tx_hash), Some(log_index)) =
            (log.block_number, log.transaction_hash, log.log_index)
        else {
            return Err(RpcError::Malformed("pending log in a confirmed range".into()));
        };
        Ok(Log {
            address: log.address,
            topics: log.topics,
            data: log.data,
            block_number: parse_quantity(&block_number)?,
            tx_hash,
            log_index: parse_quantity(&log_index)?,
        })
    }
}

/// Parse a `0x`-prefixed hex quantity.
fn parse_quantity(value: &str) -> Result<u64, RpcError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| RpcError::Malformed(format!("quantity without 0x prefix: {value}")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| RpcError::Malformed(format!("invalid quantity {value}: {e}")))
}

fn format_quantity(value: u64) -> String {
    format!("{value:#x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_round_trip() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1b4").unwrap(), 436);
        assert_eq!(format_quantity(436), "0x1b4");
        assert!(matches!(parse_quantity("1b4"), Err(RpcError::Malformed(_))));
        assert!(matches!(parse_quantity("0xzz"), Err(RpcError::Malformed(_))));
    }

    #[test]
    fn test_log_conversion() {
        let raw = json!({
            "address": "0x2d800d93b065ce011af83f316cef9f0d005b0aa4",
            "topics": ["0x66e8ab5a41d4b109c7f6ea5303e3c292771e57fb0b93a8474ca6f72e53eac0e8"],
            "data": "0x0102",
            "blockNumber": "0x10",
            "transactionHash": "0x66e8ab5a41d4b109c7f6ea5303e3c292771e57fb0b93a8474ca6f72e53eac0e8",
            "logIndex": "0x3",
            "removed": false
        });
        let log = Log::try_from(serde_json::from_value::<RpcLog>(raw).unwrap()).unwrap();
        assert_eq!(log.block_number, 16);
        assert_eq!(log.log_index, 3);
        assert_eq!(log.data.to_vec(), vec![1u8, 2]);
        assert_eq!(log.topics.len(), 1);
    }

    #[test]
    fn test_pending_log_is_rejected() {
        let raw = json!({
            "address": "0x2d800d93b065ce011af83f316cef9f0d005b0aa4",
            "topics": [],
            "data": "0x",
            "blockNumber": null,
            "transactionHash": null,
            "logIndex": null
        });
        let result = Log::try_from(serde_json::from_value::<RpcLog>(raw).unwrap());
        assert!(matches!(result, Err(RpcError::Malformed(_))));
    }
}
