//! Decoding of `TeleportInitialized` logs.
//!
//! The log data is the ABI encoding of a static tuple:
//!
//! | word | field         | type    |
//! |------|---------------|---------|
//! | 0    | source domain | bytes32 |
//! | 1    | target domain | bytes32 |
//! | 2    | receiver      | bytes32 |
//! | 3    | operator      | bytes32 |
//! | 4    | amount        | uint128 |
//! | 5    | nonce         | uint80  |
//! | 6    | timestamp     | uint48  |

use crate::chain::Log;
use crate::events::{ScannedEvent, TeleportGuid};
use alloy_primitives::{B256, Bytes, keccak256};
use thiserror::Error;

/// Canonical signature of the bridge event.
pub const TELEPORT_EVENT_SIGNATURE: &str =
    "TeleportInitialized((bytes32,bytes32,bytes32,bytes32,uint128,uint80,uint48))";

const WORD: usize = 32;

/// Length of the encoded identifier payload.
pub const GUID_LEN: usize = 7 * WORD;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("log topic {0:?} is not TeleportInitialized")]
    UnexpectedTopic(Option<B256>),

    #[error("log data is {actual} bytes, expected at least {GUID_LEN}")]
    TooShort { actual: usize },

    #[error("{field} does not fit in {bits} bits")]
    Overflow { field: &'static str, bits: u32 },
}

/// Topic 0 of every `TeleportInitialized` log.
pub fn teleport_topic() -> B256 {
    keccak256(TELEPORT_EVENT_SIGNATURE)
}

/// Decode a log into the event handed to the transport.
pub fn decode_log(log: &Log) -> Result<ScannedEvent, DecodeError> {
    let topic = log.topics.first().copied();
    if topic != Some(teleport_topic()) {
        return Err(DecodeError::UnexpectedTopic(topic));
    }
    if log.data.len() < GUID_LEN {
        return Err(DecodeError::TooShort {
            actual: log.data.len(),
        });
    }

    let payload = &log.data[..GUID_LEN];
    let guid = decode_guid(payload)?;

    Ok(ScannedEvent {
        hash: guid_hash(payload),
        event: Bytes::copy_from_slice(payload),
        guid,
        block_number: log.block_number,
        tx_hash: log.tx_hash,
        log_index: log.log_index,
    })
}

/// Identifier of a teleport: `keccak256` of its encoded GUID.
///
/// Independent of where the log sits, so the same GUID always hashes the same.
pub fn guid_hash(payload: &[u8]) -> B256 {
    keccak256(payload)
}

/// `payload` is exactly [`GUID_LEN`] bytes.
fn decode_guid(payload: &[u8]) -> Result<TeleportGuid, DecodeError> {
    let word = |index: usize| &payload[index * WORD..(index + 1) * WORD];

    let source_domain = B256::from_slice(word(0));
    let target_domain = B256::from_slice(word(1));
    let receiver = B256::from_slice(word(2));
    let operator = B256::from_slice(word(3));
    let amount = uint_word(word(4), "amount", 128)?;
    let nonce = uint_word(word(5), "nonce", 80)?;
    let timestamp = uint_word(word(6), "timestamp", 48)?;

    Ok(TeleportGuid {
        source_domain,
        target_domain,
        receiver,
        operator,
        amount,
        nonce,
        timestamp: timestamp as u64,
    })
}

/// Read a right-aligned unsigned integer of `bits` width from a 32-byte word.
fn uint_word(word: &[u8], field: &'static str, bits: u32) -> Result<u128, DecodeError> {
    let padding = WORD - (bits as usize) / 8;
    if word[..padding].iter().any(|byte| *byte != 0) {
        return Err(DecodeError::Overflow { field, bits });
    }
    let mut value = [0u8; 16];
    value.copy_from_slice(&word[WORD - 16..]);
    Ok(u128::from_be_bytes(value))
}
