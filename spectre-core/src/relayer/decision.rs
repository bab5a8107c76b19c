//! The per-pair relay transition:
//! expiration check -> quorum check -> truncate -> spread check -> submit.

use super::{Pair, RelayError};
use crate::chain::TxHash;
use crate::price::PriceBuffer;
use time::OffsetDateTime;
use tracing::debug;

/// Decide whether `buffer` should be pushed on-chain and submit it if so.
///
/// `buffer` is a private copy; it is truncated to the quorum size in place.
/// Only network calls happen here, no shared state is touched.
pub(crate) async fn relay(
    pair: &Pair,
    buffer: &mut PriceBuffer,
    now: OffsetDateTime,
) -> Result<TxHash, RelayError> {
    let asset_pair = pair.asset_pair();
    let config = pair.config();
    let median = pair.median();
    let oracle_error = |source| RelayError::Oracle {
        asset_pair: asset_pair.clone(),
        source,
    };

    let last_update = median.age().await.map_err(oracle_error)?;
    if last_update + config.oracle_expiration > now {
        return Err(RelayError::NotYetExpired {
            asset_pair: asset_pair.clone(),
            last_update,
        });
    }

    // A zero quorum would leave nothing to submit.
    let required = median.required_quorum().await.map_err(oracle_error)?.max(1);
    if buffer.len() < required {
        return Err(RelayError::InsufficientQuorum {
            asset_pair: asset_pair.clone(),
            available: buffer.len(),
            required,
        });
    }

    // Only the quorum is submitted, which keeps the transaction small.
    buffer.truncate(required);

    let Some(candidate) = buffer.median() else {
        return Err(RelayError::InsufficientQuorum {
            asset_pair: asset_pair.clone(),
            available: 0,
            required,
        });
    };
    let current = median.current_price().await.map_err(oracle_error)?;
    // A zero on-chain price has no meaningful spread; always update it.
    if let Some(spread) = candidate.percent_change_from(&current) {
        if spread.abs() < config.oracle_spread {
            return Err(RelayError::SpreadTooLow {
                asset_pair: asset_pair.clone(),
                spread,
                threshold: config.oracle_spread,
            });
        }
    }

    debug!(
        asset_pair = %asset_pair,
        median = %candidate,
        current = %current,
        readings = buffer.len(),
        "Submitting oracle update"
    );

    median
        .submit(buffer.readings())
        .await
        .map_err(|source| RelayError::Submission {
            asset_pair: asset_pair.clone(),
            source,
        })
}
