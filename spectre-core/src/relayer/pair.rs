use crate::chain::MedianOracle;
use crate::config::PairConfig;
use compact_str::CompactString;
use std::fmt;
use std::sync::Arc;

/// An asset pair registered with the relay engine, bound to its median
/// contract.
#[derive(Clone)]
pub struct Pair {
    config: PairConfig,
    median: Arc<dyn MedianOracle>,
}

impl Pair {
    pub fn new(config: PairConfig, median: Arc<dyn MedianOracle>) -> Self {
        Self { config, median }
    }

    pub fn asset_pair(&self) -> &CompactString {
        &self.config.asset_pair
    }

    pub fn config(&self) -> &PairConfig {
        &self.config
    }

    pub fn median(&self) -> &dyn MedianOracle {
        self.median.as_ref()
    }
}

impl fmt::Debug for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pair")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
