//! TOML file configuration structures.
//!
//! These structs directly map to the `spectre.toml` file format.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub rpc: RpcConfig,
    pub scanner: ScannerConfig,
}

/// Chain node connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// JSON-RPC endpoint of the node (e.g., "http://127.0.0.1:8545").
    pub url: Url,
}

/// Event scanner section. Durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Bridge contracts whose `TeleportInitialized` logs are scanned.
    pub addresses: Vec<Address>,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_prefetch_period")]
    pub prefetch_period: u64,
    #[serde(default = "default_block_limit")]
    pub block_limit: u64,
    #[serde(default = "default_block_confirmations")]
    pub block_confirmations: u64,
    /// Run the live fetch routine.
    #[serde(default = "default_true")]
    pub live: bool,
    /// Run the one-shot historical backfill.
    #[serde(default = "default_true")]
    pub backfill: bool,
}

fn default_interval() -> u64 {
    10
}

fn default_prefetch_period() -> u64 {
    3600
}

fn default_block_limit() -> u64 {
    1000
}

fn default_block_confirmations() -> u64 {
    3
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parsing() {
        let toml_str = r#"
[rpc]
url = "http://127.0.0.1:8545"

[scanner]
addresses = ["0x2d800d93b065ce011af83f316cef9f0d005b0aa4"]
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.rpc.url.as_str(), "http://127.0.0.1:8545/");
        assert_eq!(config.scanner.addresses.len(), 1);
        assert_eq!(config.scanner.interval, 10);
        assert_eq!(config.scanner.prefetch_period, 3600);
        assert_eq!(config.scanner.block_limit, 1000);
        assert_eq!(config.scanner.block_confirmations, 3);
        assert!(config.scanner.live);
        assert!(config.scanner.backfill);
    }

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[rpc]
url = "https://rpc.example.com"

[scanner]
addresses = [
    "0x2d800d93b065ce011af83f316cef9f0d005b0aa4",
    "0x0000000000000000000000000000000000000001",
]
interval = 5
prefetch_period = 160
block_limit = 15
block_confirmations = 1
live = false
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scanner.addresses.len(), 2);
        assert_eq!(config.scanner.interval, 5);
        assert_eq!(config.scanner.prefetch_period, 160);
        assert_eq!(config.scanner.block_limit, 15);
        assert_eq!(config.scanner.block_confirmations, 1);
        assert!(!config.scanner.live);
        assert!(config.scanner.backfill);
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        let toml_str = r#"
[rpc]
url = "http://127.0.0.1:8545"

[scanner]
addresses = ["0x1234"]
"#;
        assert!(toml::from_str::<FileConfig>(toml_str).is_err());
    }
}
