//! Configuration module for spectre-agent.
//!
//! Handles loading configuration from a TOML file and CLI overrides, and
//! converting it into the runtime types of `spectre-core`.

pub mod file;

use crate::config::file::FileConfig;
use spectre_core::config::ScannerConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Loaded configuration ready to be wired into the scanner.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub rpc_url: Url,
    pub scanner: ScannerConfig,
    pub live: bool,
    pub backfill: bool,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    rpc_url_override: Option<Url>,
    no_backfill: bool,
}

impl ConfigLoader {
    pub fn new(
        config_path: impl AsRef<Path>,
        rpc_url_override: Option<Url>,
        no_backfill: bool,
    ) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            rpc_url_override,
            no_backfill,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Build the loaded configuration
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        self.parse(&config_content)
    }

    fn parse(&self, config_content: &str) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(config_content)?;

        if let Some(url) = &self.rpc_url_override {
            file_config.rpc.url = url.clone();
        }
        if self.no_backfill {
            file_config.scanner.backfill = false;
        }

        self.validate(&file_config)?;

        Ok(build_loaded_config(file_config))
    }

    fn validate(&self, config: &FileConfig) -> Result<(), ConfigError> {
        let scanner = &config.scanner;
        if scanner.addresses.is_empty() {
            return Err(ConfigError::ValidationError(
                "scanner.addresses must list at least one contract".to_string(),
            ));
        }
        if scanner.block_limit == 0 {
            return Err(ConfigError::ValidationError(
                "scanner.block_limit must be positive".to_string(),
            ));
        }
        if scanner.interval == 0 {
            return Err(ConfigError::ValidationError(
                "scanner.interval must be positive".to_string(),
            ));
        }
        if !scanner.live && !scanner.backfill {
            return Err(ConfigError::ValidationError(
                "both scanner routines are disabled, nothing to do".to_string(),
            ));
        }
        Ok(())
    }
}

fn build_loaded_config(file_config: FileConfig) -> LoadedConfig {
    let scanner = file_config.scanner;
    LoadedConfig {
        rpc_url: file_config.rpc.url,
        scanner: ScannerConfig {
            addresses: scanner.addresses,
            interval: Duration::from_secs(scanner.interval),
            prefetch_period: Duration::from_secs(scanner.prefetch_period),
            block_limit: scanner.block_limit,
            block_confirmations: scanner.block_confirmations,
        },
        live: scanner.live,
        backfill: scanner.backfill,
    }
}
