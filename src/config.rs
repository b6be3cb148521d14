//! Configuration management for the ledger core
//!
//! Values are read once at node startup and never change afterwards. A
//! missing file yields the built-in defaults; a present file only needs to
//! name the keys it overrides.

use crate::error::ChainError;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LedgerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Idle read-only connections kept around for cursors and lookups.
    #[serde(default = "default_reader_pool_size")]
    pub reader_pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            reader_pool_size: default_reader_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// How many blocks behind the anchor the reference block sits.
    #[serde(default = "default_ec_confirmation_depth")]
    pub ec_confirmation_depth: u64,
    #[serde(default = "default_prunable_retention_secs")]
    pub prunable_retention_secs: i64,
    /// Rows fetched per cursor round trip.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    #[serde(default = "default_block_cache_capacity")]
    pub block_cache_capacity: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            ec_confirmation_depth: default_ec_confirmation_depth(),
            prunable_retention_secs: default_prunable_retention_secs(),
            default_page_size: default_page_size(),
            block_cache_capacity: default_block_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(config_str: &str) -> Result<Self, ChainError> {
        let config: LedgerConfig = toml::from_str(config_str)
            .map_err(|e| ChainError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        if self.database.path.is_empty() {
            return Err(ChainError::ConfigError("database.path must be set".to_string()));
        }
        if self.chain.ec_confirmation_depth == 0 {
            return Err(ChainError::ConfigError(
                "chain.ec_confirmation_depth must be greater than zero".to_string(),
            ));
        }
        if self.chain.default_page_size == 0 {
            return Err(ChainError::ConfigError(
                "chain.default_page_size must be greater than zero".to_string(),
            ));
        }
        if self.chain.prunable_retention_secs < 0 {
            return Err(ChainError::ConfigError(
                "chain.prunable_retention_secs cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads the configuration at `path`, falling back to defaults when the file
/// does not exist.
pub fn load_config(path: impl AsRef<Path>) -> Result<LedgerConfig, ChainError> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        let config = LedgerConfig::default();
        config.validate()?;
        return Ok(config);
    }
    let config_str = fs::read_to_string(path)?;
    LedgerConfig::from_toml_str(&config_str)
}

fn default_db_path() -> String {
    "./data/ledger.db".to_string()
}

fn default_reader_pool_size() -> usize {
    4
}

fn default_ec_confirmation_depth() -> u64 {
    720
}

fn default_prunable_retention_secs() -> i64 {
    90 * 24 * 60 * 60
}

fn default_page_size() -> u32 {
    100
}

fn default_block_cache_capacity() -> usize {
    100
}

fn default_log_filter() -> String {
    "info".to_string()
}
