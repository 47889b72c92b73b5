use std::{path::Path, time::Duration};

use alloy::primitives::Address;
use clap::Args;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    log_reader::HistoryWindow,
    types::{AMOY_ISSUER_REGISTRY, AMOY_REVOCATION_REGISTRY, RegistryAddresses},
};

mod defaults {
    use alloy::primitives::Address;

    pub const LOOKBACK_BLOCKS: u64 = crate::log_reader::DEFAULT_LOOKBACK_BLOCKS;
    pub const LOG_PAGE_SIZE: u64 = crate::log_reader::DEFAULT_LOG_PAGE_SIZE;
    pub const CONFIRMATION_TIMEOUT_SECS: u64 = 120;
    pub const ACTIVITY_LIMIT: usize = crate::projector::DEFAULT_ACTIVITY_LIMIT;

    pub const fn issuer_registry() -> Address {
        crate::types::AMOY_ISSUER_REGISTRY
    }
    pub const fn revocation_registry() -> Address {
        crate::types::AMOY_REVOCATION_REGISTRY
    }
    pub const fn lookback_blocks() -> u64 {
        LOOKBACK_BLOCKS
    }
    pub const fn log_page_size() -> u64 {
        LOG_PAGE_SIZE
    }
    pub const fn confirmation_timeout_secs() -> u64 {
        CONFIRMATION_TIMEOUT_SECS
    }
    pub const fn activity_limit() -> usize {
        ACTIVITY_LIMIT
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Source(#[from] config::ConfigError),
    #[error("{0} must not be the zero address")]
    ZeroAddress(&'static str),
    #[error("issuer and revocation registry share address {0}")]
    SameRegistryAddress(Address),
    #[error("log_page_size must be at least 1")]
    ZeroPageSize,
}

/// Where the registries live and how much history to read.
#[derive(Debug, Clone, PartialEq, Eq, Args, Deserialize)]
#[command(next_help_heading = "Registry Configuration")]
pub struct RegistryConfig {
    /// IssuerRegistry contract address.
    #[arg(long, env = "ISSUER_REGISTRY_ADDRESS", default_value_t = AMOY_ISSUER_REGISTRY)]
    #[serde(default = "defaults::issuer_registry")]
    pub issuer_registry: Address,

    /// RevocationRegistry contract address.
    #[arg(long, env = "REVOCATION_REGISTRY_ADDRESS", default_value_t = AMOY_REVOCATION_REGISTRY)]
    #[serde(default = "defaults::revocation_registry")]
    pub revocation_registry: Address,

    /// How many blocks before head event history reaches.
    #[arg(long, env = "LOOKBACK_BLOCKS", default_value_t = defaults::LOOKBACK_BLOCKS)]
    #[serde(default = "defaults::lookback_blocks")]
    pub lookback_blocks: u64,

    /// Read history from this block instead of a look-back window.
    /// Set it to the deployment block for complete projections.
    #[arg(long, env = "FROM_BLOCK")]
    #[serde(default)]
    pub from_block: Option<u64>,

    /// Largest block range per `eth_getLogs` request.
    #[arg(long, env = "LOG_PAGE_SIZE", default_value_t = defaults::LOG_PAGE_SIZE)]
    #[serde(default = "defaults::log_page_size")]
    pub log_page_size: u64,

    /// Seconds to wait for a receipt before giving up. 0 waits forever.
    #[arg(long, env = "CONFIRMATION_TIMEOUT_SECS", default_value_t = defaults::CONFIRMATION_TIMEOUT_SECS)]
    #[serde(default = "defaults::confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,

    /// Number of events shown in activity feeds.
    #[arg(long, env = "ACTIVITY_LIMIT", default_value_t = defaults::ACTIVITY_LIMIT)]
    #[serde(default = "defaults::activity_limit")]
    pub activity_limit: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            issuer_registry: defaults::issuer_registry(),
            revocation_registry: defaults::revocation_registry(),
            lookback_blocks: defaults::LOOKBACK_BLOCKS,
            from_block: None,
            log_page_size: defaults::LOG_PAGE_SIZE,
            confirmation_timeout_secs: defaults::CONFIRMATION_TIMEOUT_SECS,
            activity_limit: defaults::ACTIVITY_LIMIT,
        }
    }
}

impl RegistryConfig {
    /// Loads the `[registry]` table of a TOML file, or the whole file if there is none.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;

        let config = settings
            .get::<Self>("registry")
            .or_else(|_| settings.try_deserialize::<Self>())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer_registry.is_zero() {
            return Err(ConfigError::ZeroAddress("issuer_registry"));
        }
        if self.revocation_registry.is_zero() {
            return Err(ConfigError::ZeroAddress("revocation_registry"));
        }
        if self.issuer_registry == self.revocation_registry {
            return Err(ConfigError::SameRegistryAddress(self.issuer_registry));
        }
        if self.log_page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        Ok(())
    }

    pub fn addresses(&self) -> RegistryAddresses {
        RegistryAddresses::new(self.issuer_registry, self.revocation_registry)
    }

    pub fn history_window(&self) -> HistoryWindow {
        match self.from_block {
            Some(block) => HistoryWindow::FromBlock(block),
            None => HistoryWindow::LookBack(self.lookback_blocks),
        }
    }

    pub fn confirmation_timeout(&self) -> Option<Duration> {
        (self.confirmation_timeout_secs > 0)
            .then(|| Duration::from_secs(self.confirmation_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use alloy::primitives::address;

    use super::*;

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_table_uses_amoy_defaults() {
        let file = write_toml("[registry]\n");
        let config = RegistryConfig::from_file(file.path()).unwrap();
        assert_eq!(config, RegistryConfig::default());
        assert_eq!(config.addresses(), RegistryAddresses::default());
        assert_eq!(config.history_window(), HistoryWindow::LookBack(10_000));
        assert_eq!(config.confirmation_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn from_block_selects_authoritative_history() {
        let file = write_toml(
            r#"
            [registry]
            issuer_registry = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
            revocation_registry = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512"
            from_block = 1200
            log_page_size = 2000
            confirmation_timeout_secs = 0
        "#,
        );
        let config = RegistryConfig::from_file(file.path()).unwrap();
        assert_eq!(
            config.issuer_registry,
            address!("0x5FbDB2315678afecb367f032d93F642f64180aa3")
        );
        assert_eq!(config.history_window(), HistoryWindow::FromBlock(1200));
        assert_eq!(config.log_page_size, 2000);
        assert_eq!(config.confirmation_timeout(), None);
    }

    #[test]
    fn identical_registry_addresses_are_rejected() {
        let file = write_toml(
            r#"
            issuer_registry = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
            revocation_registry = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
        "#,
        );
        assert!(matches!(
            RegistryConfig::from_file(file.path()),
            Err(ConfigError::SameRegistryAddress(_))
        ));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let config = RegistryConfig {
            log_page_size: 0,
            ..RegistryConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroPageSize)));
    }
}
