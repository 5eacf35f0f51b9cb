//! Node configuration
//!
//! Loaded from a TOML file; every section falls back to its defaults so an
//! empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::consensus::ConsensusParams;
use crate::constants::{DEFAULT_HISTORY_MEMO_CAPACITY, GENESIS_TIMESTAMP};
use crate::crypto::{Address, AddressError};
use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("genesis root {address:?} is not a valid address: {source}")]
    InvalidRoot {
        address: String,
        #[source]
        source: AddressError,
    },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Data directory holding the ledger database
    pub data_dir: PathBuf,
    /// Filter used when `RUST_LOG` is not set
    pub log_filter: String,
    pub consensus: ConsensusParams,
    pub ledger: LedgerConfig,
    pub instrumentation: InstrumentationConfig,
    pub genesis: GenesisConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("pot-data"),
            log_filter: "info".to_string(),
            consensus: ConsensusParams::default(),
            ledger: LedgerConfig::default(),
            instrumentation: InstrumentationConfig::default(),
            genesis: GenesisConfig::default(),
        }
    }
}

/// Ledger configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Addresses whose version chains are memoized for historical reads
    pub history_memo_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            history_memo_capacity: DEFAULT_HISTORY_MEMO_CAPACITY,
        }
    }
}

/// Diagnostics configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentationConfig {
    /// Record how each coinbase reward was split
    pub reward_rates: bool,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self { reward_rates: true }
    }
}

/// Genesis configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    pub timestamp: u64,
    /// Addresses seeded as roots of weight 1
    pub roots: Vec<String>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            timestamp: GENESIS_TIMESTAMP,
            roots: Vec::new(),
        }
    }
}

impl GenesisConfig {
    /// Parse and checksum-verify the configured roots
    pub fn root_addresses(&self) -> Result<Vec<Address>, ConfigError> {
        self.roots
            .iter()
            .map(|root| {
                Address::parse(root).map_err(|source| ConfigError::InvalidRoot {
                    address: root.clone(),
                    source,
                })
            })
            .collect()
    }
}

impl NodeConfig {
    /// Load configuration from `path`, or defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Location of the ledger database
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }
}
