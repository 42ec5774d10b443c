//! Configuration management

use std::env;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::blockchain::pow::MAX_DIFFICULTY;
use crate::blockchain::{Blockchain, EmptyMempoolPolicy};

/// Environment variable naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "POW_LEDGER_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    #[serde(default = "default_block_reward")]
    pub block_reward: f64,
    #[serde(default)]
    pub empty_mempool_policy: EmptyMempoolPolicy,
    #[serde(default)]
    pub mining_timeout_secs: Option<u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            block_reward: default_block_reward(),
            empty_mempool_policy: EmptyMempoolPolicy::default(),
            mining_timeout_secs: None,
        }
    }
}

impl LedgerConfig {
    pub fn mining_timeout(&self) -> Option<Duration> {
        self.mining_timeout_secs.map(Duration::from_secs)
    }

    /// A fresh, empty ledger with these settings
    pub fn build(&self) -> Blockchain {
        self.apply(Blockchain::new(self.difficulty, self.block_reward))
    }

    /// Applies the runtime-only settings to an existing ledger.
    ///
    /// Difficulty and reward are part of the persisted state and are left alone.
    pub fn apply(&self, blockchain: Blockchain) -> Blockchain {
        blockchain
            .with_empty_mempool_policy(self.empty_mempool_policy)
            .with_mining_timeout(self.mining_timeout())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Parses and validates a TOML document
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`, falling back to defaults when the file does not exist
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(source) => Self::from_toml(&source),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "ledger.difficulty must be at most {}",
                MAX_DIFFICULTY
            )));
        }

        if !self.ledger.block_reward.is_finite() || self.ledger.block_reward < 0.0 {
            return Err(ConfigError::Invalid(
                "ledger.block_reward must be a non-negative number".to_string(),
            ));
        }

        if self.storage.path.is_empty() {
            return Err(ConfigError::Invalid("storage.path must be set".to_string()));
        }

        Ok(())
    }
}

/// Loads the config named by `POW_LEDGER_CONFIG`, or `config.toml`
pub fn load_config() -> Result<Config, ConfigError> {
    let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    Config::from_file(path)
}

fn default_difficulty() -> u32 {
    3
}

fn default_block_reward() -> f64 {
    50.0
}

fn default_storage_path() -> String {
    "data/ledger.json".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config.ledger.difficulty, 3);
        assert_eq!(config.ledger.block_reward, 50.0);
        assert_eq!(config.ledger.empty_mempool_policy, EmptyMempoolPolicy::MineRewardOnly);
        assert_eq!(config.ledger.mining_timeout(), None);
        assert_eq!(config.storage.path, "data/ledger.json");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml(
            r#"
            [ledger]
            difficulty = 2
            block_reward = 12.5
            empty_mempool_policy = "skip"
            mining_timeout_secs = 30

            [storage]
            path = "/tmp/ledger.json"

            [server]
            host = "0.0.0.0"
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.ledger.difficulty, 2);
        assert_eq!(config.ledger.block_reward, 12.5);
        assert_eq!(config.ledger.empty_mempool_policy, EmptyMempoolPolicy::Skip);
        assert_eq!(config.ledger.mining_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.server.host, "0.0.0.0");

        let blockchain = config.ledger.build();
        assert_eq!(blockchain.difficulty(), 2);
        assert_eq!(blockchain.block_reward(), 12.5);
        assert_eq!(blockchain.empty_mempool_policy(), EmptyMempoolPolicy::Skip);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            Config::from_toml("[ledger]\ndifficulty = 65"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml("[ledger]\nblock_reward = -1.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml("[storage]\npath = \"\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml("[ledger]\ndifficulty = \"hard\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::from_file(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.ledger.difficulty, 3);
    }
}
