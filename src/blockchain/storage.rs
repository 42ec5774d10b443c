use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

use super::chain::{Blockchain, LedgerError, LedgerState};
use crate::config::LedgerConfig;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Keeps a ledger as a single JSON document on disk
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        LedgerStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the ledger state, replacing the previous file in one rename
    pub fn save(&self, blockchain: &Blockchain) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(&blockchain.serialize())
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;

        info!("Blockchain saved to '{}'", self.path.display());
        Ok(())
    }

    /// Reads the ledger state back
    pub fn load(&self) -> Result<LedgerState, StorageError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(format!(
                    "No ledger at '{}'",
                    self.path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&json).map_err(|e| StorageError::DeserializationError(e.to_string()))
    }

    /// Loads the stored ledger, or bootstraps a fresh one from `config`.
    ///
    /// A missing or unreadable file is replaced by a new ledger with a mined
    /// genesis block; the old contents are not repaired.
    pub fn load_or_bootstrap(&self, config: &LedgerConfig) -> Result<Blockchain, StorageError> {
        match self.load() {
            Ok(state) => {
                info!(
                    "Blockchain loaded from '{}' ({} blocks)",
                    self.path.display(),
                    state.chain.len()
                );
                Ok(config.apply(Blockchain::deserialize(state)))
            }
            Err(err) => {
                match &err {
                    StorageError::NotFound(_) => {
                        info!("No existing blockchain found. Creating a new one with genesis block.")
                    }
                    other => warn!("Discarding unreadable ledger: {}", other),
                }

                let mut blockchain = config.build();
                blockchain.create_genesis()?;
                self.save(&blockchain)?;
                Ok(blockchain)
            }
        }
    }
}
