use chrono::{SecondsFormat, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use super::canonical::to_canonical_bytes;
use super::pow::{meets_difficulty, Interruption, MiningControl, CHECK_INTERVAL, MAX_DIFFICULTY};
use super::transaction::Transaction;

/// Errors that can occur while mining a block
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("Difficulty {0} cannot be met by a 64 character hex digest")]
    UnreachableDifficulty(u32),

    #[error("Mining of block {index} was cancelled at nonce {nonce}")]
    Cancelled { index: u64, nonce: u64 },

    #[error("Mining of block {index} timed out at nonce {nonce}")]
    TimedOut { index: u64, nonce: u64 },
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// List of transactions included in this block
    pub transactions: Vec<Transaction>,

    /// ISO-8601 creation time, kept verbatim so the hash survives a reload
    #[schema(example = "2023-01-01T12:00:00.000000Z")]
    pub timestamp: String,

    /// Hash of the previous block, "0" for genesis
    pub previous_hash: String,

    /// Proof of work nonce
    pub nonce: u64,

    /// Hash of the current block, empty until computed
    #[serde(default)]
    pub hash: String,
}

impl Block {
    /// Creates a new unmined block stamped with the current time
    pub fn new(index: u64, transactions: Vec<Transaction>, previous_hash: String) -> Self {
        Self::with_timestamp(
            index,
            transactions,
            Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            previous_hash,
        )
    }

    pub fn with_timestamp(
        index: u64,
        transactions: Vec<Transaction>,
        timestamp: String,
        previous_hash: String,
    ) -> Self {
        Block {
            index,
            transactions,
            timestamp,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        }
    }

    /// Calculates the hash of the block
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the canonical block contents as a hexadecimal
    /// string. The stored `hash` field is not part of the input.
    pub fn compute_hash(&self) -> String {
        let transactions: Vec<_> = self
            .transactions
            .iter()
            .map(Transaction::to_hash_value)
            .collect();

        let block_data = json!({
            "index": self.index,
            "transactions": transactions,
            "timestamp": self.timestamp,
            "previous_hash": self.previous_hash,
            "nonce": self.nonce,
        });

        format!("{:x}", Sha256::digest(to_canonical_bytes(&block_data)))
    }

    /// Whether the stored hash matches the contents and meets `difficulty`
    pub fn is_mined(&self, difficulty: u32) -> bool {
        self.hash == self.compute_hash() && meets_difficulty(&self.hash, difficulty)
    }

    /// Runs proof of work until the hash has `difficulty` leading zeros
    pub fn mine(&mut self, difficulty: u32) -> Result<(), BlockError> {
        self.mine_with(difficulty, &MiningControl::unbounded())
    }

    /// Runs proof of work, checking `control` every [`CHECK_INTERVAL`] nonces.
    ///
    /// The hash is recomputed for the current nonce before searching, so a
    /// difficulty of 0 costs exactly one hash. If the search is interrupted
    /// the block is left with a hash that matches its current nonce.
    pub fn mine_with(&mut self, difficulty: u32, control: &MiningControl) -> Result<(), BlockError> {
        if difficulty > MAX_DIFFICULTY {
            return Err(BlockError::UnreachableDifficulty(difficulty));
        }

        debug!("Mining block {} at difficulty {}", self.index, difficulty);

        self.hash = self.compute_hash();
        let mut attempts: u64 = 0;

        while !meets_difficulty(&self.hash, difficulty) {
            if attempts % CHECK_INTERVAL == 0 {
                if let Some(reason) = control.interruption() {
                    let (index, nonce) = (self.index, self.nonce);
                    return Err(match reason {
                        Interruption::Cancelled => BlockError::Cancelled { index, nonce },
                        Interruption::TimedOut => BlockError::TimedOut { index, nonce },
                    });
                }
            }

            self.nonce += 1;
            self.hash = self.compute_hash();
            attempts += 1;
        }

        debug!(
            "Block {} mined after {} attempts: {}",
            self.index, attempts, self.hash
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use std::time::Duration;

    fn sample_block() -> Block {
        let miner = Wallet::new().unwrap();
        let transactions = vec![
            Transaction::reward(miner.identity().clone(), 10.0),
            Transaction::reward(miner.identity().clone(), 20.0),
        ];

        Block::new(1, transactions, "previous_hash".to_string())
    }

    #[test]
    fn test_new_block() {
        let block = sample_block();

        assert_eq!(block.index, 1);
        assert_eq!(block.nonce, 0);
        assert_eq!(block.previous_hash, "previous_hash");
        assert!(block.hash.is_empty());
        assert_eq!(block.transactions.len(), 2);
    }

    #[test]
    fn test_compute_hash_is_deterministic() {
        let block = sample_block();

        let hash = block.compute_hash();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, block.compute_hash());
        assert_eq!(hash, block.clone().compute_hash());
    }

    #[test]
    fn test_hash_covers_every_field() {
        let block = sample_block();
        let original = block.compute_hash();

        let mut changed = block.clone();
        changed.nonce += 1;
        assert_ne!(changed.compute_hash(), original);

        let mut changed = block.clone();
        changed.index += 1;
        assert_ne!(changed.compute_hash(), original);

        let mut changed = block.clone();
        changed.previous_hash = "other".to_string();
        assert_ne!(changed.compute_hash(), original);

        let mut changed = block.clone();
        changed.timestamp = "2000-01-01T00:00:00.000000Z".to_string();
        assert_ne!(changed.compute_hash(), original);

        let mut changed = block.clone();
        changed.transactions[0].amount = 11.0;
        assert_ne!(changed.compute_hash(), original);

        // The stored hash is an output, not an input
        let mut changed = block;
        changed.hash = "ignored".to_string();
        assert_eq!(changed.compute_hash(), original);
    }

    #[test]
    fn test_mine_block() {
        let mut block = sample_block();

        block.mine(2).unwrap();

        assert!(block.hash.starts_with("00"));
        assert_eq!(block.hash, block.compute_hash());
        assert!(block.is_mined(2));
    }

    #[test]
    fn test_mine_with_zero_difficulty_keeps_nonce() {
        let mut block = sample_block();

        block.mine(0).unwrap();

        assert_eq!(block.nonce, 0);
        assert_eq!(block.hash, block.compute_hash());
    }

    #[test]
    fn test_unreachable_difficulty_is_refused() {
        let mut block = sample_block();

        assert_eq!(block.mine(65), Err(BlockError::UnreachableDifficulty(65)));
        assert!(block.hash.is_empty());
    }

    #[test]
    fn test_cancelled_mining_stops() {
        let mut block = sample_block();
        let control = MiningControl::unbounded();
        control.cancel();

        let result = block.mine_with(MAX_DIFFICULTY, &control);

        assert!(matches!(result, Err(BlockError::Cancelled { index: 1, .. })));
        assert_eq!(block.hash, block.compute_hash());
    }

    #[test]
    fn test_mining_times_out() {
        let mut block = sample_block();
        let control = MiningControl::with_timeout(Duration::from_millis(20));

        let result = block.mine_with(MAX_DIFFICULTY, &control);

        assert!(matches!(result, Err(BlockError::TimedOut { .. })));
        assert_eq!(block.hash, block.compute_hash());
    }

    #[test]
    fn test_block_json_shape() {
        let mut block = sample_block();
        block.mine(1).unwrap();

        let value = serde_json::to_value(&block).unwrap();
        for field in ["index", "transactions", "timestamp", "previous_hash", "nonce", "hash"] {
            assert!(value.get(field).is_some(), "missing field {}", field);
        }

        let parsed: Block = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, block);
        assert_eq!(parsed.compute_hash(), block.hash);
    }
}
