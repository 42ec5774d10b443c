use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::block::{Block, BlockError};
use super::crypto::{Address, Identity};
use super::pow::{meets_difficulty, MiningControl};
use super::transaction::Transaction;

/// Sentinel previous hash of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// What `mine_pending` does when no user transaction is waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyMempoolPolicy {
    /// Mine a block holding only the reward
    MineRewardOnly,
    /// Refuse to mine and queue no reward
    Skip,
}

pub const DEFAULT_EMPTY_MEMPOOL_POLICY: EmptyMempoolPolicy = EmptyMempoolPolicy::MineRewardOnly;

impl Default for EmptyMempoolPolicy {
    fn default() -> Self {
        DEFAULT_EMPTY_MEMPOOL_POLICY
    }
}

/// Reasons a transaction or mining request is turned away.
///
/// These are ordinary outcomes, not failures of the ledger: the caller
/// decides whether to resubmit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("no transactions to mine")]
    EmptyMempool,

    #[error("the Network sender is reserved for mining rewards")]
    ReservedSender,
}

/// First problem found while walking the chain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainViolation {
    #[error("invalid hash at block {0}")]
    HashMismatch(u64),

    #[error("block {0} has not been mined properly")]
    InsufficientWork(u64),

    #[error("block {0} does not link to the hash of block {1}")]
    BrokenLink(u64, u64),

    #[error("block at position {position} has index {index}")]
    IndexMismatch { position: usize, index: u64 },
}

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Transaction rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    #[error("Genesis block already exists")]
    GenesisExists,

    #[error("Chain has no genesis block")]
    MissingGenesis,

    #[error("Chain has no room for another block index")]
    IndexOverflow,

    #[error("Block {0} was built on a tip that has since changed")]
    StaleCandidate(u64),

    #[error("Block {0} does not meet the ledger difficulty")]
    Unmined(u64),
}

/// A block assembled by [`Blockchain::prepare_block`], not yet mined
#[derive(Debug, Clone)]
pub struct Candidate {
    block: Block,
    difficulty: u32,
}

impl Candidate {
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Runs the proof-of-work search at the difficulty the block was prepared for
    pub fn mine_with(&mut self, control: &MiningControl) -> Result<(), BlockError> {
        self.block.mine_with(self.difficulty, control)
    }
}

/// Serializable form of a ledger, used by persistence collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LedgerState {
    pub chain: Vec<Block>,
    pub difficulty: u32,
    pub mempool: Vec<Transaction>,
    pub block_reward: f64,
}

/// Represents the blockchain: the chain, the mempool and the rules over them.
///
/// All mutation goes through `&mut self`; a service sharing one ledger
/// between requests wraps it in a single lock.
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks, genesis first
    chain: Vec<Block>,

    /// Transactions admitted but not yet mined
    mempool: Vec<Transaction>,

    /// Mining difficulty (number of leading zero hex characters)
    difficulty: u32,

    /// Amount credited to the miner of each block
    block_reward: f64,

    empty_mempool_policy: EmptyMempoolPolicy,

    /// Upper bound on a single proof-of-work search
    mining_timeout: Option<Duration>,
}

impl Blockchain {
    /// Creates an empty ledger; call [`Blockchain::create_genesis`] next
    pub fn new(difficulty: u32, block_reward: f64) -> Self {
        Blockchain {
            chain: Vec::new(),
            mempool: Vec::new(),
            difficulty,
            block_reward,
            empty_mempool_policy: DEFAULT_EMPTY_MEMPOOL_POLICY,
            mining_timeout: None,
        }
    }

    pub fn with_empty_mempool_policy(mut self, policy: EmptyMempoolPolicy) -> Self {
        self.empty_mempool_policy = policy;
        self
    }

    pub fn with_mining_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.mining_timeout = timeout;
        self
    }

    /// Mines and appends the genesis block
    pub fn create_genesis(&mut self) -> Result<&Block, LedgerError> {
        let control = MiningControl::from_timeout(self.mining_timeout);
        self.create_genesis_with(&control)
    }

    pub fn create_genesis_with(&mut self, control: &MiningControl) -> Result<&Block, LedgerError> {
        if !self.chain.is_empty() {
            return Err(LedgerError::GenesisExists);
        }

        let mut genesis = Block::new(0, Vec::new(), GENESIS_PREVIOUS_HASH.to_string());
        genesis.hash = genesis.compute_hash();
        genesis.mine_with(self.difficulty, control)?;

        info!("Genesis block mined: {}", genesis.hash);
        self.chain.push(genesis);

        Ok(&self.chain[0])
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn mempool(&self) -> &[Transaction] {
        &self.mempool
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn block_reward(&self) -> f64 {
        self.block_reward
    }

    pub fn empty_mempool_policy(&self) -> EmptyMempoolPolicy {
        self.empty_mempool_policy
    }

    pub fn latest_block(&self) -> Option<&Block> {
        self.chain.last()
    }

    /// Balance of `address` over every mined transaction.
    ///
    /// Recomputed from scratch on each call; pending transactions do not count.
    pub fn get_balance(&self, address: &Address) -> f64 {
        let mut balance = 0.0;

        for block in &self.chain {
            for tx in &block.transactions {
                if &tx.recipient_address() == address {
                    balance += tx.amount;
                }
                if tx.sender_address().as_ref() == Some(address) {
                    balance -= tx.amount;
                }
            }
        }

        balance
    }

    /// Admits a transaction into the mempool.
    ///
    /// Rewards go straight in. Everything else must carry a valid signature,
    /// a finite non-negative amount, and be covered by the sender's mined
    /// balance.
    pub fn add_transaction(&mut self, transaction: Transaction) -> Result<(), Rejection> {
        let sender = match transaction.sender_address() {
            None => {
                info!("Reward transaction added to mempool");
                self.mempool.push(transaction);
                return Ok(());
            }
            Some(address) => address,
        };

        if !transaction.verify() {
            warn!("Transaction from {} rejected: invalid signature", sender);
            return Err(Rejection::InvalidSignature);
        }

        if !transaction.amount.is_finite() || transaction.amount < 0.0 {
            warn!(
                "Transaction from {} rejected: invalid amount {}",
                sender, transaction.amount
            );
            return Err(Rejection::InvalidAmount(transaction.amount));
        }

        let available = self.get_balance(&sender);
        if available < transaction.amount {
            warn!(
                "Transaction from {} rejected: insufficient balance ({} < {})",
                sender, available, transaction.amount
            );
            return Err(Rejection::InsufficientBalance {
                required: transaction.amount,
                available,
            });
        }

        info!("Transaction from {} added to mempool", sender);
        self.mempool.push(transaction);
        Ok(())
    }

    /// Mines the mempool plus a reward for `miner` into a new block
    pub fn mine_pending(&mut self, miner: &Identity) -> Result<Block, LedgerError> {
        let control = self.mining_control();
        self.mine_pending_with(miner, &control)
    }

    /// Same as [`Blockchain::mine_pending`] with an explicit mining control.
    ///
    /// If mining is interrupted the reward queued by this call is withdrawn
    /// and the mempool is left as it was.
    pub fn mine_pending_with(
        &mut self,
        miner: &Identity,
        control: &MiningControl,
    ) -> Result<Block, LedgerError> {
        let mut candidate = self.prepare_block(miner)?;

        if let Err(err) = candidate.mine_with(control) {
            self.abandon_block(&candidate);
            return Err(err.into());
        }

        self.commit_block(candidate)
    }

    /// A fresh control carrying the configured mining timeout
    pub fn mining_control(&self) -> MiningControl {
        MiningControl::from_timeout(self.mining_timeout)
    }

    /// Queues the reward for `miner` and assembles the next block from the
    /// mempool, without mining it.
    ///
    /// The returned candidate can be mined without access to the ledger and
    /// must then be handed to [`Blockchain::commit_block`] or
    /// [`Blockchain::abandon_block`].
    pub fn prepare_block(&mut self, miner: &Identity) -> Result<Candidate, LedgerError> {
        let previous_hash = match self.chain.last() {
            Some(block) => block.hash.clone(),
            None => return Err(LedgerError::MissingGenesis),
        };
        let index = u64::try_from(self.chain.len()).map_err(|_| LedgerError::IndexOverflow)?;

        if self.empty_mempool_policy == EmptyMempoolPolicy::Skip
            && self.mempool.iter().all(Transaction::is_reward)
        {
            info!("No transactions to mine");
            return Err(Rejection::EmptyMempool.into());
        }

        self.add_transaction(Transaction::reward(miner.clone(), self.block_reward))?;

        Ok(Candidate {
            block: Block::new(index, self.mempool.clone(), previous_hash),
            difficulty: self.difficulty,
        })
    }

    /// Appends a mined candidate and drops its transactions from the mempool.
    ///
    /// Transactions admitted while the candidate was being mined stay queued.
    /// A candidate built on an older tip, or whose transactions are no longer
    /// at the head of the mempool, is refused with [`LedgerError::StaleCandidate`].
    pub fn commit_block(&mut self, candidate: Candidate) -> Result<Block, LedgerError> {
        let block = candidate.block;

        let tip_matches = self
            .chain
            .last()
            .map_or(false, |tip| tip.hash == block.previous_hash)
            && u64::try_from(self.chain.len()) == Ok(block.index);
        let queued = block.transactions.len();

        if !tip_matches || !self.mempool.starts_with(&block.transactions) {
            warn!("Block {} no longer extends the chain; discarded", block.index);
            return Err(LedgerError::StaleCandidate(block.index));
        }

        if !block.is_mined(self.difficulty) {
            return Err(LedgerError::Unmined(block.index));
        }

        info!(
            "Block {} has been added to the blockchain with {} transactions",
            block.index, queued
        );

        self.mempool.drain(..queued);
        self.chain.push(block.clone());

        Ok(block)
    }

    /// Withdraws the reward queued for a candidate that will not be committed
    pub fn abandon_block(&mut self, candidate: &Candidate) {
        let block = &candidate.block;
        warn!("Mining of block {} abandoned", block.index);

        if let Some(position) = block.transactions.len().checked_sub(1) {
            if self.mempool.get(position) == block.transactions.last() {
                self.mempool.remove(position);
            }
        }
    }

    /// Validates the chain, reporting the first problem found
    pub fn validate_chain(&self) -> Result<(), ChainViolation> {
        for i in 1..self.chain.len() {
            let current = &self.chain[i];
            let previous = &self.chain[i - 1];

            if current.hash != current.compute_hash() {
                return Err(ChainViolation::HashMismatch(current.index));
            }

            if previous.hash != previous.compute_hash() {
                return Err(ChainViolation::HashMismatch(previous.index));
            }

            if !meets_difficulty(&current.hash, self.difficulty) {
                return Err(ChainViolation::InsufficientWork(current.index));
            }

            if current.previous_hash != previous.hash {
                return Err(ChainViolation::BrokenLink(current.index, previous.index));
            }

            if previous.index.checked_add(1) != Some(current.index) {
                return Err(ChainViolation::IndexMismatch {
                    position: i,
                    index: current.index,
                });
            }
        }

        Ok(())
    }

    /// true if the blockchain is valid, false otherwise
    pub fn is_chain_valid(&self) -> bool {
        match self.validate_chain() {
            Ok(()) => true,
            Err(violation) => {
                warn!("Chain validation failed: {}", violation);
                false
            }
        }
    }

    /// Snapshot of the persisted fields
    pub fn serialize(&self) -> LedgerState {
        LedgerState {
            chain: self.chain.clone(),
            difficulty: self.difficulty,
            mempool: self.mempool.clone(),
            block_reward: self.block_reward,
        }
    }

    /// Restores a ledger from a snapshot, with default runtime settings
    pub fn deserialize(state: LedgerState) -> Self {
        Blockchain {
            chain: state.chain,
            mempool: state.mempool,
            difficulty: state.difficulty,
            block_reward: state.block_reward,
            empty_mempool_policy: DEFAULT_EMPTY_MEMPOOL_POLICY,
            mining_timeout: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn chain_mut(&mut self) -> &mut Vec<Block> {
        &mut self.chain
    }
}
