// Blockchain module
//
// This module contains the core ledger implementation including:
// - Canonical serialization shared by hashing and signing
// - Keys, identities and addresses
// - Transaction structure
// - Block structure and proof of work
// - The ledger itself (chain, mempool, validation, balances)
// - JSON file persistence

pub mod block;
pub mod canonical;
pub mod chain;
pub mod crypto;
pub mod pow;
pub mod storage;
pub mod transaction;

// Re-export main components for easier access
pub use block::{Block, BlockError};
pub use chain::{
    Blockchain, Candidate, ChainViolation, EmptyMempoolPolicy, LedgerError, LedgerState, Rejection,
    DEFAULT_EMPTY_MEMPOOL_POLICY,
};
pub use crypto::{Address, DigitalSignature, Identity, KeyPair, Wallet};
pub use pow::MiningControl;
pub use storage::{LedgerStore, StorageError};
pub use transaction::{Sender, Transaction, TransactionError, NETWORK_SENDER};
