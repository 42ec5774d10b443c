//! A single-node proof-of-work ledger.
//!
//! The [`blockchain`] module holds the core: signed transactions, blocks
//! secured by proof of work, and the ledger that admits, mines, validates and
//! derives balances. [`api`] exposes it over HTTP and [`config`] reads the
//! settings for both.

pub mod api;
pub mod blockchain;
pub mod config;
