//! Wallet Ledger
//!
//! Balance-keeping engine for a digital wallet service: wallets hold a
//! non-negative decimal balance, money enters through top-ups and moves
//! between wallets through transfers, and every movement is recorded in an
//! append-only transaction log.
//!
//! # Architecture
//!
//! - **Store**: wallet table and transaction log behind one atomic commit
//! - **Locks**: per-wallet exclusive sections, acquired in ID order
//! - **Optimistic check**: commits verify the rows they read are unchanged
//! - **Backends**: in-memory for tests, RocksDB for durability

#![forbid(unsafe_code)]
//!
//! # Invariants
//!
//! - Non-negativity: no committed balance is ever below zero
//! - Conservation: Σ(balances) == Σ(top-ups) at every committed state
//! - Per-wallet audit: balance == Σ(credits) − Σ(debits) over its history
//! - Atomicity: a transfer's debit, credit and log entry land together

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod store;
pub mod ledger;
pub mod locks;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    AuditReport, NewTransaction, OwnerId, Transaction, TransactionId, Wallet, WalletId,
    WalletPatch,
};
pub use store::{LedgerStore, MemoryStore, RocksStore, TransactionLog, WalletStore, WriteSet};
pub use ledger::Ledger;
pub use config::Config;
