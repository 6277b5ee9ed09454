//! Storage capabilities for wallets and the transaction log
//!
//! The engine talks to storage only through [`LedgerStore`]. Two backends
//! satisfy it identically:
//!
//! - [`MemoryStore`] - process-local state, used by tests and embedders
//! - [`RocksStore`] - column families committed through a single `WriteBatch`
//!
//! # Atomic unit
//!
//! Mutations are staged in a [`WriteSet`]: any number of wallet writes, each
//! carrying the snapshot its operation read, plus transaction appends.
//! [`LedgerStore::commit`] checks every snapshot against the stored row and
//! then applies everything, or nothing.

use crate::{
    error::{Error, Result},
    types::{NewTransaction, OwnerId, Transaction, Wallet, WalletId},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

/// Persistent table of wallets keyed by [`WalletId`]
pub trait WalletStore: Send + Sync {
    /// Fetch a wallet row, soft-deleted rows included
    fn get(&self, id: WalletId) -> Result<Wallet>;

    /// Insert a new zero-balance wallet with the next free ID
    fn create(&self, owner_id: OwnerId) -> Result<Wallet>;

    /// All rows in ascending ID order, soft-deleted rows included
    fn list(&self) -> Result<Vec<Wallet>>;

    /// Replace the balance of `expected.id` if the row still equals `expected`
    fn set_balance(&self, expected: &Wallet, balance: Decimal) -> Result<Wallet>;
}

/// Append-only record of balance movements
pub trait TransactionLog: Send + Sync {
    /// Append one entry, assigning its ID and timestamp
    fn append(&self, entry: NewTransaction) -> Result<Transaction>;

    /// Entries touching `wallet`, newest first
    fn list_for(&self, wallet: WalletId) -> Result<Vec<Transaction>>;

    /// Every entry in commit order
    fn list_all(&self) -> Result<Vec<Transaction>>;
}

/// Combined store with an atomic commit primitive
pub trait LedgerStore: WalletStore + TransactionLog {
    /// Apply a write set atomically
    fn commit(&self, writes: WriteSet) -> Result<Committed>;

    /// Row counts
    fn stats(&self) -> Result<StoreStats>;
}

/// Change applied to one wallet row
#[derive(Debug, Clone, PartialEq)]
pub enum WalletChange {
    /// New balance
    Balance(Decimal),
    /// New owner
    Owner(OwnerId),
    /// Soft delete
    Delete,
}

/// Conditional write against one wallet
#[derive(Debug, Clone)]
pub struct WalletWrite {
    /// Row as read by the staging operation
    pub expected: Wallet,
    /// Change to apply
    pub change: WalletChange,
}

impl WalletWrite {
    /// Apply to the current row, failing with `Conflict` if it moved
    pub fn apply(&self, current: &Wallet, now: DateTime<Utc>) -> Result<Wallet> {
        if *current != self.expected {
            return Err(Error::Conflict(format!(
                "wallet {} changed since it was read",
                self.expected.id
            )));
        }

        let mut next = current.clone();
        match self.change {
            WalletChange::Balance(balance) => {
                if balance < Decimal::ZERO {
                    return Err(Error::InvalidAmount(format!(
                        "wallet {} balance would become {}",
                        current.id, balance
                    )));
                }
                next.balance = balance;
            }
            WalletChange::Owner(owner_id) => next.owner_id = owner_id,
            WalletChange::Delete => next.deleted_at = Some(now),
        }
        next.updated_at = now;

        Ok(next)
    }
}

/// Writes committed together or not at all
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    wallets: Vec<WalletWrite>,
    appends: Vec<NewTransaction>,
}

impl WriteSet {
    /// Empty write set
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a balance change for the wallet read as `expected`
    pub fn set_balance(&mut self, expected: &Wallet, balance: Decimal) -> &mut Self {
        self.update(expected, WalletChange::Balance(balance))
    }

    /// Stage any wallet change
    pub fn update(&mut self, expected: &Wallet, change: WalletChange) -> &mut Self {
        self.wallets.push(WalletWrite {
            expected: expected.clone(),
            change,
        });
        self
    }

    /// Stage a transaction append
    pub fn append(&mut self, entry: NewTransaction) -> &mut Self {
        self.appends.push(entry);
        self
    }

    /// Split into parts for a backend
    pub fn into_parts(self) -> (Vec<WalletWrite>, Vec<NewTransaction>) {
        (self.wallets, self.appends)
    }
}

/// Rows produced by a successful commit
#[derive(Debug, Clone, Default)]
pub struct Committed {
    /// Wallet rows after the commit, in staging order
    pub wallets: Vec<Wallet>,
    /// Appended transactions, in staging order
    pub transactions: Vec<Transaction>,
}

/// Storage statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Wallet rows (soft-deleted included)
    pub wallets: u64,
    /// Transaction rows
    pub transactions: u64,
}

/// Newest first; ID breaks timestamp ties
pub(crate) fn sort_newest_first(transactions: &mut [Transaction]) {
    transactions.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
}
