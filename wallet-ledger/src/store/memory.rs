//! In-memory ledger store
//!
//! A single `RwLock` guards all state. Commits build their wallet changes in a
//! staging map and only touch shared state once every write has applied, so
//! an error at any point leaves the store exactly as it was.

use super::{
    sort_newest_first, Committed, LedgerStore, StoreStats, TransactionLog, WalletStore,
    WalletWrite, WriteSet,
};
use crate::{
    error::{Error, Result},
    types::{NewTransaction, OwnerId, Transaction, TransactionId, Wallet, WalletId},
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
struct State {
    wallets: BTreeMap<WalletId, Wallet>,
    /// Indexed by `TransactionId - 1`
    transactions: Vec<Transaction>,
    by_wallet: HashMap<WalletId, Vec<TransactionId>>,
    next_wallet_id: u64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            wallets: BTreeMap::new(),
            transactions: Vec::new(),
            by_wallet: HashMap::new(),
            next_wallet_id: 1,
        }
    }
}

/// Process-local [`LedgerStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,

    /// One-shot fault: fail the next commit after this many wallet writes
    commit_fault: Mutex<Option<usize>>,

    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail after `wallet_writes` of its wallet writes
    /// have been staged
    ///
    /// With `1` on a transfer the debit is staged and the credit never is.
    pub fn inject_commit_fault(&self, wallet_writes: usize) {
        *self.commit_fault.lock() = Some(wallet_writes);
    }

    /// Simulate backend loss; every call fails with `Storage` while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Storage("memory store unavailable".to_string()));
        }
        Ok(())
    }

    fn apply(&self, wallet_writes: Vec<WalletWrite>, appends: Vec<NewTransaction>) -> Result<Committed> {
        self.check_available()?;

        let fault = self.commit_fault.lock().take();
        let mut state = self.state.write();
        let now = Utc::now();

        let mut staged: HashMap<WalletId, Wallet> = HashMap::new();
        let mut order = Vec::with_capacity(wallet_writes.len());

        for (applied, write) in wallet_writes.iter().enumerate() {
            if fault == Some(applied) {
                return Err(Error::Storage(format!(
                    "injected fault after {} wallet writes",
                    applied
                )));
            }

            let id = write.expected.id;
            let current = match staged.get(&id) {
                Some(wallet) => wallet,
                None => state.wallets.get(&id).ok_or(Error::WalletNotFound(id))?,
            };
            let next = write.apply(current, now)?;
            staged.insert(id, next);
            order.push(id);
        }

        if fault == Some(wallet_writes.len()) {
            return Err(Error::Storage(format!(
                "injected fault after {} wallet writes",
                wallet_writes.len()
            )));
        }

        for entry in &appends {
            let known = |id: &WalletId| staged.contains_key(id) || state.wallets.contains_key(id);
            if !known(&entry.to_wallet_id) {
                return Err(Error::WalletNotFound(entry.to_wallet_id));
            }
            if let Some(from) = entry.from_wallet_id {
                if !known(&from) {
                    return Err(Error::WalletNotFound(from));
                }
            }
        }

        // Point of no return
        let wallets = order
            .iter()
            .filter_map(|id| staged.get(id).cloned())
            .collect::<Vec<_>>();
        for (id, wallet) in staged {
            state.wallets.insert(id, wallet);
        }

        let mut transactions = Vec::with_capacity(appends.len());
        for entry in appends {
            let id = TransactionId(state.transactions.len() as u64 + 1);
            let tx = entry.into_transaction(id, now);

            state.by_wallet.entry(tx.to_wallet_id).or_default().push(id);
            if let Some(from) = tx.from_wallet_id {
                state.by_wallet.entry(from).or_default().push(id);
            }
            state.transactions.push(tx.clone());
            transactions.push(tx);
        }

        Ok(Committed {
            wallets,
            transactions,
        })
    }
}

impl WalletStore for MemoryStore {
    fn get(&self, id: WalletId) -> Result<Wallet> {
        self.check_available()?;
        self.state
            .read()
            .wallets
            .get(&id)
            .cloned()
            .ok_or(Error::WalletNotFound(id))
    }

    fn create(&self, owner_id: OwnerId) -> Result<Wallet> {
        self.check_available()?;
        let mut state = self.state.write();

        let id = WalletId(state.next_wallet_id);
        state.next_wallet_id += 1;

        let wallet = Wallet::new(id, owner_id, Utc::now());
        state.wallets.insert(id, wallet.clone());
        Ok(wallet)
    }

    fn list(&self) -> Result<Vec<Wallet>> {
        self.check_available()?;
        Ok(self.state.read().wallets.values().cloned().collect())
    }

    fn set_balance(&self, expected: &Wallet, balance: Decimal) -> Result<Wallet> {
        let mut writes = WriteSet::new();
        writes.set_balance(expected, balance);
        let (wallet_writes, appends) = writes.into_parts();

        self.apply(wallet_writes, appends)?
            .wallets
            .pop()
            .ok_or_else(|| Error::Storage("commit returned no wallet".to_string()))
    }
}

impl TransactionLog for MemoryStore {
    fn append(&self, entry: NewTransaction) -> Result<Transaction> {
        self.apply(Vec::new(), vec![entry])?
            .transactions
            .pop()
            .ok_or_else(|| Error::Storage("commit returned no transaction".to_string()))
    }

    fn list_for(&self, wallet: WalletId) -> Result<Vec<Transaction>> {
        self.check_available()?;
        let state = self.state.read();

        let mut transactions = state
            .by_wallet
            .get(&wallet)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.transactions.get(id.0 as usize - 1).cloned())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        sort_newest_first(&mut transactions);
        Ok(transactions)
    }

    fn list_all(&self) -> Result<Vec<Transaction>> {
        self.check_available()?;
        Ok(self.state.read().transactions.clone())
    }
}

impl LedgerStore for MemoryStore {
    fn commit(&self, writes: WriteSet) -> Result<Committed> {
        let (wallet_writes, appends) = writes.into_parts();
        self.apply(wallet_writes, appends)
    }

    fn stats(&self) -> Result<StoreStats> {
        self.check_available()?;
        let state = self.state.read();
        Ok(StoreStats {
            wallets: state.wallets.len() as u64,
            transactions: state.transactions.len() as u64,
        })
    }
}
