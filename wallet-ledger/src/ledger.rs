//! Main ledger orchestration layer
//!
//! This module ties together the store, the lock table and metrics into the
//! wallet API consumed by the routing layer.
//!
//! Every mutation follows the same shape:
//!
//! 1. validate caller input (no locks, no I/O)
//! 2. lock the wallet(s) involved, lower ID first
//! 3. read the rows under the lock and apply business rules
//! 4. stage balance writes and the transaction append in one [`WriteSet`]
//! 5. commit, then release the locks
//!
//! Steps 2-5 re-run from scratch if the commit reports a conflict.
//!
//! # Example
//!
//! ```no_run
//! use wallet_ledger::{Config, Ledger};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> wallet_ledger::Result<()> {
//!     let ledger = Ledger::open(&Config::default())?;
//!
//!     let alice = ledger.create_wallet(1).await?;
//!     let bob = ledger.create_wallet(2).await?;
//!     ledger.top_up(alice.id, Decimal::new(10000, 2)).await?;
//!     ledger.transfer(alice.id, bob.id, Decimal::new(3000, 2)).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Cancellation
//!
//! Every `.await` inside an operation comes before its commit, and the commit
//! itself is synchronous. Dropping an operation's future therefore either
//! leaves the ledger untouched or happens after the commit already landed.

use crate::{
    config::Backend,
    locks::{LockManager, WalletGuard},
    metrics::Metrics,
    store::{Committed, LedgerStore, MemoryStore, RocksStore, WalletChange, WriteSet},
    types::{
        validate_amount, AuditReport, NewTransaction, OwnerId, Transaction, Wallet, WalletId,
        WalletPatch,
    },
    Config, Error, Result,
};
use rust_decimal::Decimal;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main ledger interface
pub struct Ledger {
    /// Wallet rows and transaction log
    store: Arc<dyn LedgerStore>,

    /// Per-wallet exclusive sections
    locks: LockManager,

    /// Prometheus collectors (if enabled)
    metrics: Option<Metrics>,

    /// Fractional digits accepted in amounts
    amount_scale: u32,

    /// Re-runs allowed after a commit conflict
    max_conflict_retries: u32,
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("locks", &self.locks)
            .field("amount_scale", &self.amount_scale)
            .field("max_conflict_retries", &self.max_conflict_retries)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open the backend named by `config.storage`
    pub fn open(config: &Config) -> Result<Self> {
        let store: Arc<dyn LedgerStore> = match config.storage.backend {
            Backend::Memory => Arc::new(MemoryStore::new()),
            Backend::Rocksdb => Arc::new(RocksStore::open(config)?),
        };
        Self::new(store, config)
    }

    /// Build an engine over an explicit store handle
    pub fn new(store: Arc<dyn LedgerStore>, config: &Config) -> Result<Self> {
        config.validate()?;

        let metrics = if config.metrics.enabled {
            let metrics = Metrics::new(&config.metrics.namespace)
                .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;
            Some(metrics)
        } else {
            None
        };

        Ok(Self {
            store,
            locks: LockManager::new(Duration::from_millis(config.ledger.lock_timeout_ms)),
            metrics,
            amount_scale: config.ledger.amount_scale,
            max_conflict_retries: config.ledger.max_conflict_retries,
        })
    }

    /// Metrics collector, if enabled
    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    // Wallet CRUD

    /// Create an empty wallet for `owner_id`
    pub async fn create_wallet(&self, owner_id: OwnerId) -> Result<Wallet> {
        let result = self.store.create(owner_id);
        if let Ok(wallet) = &result {
            tracing::info!(wallet_id = %wallet.id, owner_id, "Wallet created");
        }
        self.observe("create_wallet", result)
    }

    /// Active wallet by ID
    pub async fn get_wallet(&self, wallet_id: WalletId) -> Result<Wallet> {
        let result = self.active_wallet(wallet_id);
        self.observe("get_wallet", result)
    }

    /// Lowest-ID active wallet owned by `owner_id`
    pub async fn get_wallet_by_owner(&self, owner_id: OwnerId) -> Result<Wallet> {
        let result = self.store.list().and_then(|wallets| {
            wallets
                .into_iter()
                .find(|wallet| wallet.is_active() && wallet.owner_id == owner_id)
                .ok_or(Error::NoWalletForOwner(owner_id))
        });
        self.observe("get_wallet_by_owner", result)
    }

    /// All active wallets in ascending ID order
    pub async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let result = self.store.list().map(|wallets| {
            wallets
                .into_iter()
                .filter(Wallet::is_active)
                .collect::<Vec<_>>()
        });
        self.observe("list_wallets", result)
    }

    /// Change wallet attributes; balances are not patchable
    pub async fn update_wallet(&self, wallet_id: WalletId, patch: WalletPatch) -> Result<Wallet> {
        let result = self
            .retrying("update_wallet", || self.try_update_wallet(wallet_id, &patch))
            .await;
        self.observe("update_wallet", result)
    }

    /// Soft-delete an empty wallet
    ///
    /// The row and its history stay readable for audit; the wallet stops
    /// resolving for every other operation.
    pub async fn delete_wallet(&self, wallet_id: WalletId) -> Result<()> {
        let result = self
            .retrying("delete_wallet", || self.try_delete_wallet(wallet_id))
            .await;
        self.observe("delete_wallet", result)
    }

    // Balance movements

    /// Credit `amount` to a wallet from outside the ledger
    pub async fn top_up(&self, wallet_id: WalletId, amount: Decimal) -> Result<Wallet> {
        let result = match validate_amount(amount, self.amount_scale) {
            Ok(amount) => {
                self.retrying("top_up", || self.try_top_up(wallet_id, amount))
                    .await
            }
            Err(e) => Err(e),
        };
        self.observe("top_up", result)
    }

    /// Move `amount` from one wallet to another atomically
    ///
    /// Returns the single transaction recording the movement.
    pub async fn transfer(
        &self,
        from_wallet_id: WalletId,
        to_wallet_id: WalletId,
        amount: Decimal,
    ) -> Result<Transaction> {
        let result = if from_wallet_id == to_wallet_id {
            Err(Error::SameWallet(from_wallet_id))
        } else {
            match validate_amount(amount, self.amount_scale) {
                Ok(amount) => {
                    self.retrying("transfer", || {
                        self.try_transfer(from_wallet_id, to_wallet_id, amount)
                    })
                    .await
                }
                Err(e) => Err(e),
            }
        };
        self.observe("transfer", result)
    }

    // Reads

    /// Current balance of an active wallet
    pub async fn get_balance(&self, wallet_id: WalletId) -> Result<Decimal> {
        let result = self.active_wallet(wallet_id).map(|wallet| wallet.balance);
        self.observe("get_balance", result)
    }

    /// Transactions touching a wallet, newest first
    ///
    /// Soft-deleted wallets keep their history; only unknown IDs fail.
    pub async fn get_history(&self, wallet_id: WalletId) -> Result<Vec<Transaction>> {
        let result = self
            .store
            .get(wallet_id)
            .and_then(|_| self.store.list_for(wallet_id));
        self.observe("get_history", result)
    }

    // Audit

    /// Compare a wallet's stored balance with credits minus debits in the log
    pub async fn verify_wallet(&self, wallet_id: WalletId) -> Result<AuditReport> {
        let result = self.try_verify_wallet(wallet_id).await;
        self.observe("verify_wallet", result)
    }

    /// Compare the sum of all balances with the sum of all top-ups
    ///
    /// Locks every existing wallet for the duration of the read, so the
    /// figures come from one consistent cut.
    pub async fn verify_conservation(&self) -> Result<AuditReport> {
        let result = self.try_verify_conservation().await;
        self.observe("verify_conservation", result)
    }

    async fn try_verify_wallet(&self, wallet_id: WalletId) -> Result<AuditReport> {
        let _guard = self.timed(self.locks.lock(wallet_id)).await?;

        let wallet = self.store.get(wallet_id)?;
        let transactions = self.store.list_for(wallet_id)?;
        let derived = checked_total(
            transactions.iter().map(|tx| tx.net_effect(wallet_id)),
            "wallet history",
        )?;

        let report = AuditReport {
            stored: wallet.balance,
            derived,
            transactions: transactions.len(),
        };
        if !report.is_consistent() {
            tracing::error!(
                wallet_id = %wallet_id,
                stored = %report.stored,
                derived = %report.derived,
                "Wallet balance disagrees with transaction log"
            );
        }
        Ok(report)
    }

    async fn try_verify_conservation(&self) -> Result<AuditReport> {
        let ids: Vec<WalletId> = self.store.list()?.iter().map(|w| w.id).collect();
        let guard = self.timed(self.locks.acquire(ids)).await?;
        let locked = guard.wallets();

        let mut balances = Vec::with_capacity(locked.len());
        for wallet_id in locked {
            balances.push(self.store.get(*wallet_id)?.balance);
        }
        let stored = checked_total(balances, "wallet balances")?;

        // Wallets created after the listing are excluded along with their top-ups
        let top_ups: Vec<Transaction> = self
            .store
            .list_all()?
            .into_iter()
            .filter(|tx| tx.is_top_up() && locked.binary_search(&tx.to_wallet_id).is_ok())
            .collect();
        let derived = checked_total(top_ups.iter().map(|tx| tx.amount), "top-ups")?;

        let report = AuditReport {
            stored,
            derived,
            transactions: top_ups.len(),
        };
        if !report.is_consistent() {
            tracing::error!(
                stored = %report.stored,
                derived = %report.derived,
                "Total balance disagrees with total top-ups"
            );
        }
        Ok(report)
    }

    // Single attempts (run under `retrying`)

    async fn try_top_up(&self, wallet_id: WalletId, amount: Decimal) -> Result<Wallet> {
        let _guard = self.timed(self.locks.lock(wallet_id)).await?;

        let wallet = self.active_wallet(wallet_id)?;
        let balance = wallet.balance.checked_add(amount).ok_or_else(|| {
            Error::InvalidAmount(format!("top-up of {} overflows wallet {}", amount, wallet_id))
        })?;

        let mut writes = WriteSet::new();
        writes
            .set_balance(&wallet, balance)
            .append(NewTransaction::top_up(wallet_id, amount));

        let mut committed = self.commit(writes)?;
        let transaction_id = committed.transactions.first().map(|tx| tx.id);
        let updated = committed
            .wallets
            .pop()
            .ok_or_else(|| Error::Storage("commit returned no wallet".to_string()))?;

        tracing::info!(
            wallet_id = %wallet_id,
            amount = %amount,
            balance = %updated.balance,
            transaction_id = ?transaction_id,
            "Wallet topped up"
        );
        Ok(updated)
    }

    async fn try_transfer(
        &self,
        from_wallet_id: WalletId,
        to_wallet_id: WalletId,
        amount: Decimal,
    ) -> Result<Transaction> {
        let _guard = self
            .timed(self.locks.lock_pair(from_wallet_id, to_wallet_id))
            .await?;

        let source = self.active_wallet(from_wallet_id)?;
        let destination = self.active_wallet(to_wallet_id)?;

        if source.balance < amount {
            return Err(Error::InsufficientBalance {
                wallet: from_wallet_id,
                required: amount,
                available: source.balance,
            });
        }

        let debited = source.balance - amount;
        let credited = destination.balance.checked_add(amount).ok_or_else(|| {
            Error::InvalidAmount(format!(
                "transfer of {} overflows wallet {}",
                amount, to_wallet_id
            ))
        })?;

        let mut writes = WriteSet::new();
        writes
            .set_balance(&source, debited)
            .set_balance(&destination, credited)
            .append(NewTransaction::transfer(from_wallet_id, to_wallet_id, amount));

        let transaction = self
            .commit(writes)?
            .transactions
            .pop()
            .ok_or_else(|| Error::Storage("commit returned no transaction".to_string()))?;

        tracing::info!(
            from_wallet_id = %from_wallet_id,
            to_wallet_id = %to_wallet_id,
            amount = %amount,
            transaction_id = %transaction.id,
            "Transfer committed"
        );
        Ok(transaction)
    }

    async fn try_update_wallet(&self, wallet_id: WalletId, patch: &WalletPatch) -> Result<Wallet> {
        let _guard = self.timed(self.locks.lock(wallet_id)).await?;

        let wallet = self.active_wallet(wallet_id)?;
        let owner_id = match patch.owner_id {
            Some(owner_id) if owner_id != wallet.owner_id => owner_id,
            _ => return Ok(wallet),
        };

        let mut writes = WriteSet::new();
        writes.update(&wallet, WalletChange::Owner(owner_id));

        let updated = self
            .commit(writes)?
            .wallets
            .pop()
            .ok_or_else(|| Error::Storage("commit returned no wallet".to_string()))?;

        tracing::info!(wallet_id = %wallet_id, owner_id, "Wallet owner changed");
        Ok(updated)
    }

    async fn try_delete_wallet(&self, wallet_id: WalletId) -> Result<()> {
        let _guard = self.timed(self.locks.lock(wallet_id)).await?;

        let wallet = self.active_wallet(wallet_id)?;
        if !wallet.balance.is_zero() {
            return Err(Error::WalletNotEmpty(wallet_id));
        }

        let mut writes = WriteSet::new();
        writes.update(&wallet, WalletChange::Delete);
        self.commit(writes)?;

        tracing::info!(wallet_id = %wallet_id, "Wallet soft-deleted");
        Ok(())
    }

    // Helpers

    /// Re-run `attempt` while it fails with `Conflict`, up to the configured limit
    async fn retrying<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(Error::Conflict(reason)) if retries < self.max_conflict_retries => {
                    retries += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_conflict_retry();
                    }
                    tracing::debug!(operation, retries, %reason, "Commit conflict, retrying");
                    tokio::task::yield_now().await;
                }
                result => return result,
            }
        }
    }

    /// Await a lock acquisition, recording how long it waited
    async fn timed<F>(&self, acquisition: F) -> Result<WalletGuard>
    where
        F: Future<Output = Result<WalletGuard>>,
    {
        let started = Instant::now();
        let guard = acquisition.await?;
        if let Some(metrics) = &self.metrics {
            metrics.record_lock_wait(started.elapsed().as_secs_f64());
        }
        Ok(guard)
    }

    fn commit(&self, writes: WriteSet) -> Result<Committed> {
        let started = Instant::now();
        let committed = self.store.commit(writes)?;
        if let Some(metrics) = &self.metrics {
            metrics.record_commit_duration(started.elapsed().as_secs_f64());
            metrics.record_transactions(committed.transactions.len());
        }
        Ok(committed)
    }

    fn active_wallet(&self, wallet_id: WalletId) -> Result<Wallet> {
        let wallet = self.store.get(wallet_id)?;
        if !wallet.is_active() {
            return Err(Error::WalletNotFound(wallet_id));
        }
        Ok(wallet)
    }

    /// Count the outcome and log failures
    fn observe<T>(&self, operation: &'static str, result: Result<T>) -> Result<T> {
        if let Some(metrics) = &self.metrics {
            let outcome = match &result {
                Ok(_) => "ok",
                Err(e) => e.kind(),
            };
            metrics.record_operation(operation, outcome);
        }

        if let Err(e) = &result {
            match e {
                Error::Storage(_) | Error::Serialization(_) | Error::Io(_) | Error::Overflow(_) => {
                    tracing::error!(operation, error = %e, "Ledger operation failed")
                }
                _ => tracing::warn!(operation, kind = e.kind(), error = %e, "Ledger operation rejected"),
            }
        }

        result
    }
}

/// Sum amounts, failing instead of overflowing the decimal range
fn checked_total(amounts: impl IntoIterator<Item = Decimal>, what: &str) -> Result<Decimal> {
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |total, amount| total.checked_add(amount))
        .ok_or_else(|| Error::Overflow(format!("sum of {} exceeds the decimal range", what)))
}
