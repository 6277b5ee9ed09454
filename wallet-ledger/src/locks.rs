//! Per-wallet exclusive locks
//!
//! Every mutation holds the lock of each wallet it touches from its first
//! read until its commit returns. Multi-wallet acquisitions always take locks
//! in ascending [`WalletId`] order, so two transfers moving money in opposite
//! directions between the same pair cannot deadlock.
//!
//! Locks are `tokio` mutexes: waiting tasks yield instead of blocking a
//! worker thread, and a waiter dropped mid-acquisition simply leaves the
//! queue.

use crate::{types::WalletId, Error, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Prune idle entries once the table grows past this many wallets
const PRUNE_THRESHOLD: usize = 4096;

/// Lock table keyed by wallet
#[derive(Debug)]
pub struct LockManager {
    locks: DashMap<WalletId, Arc<Mutex<()>>>,
    timeout: Duration,
}

/// Held locks; released on drop
#[derive(Debug)]
pub struct WalletGuard {
    wallets: Vec<WalletId>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl WalletGuard {
    /// Wallets covered, in acquisition order
    pub fn wallets(&self) -> &[WalletId] {
        &self.wallets
    }
}

impl LockManager {
    /// Create a lock table whose acquisitions give up after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Lock one wallet
    pub async fn lock(&self, wallet: WalletId) -> Result<WalletGuard> {
        self.acquire(vec![wallet]).await
    }

    /// Lock both wallets of a transfer, lower ID first
    pub async fn lock_pair(&self, a: WalletId, b: WalletId) -> Result<WalletGuard> {
        self.acquire(vec![a, b]).await
    }

    /// Lock any set of wallets in ascending order
    pub async fn acquire(&self, mut wallets: Vec<WalletId>) -> Result<WalletGuard> {
        wallets.sort_unstable();
        wallets.dedup();

        if self.locks.len() > PRUNE_THRESHOLD {
            self.prune();
        }

        let acquisition = async {
            let mut guards = Vec::with_capacity(wallets.len());
            for wallet in &wallets {
                guards.push(self.entry(*wallet).lock_owned().await);
            }
            guards
        };

        let acquired = tokio::time::timeout(self.timeout, acquisition).await;
        match acquired {
            Ok(guards) => {
                tracing::debug!(wallets = ?wallets, "Wallet locks acquired");
                Ok(WalletGuard {
                    wallets,
                    _guards: guards,
                })
            }
            Err(_) => Err(Error::DeadlineExceeded(format!(
                "waited more than {:?} for wallet locks {:?}",
                self.timeout, wallets
            ))),
        }
    }

    /// Drop entries nobody holds or waits on
    pub fn prune(&self) {
        // The map holds one reference; any other means a holder or waiter
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of wallets with a lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// No lock entries
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn entry(&self, wallet: WalletId) -> Arc<Mutex<()>> {
        self.locks
            .entry(wallet)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
