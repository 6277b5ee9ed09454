//! End-to-end tests for the ledger engine
//!
//! Covers the concurrency and durability behaviour that unit tests can't:
//! many tasks racing on shared wallets, and state surviving a RocksDB reopen.

use rand::{rngs::StdRng, Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use wallet_ledger::{
    config::Backend, Config, Error, Ledger, MemoryStore, Result, Transaction, Wallet, WalletId,
    WalletStore,
};

fn memory_ledger() -> Arc<Ledger> {
    let store = Arc::new(MemoryStore::new());
    Arc::new(Ledger::new(store, &Config::default()).unwrap())
}

fn rocks_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.storage.backend = Backend::Rocksdb;
    config.storage.data_dir = dir.path().join("ledger");
    config
}

async fn funded(ledger: &Ledger, owner_id: u64, balance: Decimal) -> Wallet {
    let wallet = ledger.create_wallet(owner_id).await.unwrap();
    if balance.is_zero() {
        return wallet;
    }
    ledger.top_up(wallet.id, balance).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_overdraw_is_impossible() {
    let ledger = memory_ledger();
    let source = funded(&ledger, 1, dec!(100)).await.id;
    let sink = ledger.create_wallet(2).await.unwrap().id;

    // 20 transfers of 10 against a balance of 100
    let mut tasks = Vec::new();
    for _ in 0..20 {
        let ledger = ledger.clone();
        tasks.push(tokio::spawn(async move {
            ledger.transfer(source, sink, dec!(10)).await
        }));
    }

    let mut succeeded = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(Error::InsufficientBalance { .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(rejected, 10);
    assert_eq!(ledger.get_balance(source).await.unwrap(), Decimal::ZERO);
    assert_eq!(ledger.get_balance(sink).await.unwrap(), dec!(100));
    assert_eq!(ledger.get_history(source).await.unwrap().len(), 11);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_complete() {
    let ledger = memory_ledger();
    let a = funded(&ledger, 1, dec!(1000)).await;
    let b = funded(&ledger, 2, dec!(1000)).await;

    let mut tasks = Vec::new();
    for i in 0..100 {
        let ledger = ledger.clone();
        let (from, to) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
        tasks.push(tokio::spawn(async move {
            ledger.transfer(from, to, dec!(1.25)).await
        }));
    }

    let joined = tokio::time::timeout(Duration::from_secs(10), join_all(tasks))
        .await
        .expect("transfers deadlocked");
    assert!(joined.iter().all(|r| r.is_ok()));

    // Equal traffic both ways
    assert_eq!(ledger.get_balance(a.id).await.unwrap(), dec!(1000));
    assert_eq!(ledger.get_balance(b.id).await.unwrap(), dec!(1000));
    assert!(ledger.verify_conservation().await.unwrap().is_consistent());
}

async fn join_all(tasks: Vec<JoinHandle<Result<Transaction>>>) -> Vec<Result<Transaction>> {
    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        results.push(task.await.unwrap());
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_random_traffic_conserves_money() {
    let ledger = memory_ledger();
    let mut wallets = Vec::new();
    for owner in 0..5 {
        wallets.push(funded(&ledger, owner, dec!(500)).await.id);
    }

    let mut rng = StdRng::seed_from_u64(7);
    let plan: Vec<(WalletId, WalletId, Decimal)> = (0..300)
        .map(|_| {
            let from = wallets[rng.gen_range(0..wallets.len())];
            let to = wallets[rng.gen_range(0..wallets.len())];
            let cents: i64 = rng.gen_range(1..20_000);
            (from, to, Decimal::new(cents, 2))
        })
        .collect();

    let mut tasks = Vec::new();
    for (from, to, amount) in plan {
        let ledger = ledger.clone();
        tasks.push(tokio::spawn(async move {
            match ledger.transfer(from, to, amount).await {
                Ok(_) | Err(Error::InsufficientBalance { .. }) | Err(Error::SameWallet(_)) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let total = ledger.verify_conservation().await.unwrap();
    assert!(total.is_consistent());
    assert_eq!(total.stored, dec!(2500));

    for wallet in wallets {
        let report = ledger.verify_wallet(wallet).await.unwrap();
        assert!(report.is_consistent(), "wallet {} drifted", wallet);
        assert!(report.stored >= Decimal::ZERO);
    }
}

#[tokio::test]
async fn test_rocksdb_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = rocks_config(&dir);

    let (a, b, transfer_id) = {
        let ledger = Ledger::open(&config).unwrap();
        let a = funded(&ledger, 1, dec!(100.00)).await;
        let b = funded(&ledger, 2, dec!(20.00)).await;
        let tx = ledger.transfer(a.id, b.id, dec!(30.00)).await.unwrap();
        (a.id, b.id, tx.id)
    };

    let ledger = Ledger::open(&config).unwrap();
    assert_eq!(ledger.get_balance(a).await.unwrap(), dec!(70.00));
    assert_eq!(ledger.get_balance(b).await.unwrap(), dec!(50.00));

    let history = ledger.get_history(a).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, transfer_id);
    assert_eq!(history[0].from_wallet_id, Some(a));

    // Sequences continue past the persisted rows
    let c = ledger.create_wallet(3).await.unwrap();
    assert!(c.id > b);
    let tx = ledger.transfer(b, c.id, dec!(5)).await.unwrap();
    assert!(tx.id > transfer_id);

    assert!(ledger.verify_conservation().await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_rocksdb_rejections_write_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(&rocks_config(&dir)).unwrap();
    let a = funded(&ledger, 1, dec!(10)).await;
    let b = ledger.create_wallet(2).await.unwrap();

    assert!(matches!(
        ledger.transfer(a.id, b.id, dec!(10.01)).await,
        Err(Error::InsufficientBalance { .. })
    ));
    assert!(matches!(
        ledger.top_up(b.id, dec!(1.001)).await,
        Err(Error::InvalidAmount(_))
    ));

    assert_eq!(ledger.get_balance(a.id).await.unwrap(), dec!(10));
    assert!(ledger.get_history(b.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rocksdb_soft_delete_persists() {
    let dir = tempfile::tempdir().unwrap();
    let config = rocks_config(&dir);

    let wallet = {
        let ledger = Ledger::open(&config).unwrap();
        let wallet = ledger.create_wallet(9).await.unwrap();
        ledger.delete_wallet(wallet.id).await.unwrap();
        wallet.id
    };

    let store = wallet_ledger::RocksStore::open(&config).unwrap();
    assert!(store.get(wallet).unwrap().deleted_at.is_some());
    drop(store);

    let ledger = Ledger::open(&config).unwrap();
    assert!(ledger.get_wallet(wallet).await.unwrap_err().is_not_found());
    assert!(matches!(
        ledger.get_wallet_by_owner(9).await,
        Err(Error::NoWalletForOwner(9))
    ));
}

#[tokio::test]
async fn test_cancellation_after_commit_keeps_result() {
    let ledger = memory_ledger();
    let a = funded(&ledger, 1, dec!(10)).await;
    let b = ledger.create_wallet(2).await.unwrap();

    // Uncontended: completes well inside the deadline
    let done = tokio::time::timeout(
        Duration::from_secs(5),
        ledger.transfer(a.id, b.id, dec!(4)),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(ledger.get_history(b.id).await.unwrap()[0].id, done.id);
    assert_eq!(ledger.get_balance(a.id).await.unwrap(), dec!(6));
}
