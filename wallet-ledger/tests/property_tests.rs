//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Non-negativity: no balance ever drops below zero
//! - Conservation: Σ(balances) == Σ(top-ups)
//! - Per-wallet audit: balance == Σ(credits) − Σ(debits)
//! - Rejections are side-effect free

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use wallet_ledger::{Config, Error, Ledger, MemoryStore, WalletId};

const WALLETS: usize = 4;

#[derive(Debug, Clone)]
enum Op {
    TopUp { wallet: usize, cents: i64 },
    Transfer { from: usize, to: usize, cents: i64 },
}

/// Strategy for generating valid amounts in cents
fn cents_strategy() -> impl Strategy<Value = i64> {
    1i64..50_000
}

/// Strategy for generating ledger operations
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..WALLETS, cents_strategy()).prop_map(|(wallet, cents)| Op::TopUp { wallet, cents }),
        (0..WALLETS, 0..WALLETS, cents_strategy())
            .prop_map(|(from, to, cents)| Op::Transfer { from, to, cents }),
    ]
}

/// Create test ledger over the in-memory backend
fn create_test_ledger() -> Ledger {
    let mut config = Config::default();
    config.metrics.enabled = false;
    Ledger::new(Arc::new(MemoryStore::new()), &config).unwrap()
}

async fn create_wallets(ledger: &Ledger) -> Vec<WalletId> {
    let mut ids = Vec::with_capacity(WALLETS);
    for owner in 0..WALLETS as u64 {
        ids.push(ledger.create_wallet(owner).await.unwrap().id);
    }
    ids
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: any operation sequence keeps the ledger balanced and non-negative,
    /// and matches a simple reference model
    #[test]
    fn prop_invariants_hold(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = create_test_ledger();
            let ids = create_wallets(&ledger).await;
            let mut model: HashMap<WalletId, Decimal> =
                ids.iter().map(|id| (*id, Decimal::ZERO)).collect();

            for op in ops {
                match op {
                    Op::TopUp { wallet, cents } => {
                        let amount = Decimal::new(cents, 2);
                        ledger.top_up(ids[wallet], amount).await.unwrap();
                        *model.get_mut(&ids[wallet]).unwrap() += amount;
                    }
                    Op::Transfer { from, to, cents } => {
                        let amount = Decimal::new(cents, 2);
                        let result = ledger.transfer(ids[from], ids[to], amount).await;
                        if from == to {
                            prop_assert!(matches!(result, Err(Error::SameWallet(_))));
                        } else if model[&ids[from]] < amount {
                            prop_assert!(
                                matches!(result, Err(Error::InsufficientBalance { .. })),
                                "expected InsufficientBalance, got {:?}",
                                result
                            );
                        } else {
                            prop_assert!(result.is_ok());
                            *model.get_mut(&ids[from]).unwrap() -= amount;
                            *model.get_mut(&ids[to]).unwrap() += amount;
                        }
                    }
                }
            }

            for id in &ids {
                let balance = ledger.get_balance(*id).await.unwrap();
                prop_assert!(balance >= Decimal::ZERO);
                prop_assert_eq!(balance, model[id]);

                let report = ledger.verify_wallet(*id).await.unwrap();
                prop_assert!(report.is_consistent());
            }

            let total = ledger.verify_conservation().await.unwrap();
            prop_assert!(total.is_consistent());
            Ok(())
        })?;
    }

    /// Property: amounts finer than the configured scale are always rejected
    #[test]
    fn prop_over_precise_amounts_rejected(mills in 1i64..1_000_000) {
        prop_assume!(mills % 10 != 0);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = create_test_ledger();
            let ids = create_wallets(&ledger).await;

            let result = ledger.top_up(ids[0], Decimal::new(mills, 3)).await;
            prop_assert!(matches!(result, Err(Error::InvalidAmount(_))));
            prop_assert_eq!(ledger.get_balance(ids[0]).await.unwrap(), Decimal::ZERO);
            prop_assert!(ledger.get_history(ids[0]).await.unwrap().is_empty());
            Ok(())
        })?;
    }

    /// Property: history is newest first and every entry touches the wallet
    #[test]
    fn prop_history_ordering(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = create_test_ledger();
            let ids = create_wallets(&ledger).await;

            for op in ops {
                let _ = match op {
                    Op::TopUp { wallet, cents } => ledger
                        .top_up(ids[wallet], Decimal::new(cents, 2))
                        .await
                        .map(|_| ()),
                    Op::Transfer { from, to, cents } => ledger
                        .transfer(ids[from], ids[to], Decimal::new(cents, 2))
                        .await
                        .map(|_| ()),
                };
            }

            for id in &ids {
                let history = ledger.get_history(*id).await.unwrap();
                for pair in history.windows(2) {
                    prop_assert!(
                        (pair[0].created_at, pair[0].id) > (pair[1].created_at, pair[1].id)
                    );
                }
                prop_assert!(history.iter().all(|tx| tx.involves(*id)));
            }
            Ok(())
        })?;
    }
}
