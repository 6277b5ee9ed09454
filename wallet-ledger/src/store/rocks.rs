//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `wallets` - Wallet rows (key: wallet_id BE)
//! - `transactions` - Append-only transaction log (key: transaction_id BE)
//! - `wallet_txns` - Per-wallet index (key: wallet_id BE || transaction_id BE)
//! - `meta` - ID sequences
//!
//! Every mutation goes out as one `WriteBatch`, so RocksDB provides the
//! all-or-nothing guarantee. The sequence mutex serializes the
//! read-check-write section of a commit.

use super::{
    sort_newest_first, Committed, LedgerStore, StoreStats, TransactionLog, WalletStore,
    WalletWrite, WriteSet,
};
use crate::{
    error::{Error, Result},
    types::{NewTransaction, OwnerId, Transaction, TransactionId, Wallet, WalletId},
    Config,
};
use chrono::Utc;
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, WriteOptions, DB,
};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Column family names
const CF_WALLETS: &str = "wallets";
const CF_TRANSACTIONS: &str = "transactions";
const CF_WALLET_TXNS: &str = "wallet_txns";
const CF_META: &str = "meta";

const KEY_NEXT_WALLET: &[u8] = b"next_wallet_id";
const KEY_NEXT_TRANSACTION: &[u8] = b"next_transaction_id";

/// Next free IDs; the mutex around them is the commit lock
#[derive(Debug)]
struct Sequences {
    next_wallet: u64,
    next_transaction: u64,
}

/// RocksDB-backed [`LedgerStore`]
pub struct RocksStore {
    db: DB,
    sequences: Mutex<Sequences>,
    sync_writes: bool,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .field("sequences", &*self.sequences.lock())
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.storage.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_wallets()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_transactions()),
            ColumnFamilyDescriptor::new(CF_WALLET_TXNS, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let sequences = {
            let cf_meta = db
                .cf_handle(CF_META)
                .ok_or_else(|| Error::Storage(format!("Column family {} not found", CF_META)))?;
            Sequences {
                next_wallet: Self::read_sequence(&db, cf_meta, KEY_NEXT_WALLET)?,
                next_transaction: Self::read_sequence(&db, cf_meta, KEY_NEXT_TRANSACTION)?,
            }
        };

        tracing::info!(
            path = ?path,
            next_wallet_id = sequences.next_wallet,
            next_transaction_id = sequences.next_transaction,
            "Opened RocksDB wallet store"
        );

        Ok(Self {
            db,
            sequences: Mutex::new(sequences),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options_wallets() -> Options {
        let mut opts = Options::default();
        // Wallets are read on every mutation, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_transactions() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn read_sequence(db: &DB, cf: &ColumnFamily, key: &[u8]) -> Result<u64> {
        match db.get_cf(cf, key)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    Error::Storage(format!(
                        "corrupt sequence {}",
                        String::from_utf8_lossy(key)
                    ))
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(1),
        }
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }

    fn index_key(wallet: WalletId, transaction: TransactionId) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&wallet.to_key());
        key[8..].copy_from_slice(&transaction.to_key());
        key
    }

    fn read_wallet(&self, id: WalletId) -> Result<Wallet> {
        let cf = self.cf_handle(CF_WALLETS)?;
        let value = self
            .db
            .get_cf(cf, id.to_key())?
            .ok_or(Error::WalletNotFound(id))?;
        Ok(bincode::deserialize(&value)?)
    }

    fn read_transaction(&self, id: TransactionId) -> Result<Transaction> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let value = self
            .db
            .get_cf(cf, id.to_key())?
            .ok_or_else(|| Error::Storage(format!("indexed transaction {} missing", id)))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Check, stage and write one atomic batch
    fn apply(&self, wallet_writes: Vec<WalletWrite>, appends: Vec<NewTransaction>) -> Result<Committed> {
        let mut sequences = self.sequences.lock();
        let now = Utc::now();

        let mut staged: HashMap<WalletId, Wallet> = HashMap::new();
        let mut order = Vec::with_capacity(wallet_writes.len());

        for write in &wallet_writes {
            let id = write.expected.id;
            let current = match staged.remove(&id) {
                Some(wallet) => wallet,
                None => self.read_wallet(id)?,
            };
            staged.insert(id, write.apply(&current, now)?);
            order.push(id);
        }

        let mut batch = WriteBatch::default();

        // 1. Wallet rows
        let cf_wallets = self.cf_handle(CF_WALLETS)?;
        for (id, wallet) in &staged {
            batch.put_cf(cf_wallets, id.to_key(), bincode::serialize(wallet)?);
        }

        // 2. Transactions and indices
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_index = self.cf_handle(CF_WALLET_TXNS)?;

        let mut next_transaction = sequences.next_transaction;
        let mut transactions = Vec::with_capacity(appends.len());
        for entry in appends {
            for wallet in entry.from_wallet_id.iter().chain(Some(&entry.to_wallet_id)) {
                if !staged.contains_key(wallet) {
                    self.read_wallet(*wallet)?;
                }
            }

            let id = TransactionId(next_transaction);
            next_transaction += 1;
            let tx = entry.into_transaction(id, now);

            batch.put_cf(cf_transactions, id.to_key(), bincode::serialize(&tx)?);
            batch.put_cf(cf_index, Self::index_key(tx.to_wallet_id, id), b"");
            if let Some(from) = tx.from_wallet_id {
                batch.put_cf(cf_index, Self::index_key(from, id), b"");
            }
            transactions.push(tx);
        }

        // 3. Sequence
        let cf_meta = self.cf_handle(CF_META)?;
        batch.put_cf(cf_meta, KEY_NEXT_TRANSACTION, next_transaction.to_be_bytes());

        // Atomic commit
        self.db.write_opt(batch, &self.write_options())?;
        sequences.next_transaction = next_transaction;

        tracing::debug!(
            wallets = order.len(),
            transactions = transactions.len(),
            "Write set committed"
        );

        let wallets = order
            .iter()
            .filter_map(|id| staged.get(id).cloned())
            .collect();

        Ok(Committed {
            wallets,
            transactions,
        })
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

impl WalletStore for RocksStore {
    fn get(&self, id: WalletId) -> Result<Wallet> {
        self.read_wallet(id)
    }

    fn create(&self, owner_id: OwnerId) -> Result<Wallet> {
        let mut sequences = self.sequences.lock();

        let id = WalletId(sequences.next_wallet);
        let wallet = Wallet::new(id, owner_id, Utc::now());

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf_handle(CF_WALLETS)?,
            id.to_key(),
            bincode::serialize(&wallet)?,
        );
        batch.put_cf(
            self.cf_handle(CF_META)?,
            KEY_NEXT_WALLET,
            (id.0 + 1).to_be_bytes(),
        );
        self.db.write_opt(batch, &self.write_options())?;
        sequences.next_wallet = id.0 + 1;

        Ok(wallet)
    }

    fn list(&self) -> Result<Vec<Wallet>> {
        let cf = self.cf_handle(CF_WALLETS)?;
        let mut wallets = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            wallets.push(bincode::deserialize(&value)?);
        }
        Ok(wallets)
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

impl TransactionLog for RocksStore {
    fn append(&self, entry: NewTransaction) -> Result<Transaction> {
        self.apply(Vec::new(), vec![entry])?
            .transactions
            .pop()
            .ok_or_else(|| Error::Storage("commit returned no transaction".to_string()))
    }

    fn list_for(&self, wallet: WalletId) -> Result<Vec<Transaction>> {
        let cf_index = self.cf_handle(CF_WALLET_TXNS)?;
        let prefix = wallet.to_key();

        let mut transactions = Vec::new();
        for item in self.db.prefix_iterator_cf(cf_index, prefix) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }

            let raw: [u8; 8] = key[8..]
                .try_into()
                .map_err(|_| Error::Storage("corrupt wallet_txns key".to_string()))?;
            transactions.push(self.read_transaction(TransactionId(u64::from_be_bytes(raw)))?);
        }

        sort_newest_first(&mut transactions);
        Ok(transactions)
    }

    fn list_all(&self) -> Result<Vec<Transaction>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let mut transactions = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            transactions.push(bincode::deserialize(&value)?);
        }
        Ok(transactions)
    }
}

impl LedgerStore for RocksStore {
    fn commit(&self, writes: WriteSet) -> Result<Committed> {
        let (wallet_writes, appends) = writes.into_parts();
        self.apply(wallet_writes, appends)
    }

    fn stats(&self) -> Result<StoreStats> {
        let sequences = self.sequences.lock();
        Ok(StoreStats {
            wallets: sequences.next_wallet - 1,
            transactions: sequences.next_transaction - 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (config, temp_dir)
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();
        assert!(store.db.cf_handle(CF_WALLETS).is_some());
        assert!(store.db.cf_handle(CF_WALLET_TXNS).is_some());
        assert_eq!(
            store.stats().unwrap(),
            StoreStats {
                wallets: 0,
                transactions: 0
            }
        );
    }

    #[test]
    fn test_create_and_get_wallet() {
        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();

        let wallet = store.create(42).unwrap();
        assert_eq!(wallet.id, WalletId(1));

        let retrieved = store.get(wallet.id).unwrap();
        assert_eq!(retrieved, wallet);
        assert!(matches!(
            store.get(WalletId(2)),
            Err(Error::WalletNotFound(_))
        ));
    }

    #[test]
    fn test_atomic_commit() {
        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();

        let a = store.create(1).unwrap();
        let b = store.create(2).unwrap();
        let a = store.set_balance(&a, dec!(100)).unwrap();

        let mut writes = WriteSet::new();
        writes
            .set_balance(&a, dec!(70))
            .set_balance(&b, dec!(30))
            .append(NewTransaction::transfer(a.id, b.id, dec!(30)));
        let committed = store.commit(writes).unwrap();

        assert_eq!(committed.wallets.len(), 2);
        assert_eq!(committed.transactions[0].id, TransactionId(1));
        assert_eq!(store.get(a.id).unwrap().balance, dec!(70));
        assert_eq!(store.get(b.id).unwrap().balance, dec!(30));
        assert_eq!(store.list_for(a.id).unwrap().len(), 1);
        assert_eq!(store.list_for(b.id).unwrap().len(), 1);
    }

    #[test]
    fn test_conflict_writes_nothing() {
        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();

        let a = store.create(1).unwrap();
        let b = store.create(2).unwrap();
        let stale_b = b.clone();
        store.set_balance(&b, dec!(5)).unwrap();

        let mut writes = WriteSet::new();
        writes
            .set_balance(&a, dec!(1))
            .set_balance(&stale_b, dec!(6))
            .append(NewTransaction::top_up(a.id, dec!(1)));

        assert!(matches!(store.commit(writes), Err(Error::Conflict(_))));
        assert_eq!(store.get(a.id).unwrap().balance, Decimal::ZERO);
        assert!(store.list_all().unwrap().is_empty());
        assert_eq!(store.stats().unwrap().transactions, 0);
    }

    #[test]
    fn test_history_is_per_wallet_and_newest_first() {
        let (config, _temp) = test_config();
        let store = RocksStore::open(&config).unwrap();

        let mut wallets = Vec::new();
        for owner in 0..3 {
            wallets.push(store.create(owner).unwrap());
        }

        for amount in [dec!(1), dec!(2), dec!(3)] {
            store
                .append(NewTransaction::top_up(wallets[0].id, amount))
                .unwrap();
        }
        store
            .append(NewTransaction::top_up(wallets[1].id, dec!(9)))
            .unwrap();

        let history = store.list_for(wallets[0].id).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].amount, dec!(3));
        assert_eq!(history[2].amount, dec!(1));

        assert_eq!(store.list_for(wallets[1].id).unwrap().len(), 1);
        assert!(store.list_for(wallets[2].id).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_preserves_state() {
        let (config, _temp) = test_config();

        let wallet_id = {
            let store = RocksStore::open(&config).unwrap();
            let wallet = store.create(7).unwrap();
            store
                .append(NewTransaction::top_up(wallet.id, dec!(12.34)))
                .unwrap();
            store.set_balance(&wallet, dec!(12.34)).unwrap();
            store.close().unwrap();
            wallet.id
        };

        let store = RocksStore::open(&config).unwrap();
        assert_eq!(store.get(wallet_id).unwrap().balance, dec!(12.34));
        assert_eq!(store.list_for(wallet_id).unwrap().len(), 1);

        let next = store.create(8).unwrap();
        assert_eq!(next.id, WalletId(2));
        let tx = store
            .append(NewTransaction::top_up(next.id, dec!(1)))
            .unwrap();
        assert_eq!(tx.id, TransactionId(2));
    }
}
